use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{
    common::{CanonicalPurchaseState, PurchaseKind, Vendor},
    purchase::VerifiedPurchase,
};

/// Decoded `signedTransactionInfo` (JWSTransactionDecodedPayload).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppleTransaction {
    pub transaction_id: String,
    pub original_transaction_id: String,
    #[serde(default)]
    pub bundle_id: Option<String>,
    pub product_id: String,
    /// Milliseconds since epoch
    #[serde(default)]
    pub purchase_date: Option<i64>,
    /// Milliseconds since epoch, subscriptions only
    #[serde(default)]
    pub expires_date: Option<i64>,
    /// "Auto-Renewable Subscription", "Consumable", "Non-Consumable", ...
    #[serde(default, rename = "type")]
    pub product_type: Option<String>,
    #[serde(default)]
    pub revocation_date: Option<i64>,
    #[serde(default)]
    pub revocation_reason: Option<i32>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub in_app_ownership_type: Option<String>,
}

impl AppleTransaction {
    pub fn canonical_state(&self) -> CanonicalPurchaseState {
        if self.revocation_date.is_some() {
            CanonicalPurchaseState::Revoked
        } else {
            CanonicalPurchaseState::Purchased
        }
    }

    pub fn kind(&self) -> PurchaseKind {
        match self.product_type.as_deref() {
            Some("Auto-Renewable Subscription") => PurchaseKind::Subscription,
            _ => PurchaseKind::OneTime,
        }
    }

    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.expires_date.and_then(|ms| {
            OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000).ok()
        })
    }

    /// Normalize into a vendor-neutral purchase; `signed_transaction_info`
    /// is kept verbatim as the receipt's raw payload.
    pub fn into_verified(self, signed_transaction_info: String) -> VerifiedPurchase {
        VerifiedPurchase {
            vendor: Vendor::Apple,
            state: self.canonical_state(),
            kind: self.kind(),
            expires_at: self.expires_at(),
            purchase_token: self.transaction_id.clone(),
            transaction_id: self.transaction_id,
            original_transaction_id: self.original_transaction_id,
            product_id: self.product_id,
            // Apple has no server-side acknowledgement step
            acknowledged: true,
            raw_payload: signed_transaction_info,
        }
    }
}

/// Decoded `signedRenewalInfo` (JWSRenewalInfoDecodedPayload), subset.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppleRenewalInfo {
    pub original_transaction_id: String,
    #[serde(default)]
    pub auto_renew_product_id: Option<String>,
    #[serde(default)]
    pub auto_renew_status: Option<i32>,
    #[serde(default)]
    pub expiration_intent: Option<i32>,
    #[serde(default)]
    pub is_in_billing_retry_period: Option<bool>,
}

/// Outer App Store Server Notification V2 request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppleNotificationBody {
    pub signed_payload: String,
}

/// Decoded `signedPayload` (responseBodyV2DecodedPayload).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppleNotificationPayload {
    pub notification_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default, rename = "notificationUUID")]
    pub notification_uuid: Option<String>,
    #[serde(default)]
    pub data: Option<AppleNotificationData>,
}

impl AppleNotificationPayload {
    /// Notification types after which the purchase must no longer grant
    /// anything.
    pub fn is_revocation(&self) -> bool {
        matches!(
            self.notification_type.as_str(),
            "REFUND" | "REVOKE" | "EXPIRED" | "GRACE_PERIOD_EXPIRED"
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppleNotificationData {
    #[serde(default)]
    pub bundle_id: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub signed_transaction_info: Option<String>,
    #[serde(default)]
    pub signed_renewal_info: Option<String>,
}

/// App Store Server API "Get Transaction Info" response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfoResponse {
    #[serde(default)]
    pub signed_transaction_info: String,
}

/// A transaction fetched from Apple and verified against the JWKS.
#[derive(Debug, Clone)]
pub struct VerifiedTransaction {
    pub transaction: AppleTransaction,
    pub signed_transaction_info: String,
}
