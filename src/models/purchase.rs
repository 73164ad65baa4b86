use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    common::{CanonicalPurchaseState, PurchaseKind, Vendor},
    target::EntitlementTarget,
};

/// Input to a vendor verifier.
#[derive(Debug, Clone)]
pub struct VerificationRequest {
    /// Absent when only a token is known (Google webhook path)
    pub product_id: Option<String>,
    /// Apple transaction id or Google purchase token
    pub token: String,
    pub kind: PurchaseKind,
}

/// A purchase the vendor has vouched for, normalized across vendors.
#[derive(Debug, Clone)]
pub struct VerifiedPurchase {
    pub vendor: Vendor,
    /// Idempotency key: Apple transaction id, Google token or order id
    pub transaction_id: String,
    /// Stable anchor: Apple original transaction id, Google purchase token
    pub original_transaction_id: String,
    pub purchase_token: String,
    pub product_id: String,
    pub kind: PurchaseKind,
    pub state: CanonicalPurchaseState,
    pub acknowledged: bool,
    pub expires_at: Option<OffsetDateTime>,
    /// Vendor payload exactly as received (signed JWS or API body)
    pub raw_payload: String,
}

/// Persisted proof that a purchase was applied to an account.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseReceipt {
    pub id: Uuid,
    pub vendor: Vendor,
    pub transaction_id: String,
    pub original_transaction_id: String,
    pub owner_user_id: i64,
    pub product_id: String,
    /// None on legacy rows written before targets were snapshotted
    pub target: Option<EntitlementTarget>,
    pub raw_payload: String,
    pub processed_at: OffsetDateTime,
}

impl PurchaseReceipt {
    pub fn for_purchase(
        owner_user_id: i64,
        purchase: &VerifiedPurchase,
        target: &EntitlementTarget,
        processed_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            vendor: purchase.vendor,
            transaction_id: purchase.transaction_id.clone(),
            original_transaction_id: purchase.original_transaction_id.clone(),
            owner_user_id,
            product_id: purchase.product_id.clone(),
            target: Some(target.clone()),
            raw_payload: purchase.raw_payload.clone(),
            processed_at,
        }
    }
}

/// Owner and target recorded for a purchase token.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTarget {
    pub owner_user_id: i64,
    pub product_id: String,
    pub target: Option<EntitlementTarget>,
}

impl From<PurchaseReceipt> for StoredTarget {
    fn from(receipt: PurchaseReceipt) -> Self {
        Self {
            owner_user_id: receipt.owner_user_id,
            product_id: receipt.product_id,
            target: receipt.target,
        }
    }
}
