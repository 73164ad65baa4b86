use serde::Deserialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use super::{
    common::{CanonicalPurchaseState, PurchaseKind, Vendor},
    purchase::VerifiedPurchase,
};

/// `purchases.products.get` response (subset).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPurchase {
    /// 0 purchased, 1 canceled, 2 pending
    #[serde(default)]
    pub purchase_state: Option<i32>,
    /// 0 yet to be consumed, 1 consumed
    #[serde(default)]
    pub consumption_state: Option<i32>,
    /// 0 yet to be acknowledged, 1 acknowledged
    #[serde(default)]
    pub acknowledgement_state: Option<i32>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
}

/// `purchases.subscriptionsv2.get` response (subset).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPurchaseV2 {
    #[serde(default)]
    pub subscription_state: Option<String>,
    #[serde(default)]
    pub latest_order_id: Option<String>,
    #[serde(default)]
    pub acknowledgement_state: Option<String>,
    #[serde(default)]
    pub line_items: Vec<SubscriptionLineItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionLineItem {
    #[serde(default)]
    pub product_id: Option<String>,
    /// RFC 3339 timestamp
    #[serde(default)]
    pub expiry_time: Option<String>,
    #[serde(default)]
    pub latest_successful_order_id: Option<String>,
}

impl SubscriptionLineItem {
    fn expiry(&self) -> Option<OffsetDateTime> {
        self.expiry_time
            .as_deref()
            .and_then(|raw| OffsetDateTime::parse(raw, &Rfc3339).ok())
    }
}

pub const PURCHASE_STATE_ACTIVE: i32 = 0;
pub const PURCHASE_STATE_INACTIVE: i32 = 1;

const SUBSCRIPTION_STATE_PENDING: &str = "SUBSCRIPTION_STATE_PENDING";
const ACKNOWLEDGEMENT_STATE_ACKNOWLEDGED: &str = "ACKNOWLEDGEMENT_STATE_ACKNOWLEDGED";

/// One shape for both Google purchase APIs.
#[derive(Debug, Clone, PartialEq)]
pub struct GooglePurchaseState {
    pub product_id: String,
    pub order_id: Option<String>,
    pub purchase_token: String,
    /// 0 active, 1 inactive
    pub purchase_state: i32,
    /// Raw vendor status (subscription state or product purchase state)
    pub status: String,
    pub acknowledged: bool,
    pub expires_at: Option<OffsetDateTime>,
    pub kind: PurchaseKind,
}

impl GooglePurchaseState {
    pub fn from_product(purchase: &ProductPurchase, product_id: &str, token: &str) -> Self {
        let (purchase_state, status) = match purchase.purchase_state {
            Some(0) => (PURCHASE_STATE_ACTIVE, "PURCHASED"),
            Some(1) => (PURCHASE_STATE_INACTIVE, "CANCELED"),
            Some(2) => (PURCHASE_STATE_INACTIVE, "PENDING"),
            _ => (PURCHASE_STATE_INACTIVE, "UNKNOWN"),
        };

        Self {
            product_id: purchase
                .product_id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| product_id.to_string()),
            order_id: purchase.order_id.clone().filter(|id| !id.is_empty()),
            purchase_token: token.to_string(),
            purchase_state,
            status: status.to_string(),
            // A consumed purchase has been acknowledged implicitly
            acknowledged: purchase.consumption_state == Some(1),
            expires_at: None,
            kind: PurchaseKind::OneTime,
        }
    }

    /// Reduce subscription line items to a single state.
    ///
    /// Upgrades and downgrades show up as several line items, so the
    /// subscription is active iff ANY item expires after `now`.
    pub fn from_subscription(
        subscription: &SubscriptionPurchaseV2,
        requested_product_id: Option<&str>,
        token: &str,
        now: OffsetDateTime,
    ) -> Self {
        let items = &subscription.line_items;

        let expires_at = items.iter().filter_map(|item| item.expiry()).max();
        let active = items
            .iter()
            .filter_map(|item| item.expiry())
            .any(|expiry| expiry > now);

        let first_product = items
            .iter()
            .filter_map(|item| item.product_id.as_deref())
            .find(|id| !id.is_empty());
        let product_id = match requested_product_id {
            Some(requested)
                if first_product.is_none()
                    || items
                        .iter()
                        .any(|item| item.product_id.as_deref() == Some(requested)) =>
            {
                requested.to_string()
            }
            _ => first_product.unwrap_or_default().to_string(),
        };

        let order_id = subscription
            .latest_order_id
            .clone()
            .filter(|id| !id.is_empty())
            .or_else(|| {
                items
                    .iter()
                    .filter_map(|item| item.latest_successful_order_id.clone())
                    .find(|id| !id.is_empty())
            });

        Self {
            product_id,
            order_id,
            purchase_token: token.to_string(),
            purchase_state: if active {
                PURCHASE_STATE_ACTIVE
            } else {
                PURCHASE_STATE_INACTIVE
            },
            status: subscription.subscription_state.clone().unwrap_or_default(),
            acknowledged: subscription.acknowledgement_state.as_deref()
                == Some(ACKNOWLEDGEMENT_STATE_ACKNOWLEDGED),
            expires_at,
            kind: PurchaseKind::Subscription,
        }
    }

    pub fn is_active(&self) -> bool {
        self.purchase_state == PURCHASE_STATE_ACTIVE
    }

    pub fn canonical_state(&self) -> CanonicalPurchaseState {
        if self.is_active() {
            return CanonicalPurchaseState::Purchased;
        }
        match self.status.as_str() {
            "PENDING" | SUBSCRIPTION_STATE_PENDING => CanonicalPurchaseState::Pending,
            "UNKNOWN" => CanonicalPurchaseState::Unknown,
            _ => CanonicalPurchaseState::Revoked,
        }
    }

    /// Subscriptions keep one token across renewals, so each renewal is keyed
    /// by its order id; one-time products are keyed by the token itself.
    pub fn transaction_key(&self) -> String {
        match (self.kind, &self.order_id) {
            (PurchaseKind::Subscription, Some(order_id)) => order_id.clone(),
            _ => self.purchase_token.clone(),
        }
    }

    pub fn into_verified(self, raw_payload: String) -> VerifiedPurchase {
        VerifiedPurchase {
            vendor: Vendor::Google,
            transaction_id: self.transaction_key(),
            original_transaction_id: self.purchase_token.clone(),
            state: self.canonical_state(),
            purchase_token: self.purchase_token,
            product_id: self.product_id,
            kind: self.kind,
            acknowledged: self.acknowledged,
            expires_at: self.expires_at,
            raw_payload,
        }
    }
}

/// Pub/Sub push request wrapping an RTDN message.
#[derive(Debug, Clone, Deserialize)]
pub struct PubSubPush {
    pub message: PubSubMessage,
    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubSubMessage {
    /// Base64 of a `DeveloperNotification` JSON document
    pub data: String,
    #[serde(default)]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeveloperNotification {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub package_name: Option<String>,
    #[serde(default)]
    pub event_time_millis: Option<String>,
    #[serde(default)]
    pub subscription_notification: Option<SubscriptionNotification>,
    #[serde(default)]
    pub one_time_product_notification: Option<OneTimeProductNotification>,
    #[serde(default)]
    pub voided_purchase_notification: Option<VoidedPurchaseNotification>,
    #[serde(default)]
    pub test_notification: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionNotification {
    #[serde(default)]
    pub version: Option<String>,
    pub notification_type: i32,
    pub purchase_token: String,
    pub subscription_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTimeProductNotification {
    #[serde(default)]
    pub version: Option<String>,
    pub notification_type: i32,
    pub purchase_token: String,
    pub sku: String,
}

impl OneTimeProductNotification {
    pub const PURCHASED: i32 = 1;
    pub const CANCELED: i32 = 2;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoidedPurchaseNotification {
    pub purchase_token: String,
    #[serde(default)]
    pub order_id: Option<String>,
    /// 1 subscription, 2 one-time
    #[serde(default)]
    pub product_type: Option<i32>,
    #[serde(default)]
    pub refund_type: Option<i32>,
}
