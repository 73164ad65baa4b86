use serde::{Deserialize, Serialize};
use validator::Validate;

use super::common::PurchaseKind;

/// What a verified purchase grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntitlementTarget {
    Responses {
        quantity: u32,
    },
    Subscription {
        plan: String,
        months: u32,
    },
    Top {
        listing_type: String,
        listing_id: i64,
        duration_days: u32,
    },
    Business {
        seats: u32,
    },
}

impl EntitlementTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Responses { .. } => "responses",
            Self::Subscription { .. } => "subscription",
            Self::Top { .. } => "top",
            Self::Business { .. } => "business",
        }
    }

    pub fn purchase_kind(&self) -> PurchaseKind {
        match self {
            Self::Subscription { .. } => PurchaseKind::Subscription,
            _ => PurchaseKind::OneTime,
        }
    }
}

/// Listing binding sent by the client alongside a boost purchase.
///
/// Only ever used to fill in the Top binding; it never selects the kind of
/// entitlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ClientTarget {
    #[serde(alias = "listingType")]
    #[validate(length(min = 1, max = 64))]
    pub listing_type: String,
    #[serde(rename = "id", alias = "listing_id", alias = "listingId")]
    pub listing_id: i64,
    #[serde(default, alias = "durationDays")]
    pub duration_days: Option<u32>,
}
