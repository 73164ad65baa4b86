//! Commands issued to the host's entitlement stores. Errors are the host's
//! own, carried as `anyhow::Error`.

use async_trait::async_trait;

use crate::models::common::Vendor;

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn add_responses_balance(&self, user_id: i64, quantity: u32) -> anyhow::Result<()>;

    async fn extend_subscription(&self, user_id: i64, plan: &str, months: u32)
        -> anyhow::Result<()>;

    async fn force_expire_subscription(&self, user_id: i64) -> anyhow::Result<()>;
}

#[async_trait]
pub trait TopService: Send + Sync {
    /// Promote a listing for `duration_days`; expiry is swept by the host.
    async fn activate_top(
        &self,
        listing_type: &str,
        listing_id: i64,
        duration_days: u32,
    ) -> anyhow::Result<()>;
}

/// Seat pool state reported alongside a seat purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatState {
    Active,
    Revoked,
}

#[async_trait]
pub trait BusinessService: Send + Sync {
    /// `provider_txn_id` identifies the purchase so the host can upsert.
    async fn purchase_seats(
        &self,
        user_id: i64,
        seats: u32,
        provider: Vendor,
        provider_txn_id: &str,
        state: SeatState,
    ) -> anyhow::Result<()>;
}
