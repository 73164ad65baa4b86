use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    error::{IapError, IapResult},
    models::{common::Vendor, purchase::VerifiedPurchase, target::EntitlementTarget},
    ports::{BusinessService, SeatState, SubscriptionRepository, TopService},
};

/// Turns an entitlement target into commands on the host's stores.
pub struct EntitlementApplier {
    subscriptions: Arc<dyn SubscriptionRepository>,
    tops: Arc<dyn TopService>,
    business: Arc<dyn BusinessService>,
}

impl EntitlementApplier {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        tops: Arc<dyn TopService>,
        business: Arc<dyn BusinessService>,
    ) -> Self {
        Self {
            subscriptions,
            tops,
            business,
        }
    }

    pub async fn apply(
        &self,
        user_id: i64,
        target: &EntitlementTarget,
        purchase: &VerifiedPurchase,
    ) -> IapResult<()> {
        let result = match target {
            EntitlementTarget::Responses { quantity } => {
                self.subscriptions
                    .add_responses_balance(user_id, *quantity)
                    .await
            }
            EntitlementTarget::Subscription { plan, months } => {
                self.subscriptions
                    .extend_subscription(user_id, plan, *months)
                    .await
            }
            EntitlementTarget::Top {
                listing_type,
                listing_id,
                duration_days,
            } => {
                self.tops
                    .activate_top(listing_type, *listing_id, *duration_days)
                    .await
            }
            EntitlementTarget::Business { seats } => {
                self.business
                    .purchase_seats(
                        user_id,
                        *seats,
                        purchase.vendor,
                        &purchase.transaction_id,
                        SeatState::Active,
                    )
                    .await
            }
        };

        result.map_err(IapError::ApplyFailed)?;

        info!(
            user_id = %user_id,
            kind = target.kind(),
            transaction_id = %purchase.transaction_id,
            "Applied entitlement"
        );
        Ok(())
    }

    /// Withdraw what a purchase granted. Consumed grants (responses, boosts
    /// already running) stay as they are.
    ///
    /// `transaction_id` is the key the grant was applied under; seat pools
    /// are looked up by it.
    pub async fn revoke(
        &self,
        user_id: i64,
        target: &EntitlementTarget,
        vendor: Vendor,
        transaction_id: &str,
    ) -> IapResult<()> {
        match target {
            EntitlementTarget::Subscription { .. } => self
                .subscriptions
                .force_expire_subscription(user_id)
                .await
                .map_err(IapError::ApplyFailed)?,
            EntitlementTarget::Business { seats } => self
                .business
                .purchase_seats(user_id, *seats, vendor, transaction_id, SeatState::Revoked)
                .await
                .map_err(IapError::ApplyFailed)?,
            EntitlementTarget::Responses { .. } | EntitlementTarget::Top { .. } => {
                warn!(
                    user_id = %user_id,
                    kind = target.kind(),
                    transaction_id = %transaction_id,
                    "Revocation of a consumable grant, nothing to withdraw"
                );
                return Ok(());
            }
        }

        info!(
            user_id = %user_id,
            kind = target.kind(),
            transaction_id = %transaction_id,
            "Revoked entitlement"
        );
        Ok(())
    }
}
