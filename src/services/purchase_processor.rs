use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::{entitlement_applier::EntitlementApplier, target_resolver::EntitlementTargetResolver};
use crate::{
    clock::Clock,
    error::{IapError, IapResult},
    models::{
        common::{CanonicalPurchaseState, PurchaseKind, Vendor},
        purchase::{PurchaseReceipt, VerificationRequest, VerifiedPurchase},
        target::{ClientTarget, EntitlementTarget},
    },
    ports::{PurchaseVerifier, ReceiptStore, SaveResult},
};

#[derive(Debug, Clone, PartialEq)]
pub struct VerifyOutcome {
    pub already_processed: bool,
    pub product_id: String,
    pub target: EntitlementTarget,
}

/// Sequences ownership, idempotency, persistence, application and vendor
/// acknowledgement for one purchase.
///
/// The receipt is written before the entitlement is applied and removed
/// again if applying fails, so a receipt row always means "applied or being
/// applied" and a failed attempt can be retried in full.
pub struct PurchaseProcessor {
    receipts: Arc<dyn ReceiptStore>,
    resolver: Arc<EntitlementTargetResolver>,
    applier: Arc<EntitlementApplier>,
    apple: Arc<dyn PurchaseVerifier>,
    google: Arc<dyn PurchaseVerifier>,
    clock: Arc<dyn Clock>,
}

impl PurchaseProcessor {
    pub fn new(
        receipts: Arc<dyn ReceiptStore>,
        resolver: Arc<EntitlementTargetResolver>,
        applier: Arc<EntitlementApplier>,
        apple: Arc<dyn PurchaseVerifier>,
        google: Arc<dyn PurchaseVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            receipts,
            resolver,
            applier,
            apple,
            google,
            clock,
        }
    }

    pub fn verifier(&self, vendor: Vendor) -> &Arc<dyn PurchaseVerifier> {
        match vendor {
            Vendor::Apple => &self.apple,
            Vendor::Google => &self.google,
        }
    }

    /// Client-initiated verification. The target is resolved before any
    /// vendor call so a bad SKU or listing binding costs nothing.
    #[instrument(skip(self, token, client_target), fields(vendor = %vendor))]
    pub async fn verify_purchase(
        &self,
        user_id: i64,
        vendor: Vendor,
        product_id: &str,
        token: &str,
        client_target: Option<&ClientTarget>,
    ) -> IapResult<VerifyOutcome> {
        let target = self.resolver.resolve(product_id, client_target)?;

        let request = VerificationRequest {
            product_id: Some(product_id.to_string()),
            token: token.to_string(),
            kind: target.purchase_kind(),
        };
        let purchase = self.verifier(vendor).verify(&request).await?;
        self.ensure_active(&purchase)?;

        if purchase.product_id != product_id {
            return Err(IapError::VerificationFailed(format!(
                "Product mismatch: requested {}, vendor reports {}",
                product_id, purchase.product_id
            )));
        }

        let already_processed = self.settle(user_id, &purchase, &target).await?;

        Ok(VerifyOutcome {
            already_processed,
            product_id: purchase.product_id,
            target,
        })
    }

    /// Gate on the vendor-reported state. A subscription whose current
    /// period already ended is not active even when the vendor still calls
    /// the transaction purchased.
    pub fn ensure_active(&self, purchase: &VerifiedPurchase) -> IapResult<()> {
        match purchase.state {
            CanonicalPurchaseState::Purchased => {}
            CanonicalPurchaseState::Pending => return Err(IapError::PurchasePending),
            state => {
                return Err(IapError::VerificationFailed(format!(
                    "Purchase is not active ({:?})",
                    state
                )))
            }
        }

        if purchase.kind == PurchaseKind::Subscription {
            if let Some(expires_at) = purchase.expires_at {
                if expires_at <= self.clock.now_utc() {
                    return Err(IapError::VerificationFailed(format!(
                        "Subscription period ended at {}",
                        expires_at
                    )));
                }
            }
        }
        Ok(())
    }

    /// Bind a verified purchase to `user_id` and apply `target` at most once.
    ///
    /// Returns `true` when the purchase had already been applied.
    #[instrument(
        skip(self, purchase, target),
        fields(
            vendor = %purchase.vendor,
            transaction_id = %purchase.transaction_id,
            kind = target.kind()
        )
    )]
    pub async fn settle(
        &self,
        user_id: i64,
        purchase: &VerifiedPurchase,
        target: &EntitlementTarget,
    ) -> IapResult<bool> {
        let vendor = purchase.vendor;

        self.check_ownership(user_id, purchase).await?;

        if self
            .receipts
            .is_processed(vendor, &purchase.transaction_id)
            .await?
        {
            info!(user_id = %user_id, "Purchase already processed");
            self.acknowledge_if_needed(purchase).await;
            return Ok(true);
        }

        let receipt = PurchaseReceipt::for_purchase(user_id, purchase, target, self.clock.now_utc());
        if self.receipts.save(&receipt).await? == SaveResult::AlreadyExists {
            // Lost the insert race to a concurrent request for the same purchase
            info!(user_id = %user_id, "Receipt written concurrently, skipping apply");
            return Ok(true);
        }

        if let Err(apply_err) = self.applier.apply(user_id, target, purchase).await {
            error!(user_id = %user_id, error = %apply_err, "Entitlement apply failed, rolling back receipt");
            if let Err(delete_err) = self
                .receipts
                .delete_by_token(vendor, &purchase.transaction_id)
                .await
            {
                error!(
                    user_id = %user_id,
                    error = %delete_err,
                    "Failed to roll back receipt; purchase will read as processed"
                );
            }
            return Err(apply_err);
        }

        self.acknowledge_if_needed(purchase).await;

        info!(user_id = %user_id, product_id = %purchase.product_id, "Purchase settled");
        Ok(false)
    }

    /// Withdraw `target` from `user_id`; see [`EntitlementApplier::revoke`].
    pub async fn revoke(
        &self,
        user_id: i64,
        target: &EntitlementTarget,
        vendor: Vendor,
        transaction_id: &str,
    ) -> IapResult<()> {
        self.applier
            .revoke(user_id, target, vendor, transaction_id)
            .await
    }

    /// The anchor binds a renewal chain (or a Google token) to one account;
    /// the transaction id covers rows that predate the anchor.
    async fn check_ownership(&self, user_id: i64, purchase: &VerifiedPurchase) -> IapResult<()> {
        let mut keys = vec![purchase.original_transaction_id.as_str()];
        if purchase.transaction_id != purchase.original_transaction_id {
            keys.push(purchase.transaction_id.as_str());
        }

        for key in keys {
            if let Some(owner) = self.receipts.get_owner_by_token(purchase.vendor, key).await? {
                if owner != user_id {
                    warn!(
                        user_id = %user_id,
                        owner_user_id = %owner,
                        "Purchase token replayed from another account"
                    );
                    return Err(IapError::OwnershipConflict);
                }
            }
        }
        Ok(())
    }

    /// Best-effort; also retried for already-processed purchases the vendor
    /// still reports as unacknowledged.
    async fn acknowledge_if_needed(&self, purchase: &VerifiedPurchase) {
        if purchase.acknowledged {
            return;
        }
        if let Err(e) = self.verifier(purchase.vendor).acknowledge(purchase).await {
            warn!(
                vendor = %purchase.vendor,
                transaction_id = %purchase.transaction_id,
                error = %e,
                "Vendor acknowledgement failed"
            );
        }
    }
}
