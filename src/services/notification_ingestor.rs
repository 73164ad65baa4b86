use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::{
    apple_jws::AppleSignatureVerifier, purchase_processor::PurchaseProcessor,
    target_resolver::EntitlementTargetResolver,
};
use crate::{
    error::{IapError, IapResult},
    models::{
        apple::{AppleNotificationPayload, AppleRenewalInfo, AppleTransaction},
        common::{CanonicalPurchaseState, Vendor},
        google::{OneTimeProductNotification, SubscriptionNotification, VoidedPurchaseNotification},
        notification::WebhookNotification,
        purchase::VerificationRequest,
        target::EntitlementTarget,
    },
    ports::ReceiptStore,
};

/// What a webhook delivery led to. Every variant is a successful delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Applied { already_processed: bool },
    Revoked,
    Ignored(String),
}

/// Reconciles vendor server notifications with stored purchases.
pub struct NotificationIngestor {
    processor: Arc<PurchaseProcessor>,
    receipts: Arc<dyn ReceiptStore>,
    resolver: Arc<EntitlementTargetResolver>,
    apple_signatures: Arc<AppleSignatureVerifier>,
    apple_bundle_id: Option<String>,
    google_revoke_types: Vec<i32>,
}

impl NotificationIngestor {
    pub fn new(
        processor: Arc<PurchaseProcessor>,
        receipts: Arc<dyn ReceiptStore>,
        resolver: Arc<EntitlementTargetResolver>,
        apple_signatures: Arc<AppleSignatureVerifier>,
        apple_bundle_id: Option<String>,
        google_revoke_types: Vec<i32>,
    ) -> Self {
        Self {
            processor,
            receipts,
            resolver,
            apple_signatures,
            apple_bundle_id,
            google_revoke_types,
        }
    }

    /// Handle one raw webhook body from either vendor.
    ///
    /// Only undecodable bodies and bad signatures are errors; anything that
    /// parses but concerns no known purchase is `Ignored`.
    #[instrument(skip(self, raw), fields(bytes = raw.len()))]
    pub async fn ingest(&self, raw: &[u8]) -> IapResult<IngestOutcome> {
        let outcome = match WebhookNotification::decode(raw)? {
            WebhookNotification::AppleNotification { signed_payload } => {
                self.ingest_apple(&signed_payload).await?
            }
            WebhookNotification::GoogleSubscriptionRtdn(notification) => {
                self.ingest_google_subscription(notification).await?
            }
            WebhookNotification::GoogleOneTimeRtdn(notification) => {
                self.ingest_google_one_time(notification).await?
            }
            WebhookNotification::GoogleVoidedPurchase(notification) => {
                self.ingest_google_voided(notification).await?
            }
            WebhookNotification::Unrecognized => {
                IngestOutcome::Ignored("unrecognized notification".to_string())
            }
        };

        if let IngestOutcome::Ignored(reason) = &outcome {
            debug!(reason = %reason, "Notification ignored");
        }
        Ok(outcome)
    }

    async fn ingest_apple(&self, signed_payload: &str) -> IapResult<IngestOutcome> {
        let payload: AppleNotificationPayload =
            self.apple_signatures.verify_jws(signed_payload).await?;

        info!(
            notification_type = %payload.notification_type,
            subtype = ?payload.subtype,
            notification_uuid = ?payload.notification_uuid,
            "Apple notification"
        );

        let Some(data) = payload.data.as_ref() else {
            return Ok(ignored("Apple notification without data"));
        };

        if let (Some(expected), Some(actual)) = (&self.apple_bundle_id, &data.bundle_id) {
            if expected != actual {
                warn!(bundle_id = %actual, "Apple notification for another bundle");
                return Ok(ignored("foreign bundle"));
            }
        }

        let Some(signed_transaction) = data.signed_transaction_info.clone() else {
            return Ok(ignored("Apple notification without transaction"));
        };
        let transaction: AppleTransaction =
            self.apple_signatures.verify_jws(&signed_transaction).await?;

        if let Some(signed_renewal) = &data.signed_renewal_info {
            let renewal: AppleRenewalInfo = self.apple_signatures.verify_jws(signed_renewal).await?;
            debug!(
                auto_renew_product_id = ?renewal.auto_renew_product_id,
                auto_renew_status = ?renewal.auto_renew_status,
                "Apple renewal info"
            );
        }

        // Renewals carry new transaction ids; the chain is found by its anchor
        let Some(anchor) = self
            .receipts
            .find_by_original_transaction_id(Vendor::Apple, &transaction.original_transaction_id)
            .await?
        else {
            return Ok(ignored("unknown original transaction"));
        };

        let target = if transaction.product_id == anchor.product_id {
            match anchor.target.clone() {
                Some(target) => target,
                None => match self.catalog_target(&transaction.product_id) {
                    Ok(target) => target,
                    Err(outcome) => return Ok(outcome),
                },
            }
        } else {
            // Upgrade or crossgrade inside the chain
            match self.catalog_target(&transaction.product_id) {
                Ok(target) => target,
                Err(outcome) => return Ok(outcome),
            }
        };

        let purchase = transaction.into_verified(signed_transaction);

        if payload.is_revocation() || purchase.state == CanonicalPurchaseState::Revoked {
            self.processor
                .revoke(
                    anchor.owner_user_id,
                    &target,
                    Vendor::Apple,
                    &purchase.transaction_id,
                )
                .await?;
            return Ok(IngestOutcome::Revoked);
        }

        if let Err(e) = self.processor.ensure_active(&purchase) {
            return Ok(ignored(&e.to_string()));
        }

        let already_processed = self
            .processor
            .settle(anchor.owner_user_id, &purchase, &target)
            .await?;
        Ok(IngestOutcome::Applied { already_processed })
    }

    async fn ingest_google_subscription(
        &self,
        notification: SubscriptionNotification,
    ) -> IapResult<IngestOutcome> {
        let revoke = self
            .google_revoke_types
            .contains(&notification.notification_type);
        info!(
            notification_type = notification.notification_type,
            subscription_id = %notification.subscription_id,
            revoke,
            "Google subscription notification"
        );

        self.reconcile_google(
            &notification.purchase_token,
            Some(&notification.subscription_id),
            revoke,
        )
        .await
    }

    async fn ingest_google_one_time(
        &self,
        notification: OneTimeProductNotification,
    ) -> IapResult<IngestOutcome> {
        info!(
            notification_type = notification.notification_type,
            sku = %notification.sku,
            "Google one-time product notification"
        );

        match notification.notification_type {
            OneTimeProductNotification::PURCHASED => {
                self.reconcile_google(&notification.purchase_token, Some(&notification.sku), false)
                    .await
            }
            // A pending purchase that never completed granted nothing
            OneTimeProductNotification::CANCELED => Ok(ignored("pending purchase canceled")),
            _ => Ok(ignored("unhandled one-time notification type")),
        }
    }

    async fn ingest_google_voided(
        &self,
        notification: VoidedPurchaseNotification,
    ) -> IapResult<IngestOutcome> {
        info!(
            order_id = ?notification.order_id,
            product_type = ?notification.product_type,
            "Google voided purchase"
        );
        self.reconcile_google(&notification.purchase_token, None, true)
            .await
    }

    async fn reconcile_google(
        &self,
        token: &str,
        product_hint: Option<&str>,
        revoke: bool,
    ) -> IapResult<IngestOutcome> {
        let Some(stored) = self
            .receipts
            .find_target_by_token(Vendor::Google, token)
            .await?
        else {
            return Ok(ignored("unknown purchase token"));
        };

        let product_id = product_hint.unwrap_or(&stored.product_id);
        let target = match stored.target {
            Some(target) if stored.product_id == product_id => target,
            _ => match self.catalog_target(product_id) {
                Ok(target) => target,
                Err(outcome) => return Ok(outcome),
            },
        };

        if revoke {
            self.processor
                .revoke(stored.owner_user_id, &target, Vendor::Google, token)
                .await?;
            return Ok(IngestOutcome::Revoked);
        }

        let request = VerificationRequest {
            product_id: Some(product_id.to_string()),
            token: token.to_string(),
            kind: target.purchase_kind(),
        };
        // Google no longer vouching for a token (404/410, foreign package)
        // will not change on redelivery; storage and transport errors might.
        let purchase = match self
            .processor
            .verifier(Vendor::Google)
            .verify(&request)
            .await
        {
            Ok(purchase) => purchase,
            Err(IapError::VerificationFailed(reason)) => {
                warn!(reason = %reason, "Google rejected re-verification of notified token");
                return Ok(ignored(&reason));
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self.processor.ensure_active(&purchase) {
            return Ok(ignored(&e.to_string()));
        }

        let already_processed = self
            .processor
            .settle(stored.owner_user_id, &purchase, &target)
            .await?;
        Ok(IngestOutcome::Applied { already_processed })
    }

    /// Catalog fallback. A SKU the catalog cannot map is not worth a vendor
    /// retry, so it ends the delivery as ignored.
    fn catalog_target(&self, product_id: &str) -> Result<EntitlementTarget, IngestOutcome> {
        self.resolver.resolve_catalog(product_id).map_err(|e| {
            warn!(product_id = %product_id, error = %e, "No catalog target for notification");
            ignored(&e.to_string())
        })
    }
}

fn ignored(reason: &str) -> IngestOutcome {
    IngestOutcome::Ignored(reason.to_string())
}
