use crate::{
    clock::{Clock, SystemClock},
    config::Config,
    ports::{BusinessService, ReceiptStore, SubscriptionRepository, TopService},
    services::{
        apple_jws::{AppleApiTokenIssuer, AppleSignatureVerifier, HttpJwksSource, JwksCache},
        apple_transaction_fetcher::AppleTransactionFetcher,
        entitlement_applier::EntitlementApplier,
        google_play::{GoogleReceiptVerifier, ServiceAccountKey},
        notification_ingestor::NotificationIngestor,
        purchase_processor::PurchaseProcessor,
        receipt_store::DbReceiptStore,
        target_resolver::EntitlementTargetResolver,
    },
};
use std::{sync::Arc, time::Duration};

/// Entitlement stores owned by the host application.
#[derive(Clone)]
pub struct Collaborators {
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub tops: Arc<dyn TopService>,
    pub business: Arc<dyn BusinessService>,
}

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<PurchaseProcessor>,
    pub ingestor: Arc<NotificationIngestor>,
    pub config: Arc<Config>,
}

impl AppState {
    pub async fn new(config: Config, collaborators: Collaborators) -> Result<Self, anyhow::Error> {
        // Connect to database
        let db = sea_orm::Database::connect(&config.database.url).await?;
        let receipts: Arc<dyn ReceiptStore> = Arc::new(DbReceiptStore::new(db));

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.http.request_timeout_ms))
            .build()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        // Apple: JWKS-backed JWS verification plus the App Store Server API
        let jwks = Arc::new(JwksCache::new(
            Arc::new(HttpJwksSource::new(
                http_client.clone(),
                config.apple.jwks_url.clone(),
            )),
            clock.clone(),
        ));
        let apple_signatures = Arc::new(AppleSignatureVerifier::new(jwks));
        let apple_tokens = Arc::new(AppleApiTokenIssuer::from_config(
            &config.apple,
            clock.clone(),
        )?);
        let apple = Arc::new(AppleTransactionFetcher::new(
            &config.apple,
            http_client.clone(),
            apple_tokens,
            apple_signatures.clone(),
        ));

        // Google: service-account authenticated Android Publisher API
        let service_account = ServiceAccountKey::from_file(&config.google.service_account_key_path)?;
        let google = Arc::new(GoogleReceiptVerifier::new(
            &config.google,
            service_account,
            http_client,
            clock.clone(),
        )?);

        let resolver = Arc::new(EntitlementTargetResolver::new(config.catalog.clone()));
        let applier = Arc::new(EntitlementApplier::new(
            collaborators.subscriptions,
            collaborators.tops,
            collaborators.business,
        ));
        let processor = Arc::new(PurchaseProcessor::new(
            receipts.clone(),
            resolver.clone(),
            applier,
            apple,
            google,
            clock,
        ));
        let ingestor = Arc::new(NotificationIngestor::new(
            processor.clone(),
            receipts,
            resolver,
            apple_signatures,
            config.apple.bundle_id.clone(),
            config.google.revoke_notification_types.clone(),
        ));

        tracing::info!(
            products = config.catalog.products.len(),
            package_name = %config.google.package_name,
            "Initialized IAP engine"
        );

        Ok(Self::from_parts(processor, ingestor, config))
    }

    /// Assemble state from already-built components.
    pub fn from_parts(
        processor: Arc<PurchaseProcessor>,
        ingestor: Arc<NotificationIngestor>,
        config: Config,
    ) -> Self {
        Self {
            processor,
            ingestor,
            config: Arc::new(config),
        }
    }
}
