// Service modules
pub mod apple_jws;
pub mod apple_transaction_fetcher;
pub mod entitlement_applier;
pub mod google_play;
pub mod notification_ingestor;
pub mod purchase_processor;
pub mod receipt_store;
pub mod target_resolver;

pub use apple_jws::{AppleApiTokenIssuer, AppleSignatureVerifier, JwksCache};
pub use apple_transaction_fetcher::AppleTransactionFetcher;
pub use entitlement_applier::EntitlementApplier;
pub use google_play::GoogleReceiptVerifier;
pub use notification_ingestor::{IngestOutcome, NotificationIngestor};
pub use purchase_processor::{PurchaseProcessor, VerifyOutcome};
pub use receipt_store::{DbReceiptStore, InMemoryReceiptStore};
pub use target_resolver::EntitlementTargetResolver;
