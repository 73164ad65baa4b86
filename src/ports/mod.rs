//! Outbound contracts the engine drives. Everything behind these traits is
//! owned by the host: the receipt table, the entitlement stores, the vendor
//! APIs.

pub mod entitlements;
pub mod purchase_verifier;
pub mod receipt_store;

pub use entitlements::{BusinessService, SeatState, SubscriptionRepository, TopService};
pub use purchase_verifier::PurchaseVerifier;
pub use receipt_store::{ReceiptStore, SaveResult};
