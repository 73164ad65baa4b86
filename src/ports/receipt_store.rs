use async_trait::async_trait;

use crate::{
    error::IapResult,
    models::{
        common::Vendor,
        purchase::{PurchaseReceipt, StoredTarget},
    },
};

/// Result of attempting to persist a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    Inserted,
    /// A receipt with the same `(vendor, transaction_id)` already exists.
    AlreadyExists,
}

/// Idempotency and ownership ledger for verified purchases.
///
/// Implementations must enforce uniqueness of `(vendor, transaction_id)` and
/// report a lost insert race as [`SaveResult::AlreadyExists`], never as an
/// error: that is what keeps a client retry racing a webhook from applying
/// an entitlement twice.
///
/// "Token" lookups match either the transaction id or the original
/// transaction id (Apple renewal anchor, Google purchase token).
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    async fn get_owner_by_token(&self, vendor: Vendor, token: &str) -> IapResult<Option<i64>>;

    async fn is_processed(&self, vendor: Vendor, transaction_id: &str) -> IapResult<bool>;

    async fn save(&self, receipt: &PurchaseReceipt) -> IapResult<SaveResult>;

    /// Compensation for a failed apply; deleting a missing row is not an error.
    async fn delete_by_token(&self, vendor: Vendor, transaction_id: &str) -> IapResult<()>;

    /// Earliest receipt of a renewal chain.
    async fn find_by_original_transaction_id(
        &self,
        vendor: Vendor,
        original_transaction_id: &str,
    ) -> IapResult<Option<PurchaseReceipt>>;

    async fn find_target_by_token(
        &self,
        vendor: Vendor,
        token: &str,
    ) -> IapResult<Option<StoredTarget>>;
}
