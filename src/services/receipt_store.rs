use async_trait::async_trait;
use sea_orm::{
    sea_query::OnConflict, ActiveValue::Set, ColumnTrait, Condition, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder,
};
use std::sync::Mutex;
use tracing::debug;

use crate::{
    error::{IapError, IapResult},
    models::{
        common::Vendor,
        purchase::{PurchaseReceipt, StoredTarget},
        target::EntitlementTarget,
    },
    ports::{ReceiptStore, SaveResult},
};
use entity::purchase_receipts::{self, Column};

/// Receipt ledger in the `purchase_receipts` table.
#[derive(Clone)]
pub struct DbReceiptStore {
    db: DatabaseConnection,
}

impl DbReceiptStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn first_by_token(
        &self,
        vendor: Vendor,
        token: &str,
    ) -> IapResult<Option<purchase_receipts::Model>> {
        Ok(purchase_receipts::Entity::find()
            .filter(Column::Vendor.eq(vendor.as_str()))
            .filter(
                Condition::any()
                    .add(Column::TransactionId.eq(token))
                    .add(Column::OriginalTransactionId.eq(token)),
            )
            .order_by_asc(Column::ProcessedAt)
            .one(&self.db)
            .await?)
    }
}

fn to_active_model(receipt: &PurchaseReceipt) -> IapResult<purchase_receipts::ActiveModel> {
    let target = receipt
        .target
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| IapError::Internal(anyhow::anyhow!("Cannot serialize target: {}", e)))?;

    Ok(purchase_receipts::ActiveModel {
        id: Set(receipt.id),
        vendor: Set(receipt.vendor.as_str().to_string()),
        transaction_id: Set(receipt.transaction_id.clone()),
        original_transaction_id: Set(receipt.original_transaction_id.clone()),
        owner_user_id: Set(receipt.owner_user_id),
        product_id: Set(receipt.product_id.clone()),
        target_kind: Set(receipt.target.as_ref().map(|t| t.kind().to_string())),
        target: Set(target),
        raw_payload: Set(receipt.raw_payload.clone()),
        processed_at: Set(receipt.processed_at),
    })
}

fn from_model(model: purchase_receipts::Model) -> IapResult<PurchaseReceipt> {
    let vendor = Vendor::from_str(&model.vendor).ok_or_else(|| {
        IapError::Internal(anyhow::anyhow!(
            "Receipt {} has unknown vendor {:?}",
            model.id,
            model.vendor
        ))
    })?;

    let target = model
        .target
        .map(serde_json::from_value::<EntitlementTarget>)
        .transpose()
        .map_err(|e| {
            IapError::Internal(anyhow::anyhow!(
                "Receipt {} has an unreadable target: {}",
                model.id,
                e
            ))
        })?;

    Ok(PurchaseReceipt {
        id: model.id,
        vendor,
        transaction_id: model.transaction_id,
        original_transaction_id: model.original_transaction_id,
        owner_user_id: model.owner_user_id,
        product_id: model.product_id,
        target,
        raw_payload: model.raw_payload,
        processed_at: model.processed_at,
    })
}

#[async_trait]
impl ReceiptStore for DbReceiptStore {
    async fn get_owner_by_token(&self, vendor: Vendor, token: &str) -> IapResult<Option<i64>> {
        Ok(self
            .first_by_token(vendor, token)
            .await?
            .map(|model| model.owner_user_id))
    }

    async fn is_processed(&self, vendor: Vendor, transaction_id: &str) -> IapResult<bool> {
        let existing = purchase_receipts::Entity::find()
            .filter(Column::Vendor.eq(vendor.as_str()))
            .filter(Column::TransactionId.eq(transaction_id))
            .one(&self.db)
            .await?;
        Ok(existing.is_some())
    }

    async fn save(&self, receipt: &PurchaseReceipt) -> IapResult<SaveResult> {
        // Insert atomically; a concurrent writer for the same key makes this a no-op
        let inserted = purchase_receipts::Entity::insert(to_active_model(receipt)?)
            .on_conflict(
                OnConflict::columns([Column::Vendor, Column::TransactionId])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        if inserted == 0 {
            debug!(
                vendor = %receipt.vendor,
                transaction_id = %receipt.transaction_id,
                "Receipt already stored"
            );
            return Ok(SaveResult::AlreadyExists);
        }
        Ok(SaveResult::Inserted)
    }

    async fn delete_by_token(&self, vendor: Vendor, transaction_id: &str) -> IapResult<()> {
        purchase_receipts::Entity::delete_many()
            .filter(Column::Vendor.eq(vendor.as_str()))
            .filter(Column::TransactionId.eq(transaction_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn find_by_original_transaction_id(
        &self,
        vendor: Vendor,
        original_transaction_id: &str,
    ) -> IapResult<Option<PurchaseReceipt>> {
        purchase_receipts::Entity::find()
            .filter(Column::Vendor.eq(vendor.as_str()))
            .filter(Column::OriginalTransactionId.eq(original_transaction_id))
            .order_by_asc(Column::ProcessedAt)
            .one(&self.db)
            .await?
            .map(from_model)
            .transpose()
    }

    async fn find_target_by_token(
        &self,
        vendor: Vendor,
        token: &str,
    ) -> IapResult<Option<StoredTarget>> {
        self.first_by_token(vendor, token)
            .await?
            .map(|model| from_model(model).map(StoredTarget::from))
            .transpose()
    }
}

/// Process-local receipt ledger with the same uniqueness rule as the table.
/// For tests and single-process tooling.
#[derive(Default)]
pub struct InMemoryReceiptStore {
    receipts: Mutex<Vec<PurchaseReceipt>>,
}

impl InMemoryReceiptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<PurchaseReceipt> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PurchaseReceipt>> {
        self.receipts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Earliest receipt matching `predicate`, like `ORDER BY processed_at`.
    fn earliest(&self, predicate: impl Fn(&PurchaseReceipt) -> bool) -> Option<PurchaseReceipt> {
        self.lock()
            .iter()
            .filter(|r| predicate(r))
            .min_by_key(|r| r.processed_at)
            .cloned()
    }
}

#[async_trait]
impl ReceiptStore for InMemoryReceiptStore {
    async fn get_owner_by_token(&self, vendor: Vendor, token: &str) -> IapResult<Option<i64>> {
        Ok(self
            .earliest(|r| {
                r.vendor == vendor
                    && (r.transaction_id == token || r.original_transaction_id == token)
            })
            .map(|r| r.owner_user_id))
    }

    async fn is_processed(&self, vendor: Vendor, transaction_id: &str) -> IapResult<bool> {
        Ok(self
            .lock()
            .iter()
            .any(|r| r.vendor == vendor && r.transaction_id == transaction_id))
    }

    async fn save(&self, receipt: &PurchaseReceipt) -> IapResult<SaveResult> {
        let mut receipts = self.lock();
        if receipts
            .iter()
            .any(|r| r.vendor == receipt.vendor && r.transaction_id == receipt.transaction_id)
        {
            return Ok(SaveResult::AlreadyExists);
        }
        receipts.push(receipt.clone());
        Ok(SaveResult::Inserted)
    }

    async fn delete_by_token(&self, vendor: Vendor, transaction_id: &str) -> IapResult<()> {
        self.lock()
            .retain(|r| !(r.vendor == vendor && r.transaction_id == transaction_id));
        Ok(())
    }

    async fn find_by_original_transaction_id(
        &self,
        vendor: Vendor,
        original_transaction_id: &str,
    ) -> IapResult<Option<PurchaseReceipt>> {
        Ok(self.earliest(|r| {
            r.vendor == vendor && r.original_transaction_id == original_transaction_id
        }))
    }

    async fn find_target_by_token(
        &self,
        vendor: Vendor,
        token: &str,
    ) -> IapResult<Option<StoredTarget>> {
        Ok(self
            .earliest(|r| {
                r.vendor == vendor
                    && (r.transaction_id == token || r.original_transaction_id == token)
            })
            .map(StoredTarget::from))
    }
}
