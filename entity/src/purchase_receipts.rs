use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One verified vendor purchase that has been (or is being) applied.
///
/// `(vendor, transaction_id)` is unique; the row's existence is the
/// idempotency proof for that purchase.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "purchase_receipts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub vendor: String,
    pub transaction_id: String,
    pub original_transaction_id: String,
    pub owner_user_id: i64,
    pub product_id: String,
    /// Empty on rows written before target snapshots were stored.
    pub target_kind: Option<String>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub target: Option<Json>,
    #[sea_orm(column_type = "Text")]
    pub raw_payload: String,
    pub processed_at: TimeDateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
