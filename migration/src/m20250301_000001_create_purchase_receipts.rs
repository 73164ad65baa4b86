use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PurchaseReceipts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PurchaseReceipts::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PurchaseReceipts::Vendor).string_len(16).not_null())
                    .col(
                        ColumnDef::new(PurchaseReceipts::TransactionId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PurchaseReceipts::OriginalTransactionId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PurchaseReceipts::OwnerUserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PurchaseReceipts::ProductId).string().not_null())
                    .col(ColumnDef::new(PurchaseReceipts::TargetKind).string_len(32).null())
                    .col(ColumnDef::new(PurchaseReceipts::Target).json_binary().null())
                    .col(ColumnDef::new(PurchaseReceipts::RawPayload).text().not_null())
                    .col(
                        ColumnDef::new(PurchaseReceipts::ProcessedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // The idempotency guarantee under concurrent client/webhook races
        // depends on this constraint.
        manager
            .create_index(
                Index::create()
                    .name("idx_purchase_receipts_vendor_transaction")
                    .table(PurchaseReceipts::Table)
                    .col(PurchaseReceipts::Vendor)
                    .col(PurchaseReceipts::TransactionId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_purchase_receipts_vendor_original")
                    .table(PurchaseReceipts::Table)
                    .col(PurchaseReceipts::Vendor)
                    .col(PurchaseReceipts::OriginalTransactionId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PurchaseReceipts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PurchaseReceipts {
    Table,
    Id,
    Vendor,
    TransactionId,
    OriginalTransactionId,
    OwnerUserId,
    ProductId,
    TargetKind,
    Target,
    RawPayload,
    ProcessedAt,
}
