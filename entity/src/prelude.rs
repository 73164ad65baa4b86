pub use super::purchase_receipts::Entity as PurchaseReceipts;
