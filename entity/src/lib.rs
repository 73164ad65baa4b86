pub mod prelude;

pub mod purchase_receipts;
