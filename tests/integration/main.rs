// Integration tests

mod apple_fetcher_test;
mod receipt_store_test;
mod routes_test;
