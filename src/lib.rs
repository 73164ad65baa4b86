//! In-app purchase verification and entitlement reconciliation for Apple
//! and Google stores.
//!
//! The host supplies a [`Config`] and its entitlement stores
//! ([`app_state::Collaborators`]), then either calls
//! [`services::purchase_processor::PurchaseProcessor`] and
//! [`services::notification_ingestor::NotificationIngestor`] directly or
//! mounts [`routes::create_router`].

pub mod app_state;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod models;
pub mod ports;
pub mod routes;
pub mod services;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use app_state::{AppState, Collaborators};
pub use config::Config;
pub use error::{ApiError, IapError, IapResult, Result};
