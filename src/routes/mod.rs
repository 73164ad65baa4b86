// Route modules
pub mod iap;
pub mod webhooks;

use crate::{app_state::AppState, middleware::logging_middleware};
use axum::{http::StatusCode, middleware, routing::post, Router};
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;

/// Router the host mounts. `/iap/verify` expects the host's auth layer to
/// have put a `UserIdentity` in request extensions; the webhook routes are
/// public and authenticated by vendor signatures or re-verification.
pub fn create_router(state: AppState) -> Router {
    let timeout = Duration::from_millis(state.config.http.request_timeout_ms);

    Router::new()
        .route("/iap/verify", post(iap::verify_iap))
        .route("/webhooks/apple", post(webhooks::receive_notification))
        .route("/webhooks/google", post(webhooks::receive_notification))
        .layer(middleware::from_fn(logging_middleware))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
        .with_state(state)
}
