use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Errors raised by the purchase verification and entitlement engine.
#[derive(Debug, thiserror::Error)]
pub enum IapError {
    /// Vendor rejected the purchase, or its response failed a cross-check.
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Invalid signature: {0}")]
    SignatureInvalid(String),

    #[error("Purchase token is already bound to another account")]
    OwnershipConflict,

    #[error("Unsupported product: {0}")]
    UnsupportedProduct(String),

    #[error("Invalid entitlement target: {0}")]
    InvalidTarget(String),

    #[error("Purchase is pending payment")]
    PurchasePending,

    /// The entitlement could not be applied; the receipt was rolled back.
    #[error("Failed to apply entitlement: {0}")]
    ApplyFailed(anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type IapResult<T> = std::result::Result<T, IapError>;

/// HTTP-facing error for the mounted router.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Invalid IAP receipt: {0}")]
    InvalidReceipt(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Purchase pending")]
    PurchasePending,

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl From<IapError> for ApiError {
    fn from(err: IapError) -> Self {
        match err {
            IapError::VerificationFailed(msg) | IapError::SignatureInvalid(msg) => {
                ApiError::InvalidReceipt(msg)
            }
            IapError::OwnershipConflict => ApiError::Conflict(err.to_string()),
            IapError::UnsupportedProduct(_)
            | IapError::InvalidTarget(_)
            | IapError::InvalidPayload(_) => ApiError::BadRequest(err.to_string()),
            IapError::PurchasePending => ApiError::PurchasePending,
            IapError::Database(e) => ApiError::Database(e),
            IapError::ApplyFailed(e) => ApiError::Internal(e.context("entitlement apply failed")),
            IapError::Config(msg) => ApiError::Internal(anyhow::anyhow!(msg)),
            IapError::Internal(e) => ApiError::Internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "An internal database error occurred".to_string(),
                )
            }
            ApiError::InvalidReceipt(ref msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_RECEIPT",
                msg.clone(),
            ),
            ApiError::BadRequest(ref msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Unauthorized(ref msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
            }
            ApiError::Conflict(ref msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            ApiError::PurchasePending => (
                StatusCode::CONFLICT,
                "PURCHASE_PENDING",
                "Purchase is awaiting payment, retry once it completes".to_string(),
            ),
            ApiError::Internal(ref e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "success": false,
            "error": {
                "code": error_code,
                "message": message,
            }
        });

        (status, Json(body)).into_response()
    }
}

// Helper type for results
pub type Result<T> = std::result::Result<T, ApiError>;
