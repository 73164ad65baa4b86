use axum::{extract::State, Json};
use tracing::instrument;
use validator::Validate;

use crate::{
    app_state::AppState,
    error::{ApiError, Result},
    middleware::UserIdentity,
    models::{
        common::SuccessResponse,
        iap::{IapVerifyData, IapVerifyRequest, IapVerifyResponse},
    },
};

/// POST /iap/verify
#[instrument(skip(state, request))]
pub async fn verify_iap(
    State(state): State<AppState>,
    identity: UserIdentity,
    Json(request): Json<IapVerifyRequest>,
) -> Result<Json<IapVerifyResponse>> {
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(format!("Validation error: {}", e)))?;

    let outcome = state
        .processor
        .verify_purchase(
            identity.user_id,
            request.vendor,
            &request.product_id,
            &request.token,
            request.target.as_ref(),
        )
        .await?;

    Ok(Json(SuccessResponse::new(IapVerifyData {
        already_processed: outcome.already_processed,
        product_id: outcome.product_id,
        entitlement: outcome.target,
    })))
}
