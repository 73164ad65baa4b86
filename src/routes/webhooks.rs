use axum::{body::Bytes, extract::State, Json};
use serde::Serialize;
use tracing::{instrument, warn};

use crate::{
    app_state::AppState,
    error::{ApiError, IapError, Result},
    models::common::SuccessResponse,
    services::notification_ingestor::IngestOutcome,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub already_processed: Option<bool>,
}

impl From<IngestOutcome> for WebhookAck {
    fn from(outcome: IngestOutcome) -> Self {
        match outcome {
            IngestOutcome::Applied { already_processed } => Self {
                outcome: "applied",
                already_processed: Some(already_processed),
            },
            IngestOutcome::Revoked => Self {
                outcome: "revoked",
                already_processed: None,
            },
            IngestOutcome::Ignored(_) => Self {
                outcome: "ignored",
                already_processed: None,
            },
        }
    }
}

/// POST /webhooks/apple and /webhooks/google
///
/// Both vendors redeliver on any non-2xx answer, so only deliveries that
/// were fully handled (or deliberately ignored) get a 200.
#[instrument(skip(state, body))]
pub async fn receive_notification(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SuccessResponse<WebhookAck>>> {
    let outcome = state.ingestor.ingest(&body).await.map_err(|e| match e {
        IapError::InvalidPayload(msg) | IapError::SignatureInvalid(msg) => {
            warn!(error = %msg, "Rejected webhook delivery");
            ApiError::BadRequest(msg)
        }
        other => ApiError::from(other),
    })?;

    Ok(Json(SuccessResponse::new(WebhookAck::from(outcome))))
}
