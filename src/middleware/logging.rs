use axum::{
    body::{to_bytes, Body},
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;

/// Vendor webhook bodies are JWS documents or Pub/Sub envelopes of a few KB
const MAX_BODY_BYTES: usize = 256 * 1024;
const MAX_LOGGED_BODY: usize = 2000;

/// Logs every request with latency; response bodies are logged only for
/// failures, since success bodies carry nothing the logs need.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    tracing::info!(request_id = %request_id, method = %method, uri = %uri, "→ Request");

    let response = next.run(request).await;
    let status = response.status();
    let latency_ms = start.elapsed().as_millis();

    if status.is_success() {
        tracing::info!(
            request_id = %request_id,
            status = %status.as_u16(),
            latency_ms = %latency_ms,
            "← Response"
        );
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(request_id = %request_id, "Failed to read response body: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read response body")
                .into_response();
        }
    };

    tracing::warn!(
        request_id = %request_id,
        status = %status.as_u16(),
        latency_ms = %latency_ms,
        body = %truncate_body(&String::from_utf8_lossy(&bytes), MAX_LOGGED_BODY),
        "← Response"
    );

    Response::from_parts(parts, Body::from(bytes))
}

/// Truncate body for logging, adding ellipsis if truncated
fn truncate_body(body: &str, max_len: usize) -> String {
    let body = body.trim();
    if body.len() <= max_len {
        return body.to_string();
    }
    let mut end = max_len;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated, {} bytes total]", &body[..end], body.len())
}
