use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use bytes::Bytes;
use serde::Serialize;

use crate::limits::SIGNATURE_TOLERANCE_SECS;
use crate::payment::{SIGNATURE_HEADER, WebhookOutcome, parse_event, reconcile, signature};

use super::{ApiError, AppState};

#[derive(Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    pub outcome: WebhookOutcome,
}

/// POST /webhooks/payments
///
/// The signature is checked over the raw bytes before anything is parsed.
pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let header = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let now_secs = state.engine.now() / 1000;
    if let Err(e) = signature::verify(&state.webhook_secret, header, &body, now_secs, SIGNATURE_TOLERANCE_SECS) {
        metrics::counter!(crate::observability::WEBHOOK_SIGNATURE_FAILURES_TOTAL).increment(1);
        tracing::warn!("webhook rejected: {e}");
        return Err(e.into());
    }

    let event = parse_event(&body).map_err(|e| ApiError::Validation(e.to_string()))?;
    let outcome = reconcile(&state.engine, event).await?;
    Ok(Json(WebhookResponse {
        received: true,
        outcome,
    }))
}
