use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::engine::CartLine;
use crate::model::Variant;

use super::{ApiError, ApiJson, AppState};

/// GET /variants
pub async fn list_variants(State(state): State<AppState>) -> Json<Vec<Variant>> {
    Json(state.engine.variants().await)
}

#[derive(Deserialize)]
pub struct CheckoutBody {
    pub lines: Vec<CartLine>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub checkout_url: String,
}

/// POST /checkout
pub async fn checkout(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CheckoutBody>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let email = body.email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty());
    let session = state.booking.start_order_checkout(&body.lines, email).await?;
    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            session_id: session.id,
            checkout_url: session.url,
        }),
    ))
}
