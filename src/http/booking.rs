use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::booking::HoldOutcome;
use crate::engine::{EngineError, HoldRequest};
use crate::model::Contact;

use super::views::{ReservationView, SlotView};
use super::{ApiError, ApiJson, ApiQuery, AppState};

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Deserialize)]
pub struct DatesQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Serialize)]
pub struct DatesResponse {
    pub service_id: Ulid,
    pub timezone: String,
    pub dates: Vec<NaiveDate>,
}

/// GET /services/{id}/dates?from=&to=
pub async fn dates(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
    ApiQuery(q): ApiQuery<DatesQuery>,
) -> Result<Json<DatesResponse>, ApiError> {
    let dates = state.engine.available_dates(id, q.from, q.to).await?;
    Ok(Json(DatesResponse {
        service_id: id,
        timezone: state.engine.schedule().settings.timezone.name().to_string(),
        dates,
    }))
}

#[derive(Deserialize)]
pub struct SlotsQuery {
    pub date: NaiveDate,
}

#[derive(Serialize)]
pub struct SlotsResponse {
    pub service_id: Ulid,
    pub date: NaiveDate,
    pub timezone: String,
    pub slots: Vec<SlotView>,
}

/// GET /services/{id}/slots?date=
pub async fn slots(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
    ApiQuery(q): ApiQuery<SlotsQuery>,
) -> Result<Json<SlotsResponse>, ApiError> {
    let spans = state.engine.open_slots(id, q.date).await?;
    let tz = state.engine.schedule().settings.timezone;
    Ok(Json(SlotsResponse {
        service_id: id,
        date: q.date,
        timezone: tz.name().to_string(),
        slots: spans.iter().map(|s| SlotView::new(tz, s)).collect(),
    }))
}

#[derive(Deserialize)]
pub struct HoldBody {
    pub service_id: Ulid,
    /// RFC 3339 with offset, e.g. `2026-06-02T10:00:00-04:00`.
    pub start: DateTime<FixedOffset>,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Serialize)]
pub struct HoldResponse {
    /// `confirmed` or `checkout`.
    pub status: &'static str,
    pub reservation: ReservationView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
}

/// POST /holds
pub async fn create_hold(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<HoldBody>,
) -> Result<(StatusCode, Json<HoldResponse>), ApiError> {
    let request = HoldRequest {
        service_id: body.service_id,
        start: body.start.timestamp_millis(),
        contact: Contact {
            name: body.name,
            email: body.email,
            phone: body.phone,
        },
        notes: body.notes,
    };
    let tz = state.engine.schedule().settings.timezone;
    let response = match state.booking.create_hold(request).await? {
        HoldOutcome::Confirmed(reservation) => HoldResponse {
            status: "confirmed",
            reservation: ReservationView::public(tz, &reservation),
            checkout_url: None,
        },
        HoldOutcome::CheckoutRequired {
            reservation,
            checkout_url,
        } => HoldResponse {
            status: "checkout",
            reservation: ReservationView::public(tz, &reservation),
            checkout_url: Some(checkout_url),
        },
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /reservations/{id}
pub async fn get_reservation(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
) -> Result<Json<ReservationView>, ApiError> {
    let reservation = state
        .engine
        .get_reservation(id)
        .await
        .ok_or(EngineError::NotFound(id))?;
    let tz = state.engine.schedule().settings.timezone;
    Ok(Json(ReservationView::public(tz, &reservation)))
}

#[derive(Deserialize)]
pub struct CancelBody {
    pub email: String,
}

#[derive(Serialize)]
pub struct TransitionResponse {
    /// False when the reservation was already in the requested state.
    pub changed: bool,
    pub reservation: ReservationView,
}

/// POST /reservations/{id}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
    ApiJson(body): ApiJson<CancelBody>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let outcome = state.engine.cancel_by_customer(id, &body.email).await?;
    let tz = state.engine.schedule().settings.timezone;
    Ok(Json(TransitionResponse {
        changed: outcome.applied(),
        reservation: ReservationView::public(tz, outcome.reservation()),
    }))
}
