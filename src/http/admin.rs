use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use ulid::Ulid;

use crate::janitor::{self, SweepReport};
use crate::model::*;

use super::booking::TransitionResponse;
use super::views::{AlertView, OrderView, ReservationView};
use super::{ApiError, ApiJson, ApiQuery, AppState};

fn tz(state: &AppState) -> chrono_tz::Tz {
    state.engine.schedule().settings.timezone
}

// ── Reservations ────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct StatusFilter {
    #[serde(default)]
    pub status: Option<String>,
}

/// GET /admin/reservations?status=
pub async fn list_reservations(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<StatusFilter>,
) -> Result<Json<Vec<ReservationView>>, ApiError> {
    let status = match q.status.as_deref() {
        None | Some("") => None,
        Some(s) => Some(StatusKind::parse(s).ok_or_else(|| ApiError::Validation(format!("unknown status `{s}`")))?),
    };
    let tz = tz(&state);
    let all = state.engine.list_reservations(status).await;
    Ok(Json(all.iter().map(|r| ReservationView::admin(tz, r)).collect()))
}

#[derive(Deserialize)]
pub struct StatusBody {
    pub status: StatusKind,
}

/// POST /admin/reservations/{id}/status
pub async fn set_status(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
    ApiJson(body): ApiJson<StatusBody>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let outcome = state.engine.admin_set_status(id, body.status).await?;
    Ok(Json(TransitionResponse {
        changed: outcome.applied(),
        reservation: ReservationView::admin(tz(&state), outcome.reservation()),
    }))
}

#[derive(Deserialize)]
pub struct NotesBody {
    #[serde(default)]
    pub notes: Option<String>,
}

/// PUT /admin/reservations/{id}/notes
pub async fn set_notes(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
    ApiJson(body): ApiJson<NotesBody>,
) -> Result<Json<ReservationView>, ApiError> {
    let reservation = state.engine.set_admin_notes(id, body.notes).await?;
    Ok(Json(ReservationView::admin(tz(&state), &reservation)))
}

// ── Schedule ────────────────────────────────────────────────────

/// GET /admin/settings
pub async fn get_settings(State(state): State<AppState>) -> Json<ReservationSettings> {
    Json(state.engine.schedule().settings.clone())
}

/// PUT /admin/settings
pub async fn put_settings(
    State(state): State<AppState>,
    ApiJson(settings): ApiJson<ReservationSettings>,
) -> Result<Json<ReservationSettings>, ApiError> {
    Ok(Json(state.engine.update_settings(settings).await?))
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
pub struct RuleBody {
    /// Omit to create a new rule.
    #[serde(default)]
    pub id: Option<Ulid>,
    pub day_of_week: u8,
    pub open: NaiveTime,
    pub close: NaiveTime,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// POST /admin/rules
pub async fn upsert_rule(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RuleBody>,
) -> Result<(StatusCode, Json<AvailabilityRule>), ApiError> {
    let rule = AvailabilityRule {
        id: body.id.unwrap_or_else(Ulid::new),
        day_of_week: body.day_of_week,
        open: body.open,
        close: body.close,
        active: body.active,
    };
    let rule = state.engine.upsert_rule(rule).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

/// DELETE /admin/rules/{id}
pub async fn remove_rule(State(state): State<AppState>, Path(id): Path<Ulid>) -> Result<StatusCode, ApiError> {
    state.engine.remove_rule(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /admin/blackouts
pub async fn add_blackout(
    State(state): State<AppState>,
    ApiJson(blackout): ApiJson<BlackoutDate>,
) -> Result<(StatusCode, Json<BlackoutDate>), ApiError> {
    Ok((StatusCode::CREATED, Json(state.engine.add_blackout(blackout).await?)))
}

/// DELETE /admin/blackouts/{date}
pub async fn remove_blackout(
    State(state): State<AppState>,
    Path(date): Path<NaiveDate>,
) -> Result<StatusCode, ApiError> {
    if state.engine.remove_blackout(date).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("blackout {date}")))
    }
}

// ── Catalog ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ServiceBody {
    pub resource_id: Ulid,
    pub name: String,
    pub duration_minutes: i64,
    pub price: Cents,
    #[serde(default)]
    pub buffer_minutes: Option<i64>,
    #[serde(default)]
    pub deposit: Option<DepositPolicy>,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// PUT /admin/services/{id}
pub async fn put_service(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
    ApiJson(body): ApiJson<ServiceBody>,
) -> Result<Json<Service>, ApiError> {
    let service = Service {
        id,
        resource_id: body.resource_id,
        name: body.name.trim().to_string(),
        duration_ms: body.duration_minutes.saturating_mul(MINUTE),
        price: body.price,
        buffer_ms: body.buffer_minutes.map(|m| m.saturating_mul(MINUTE)),
        deposit: body.deposit,
        active: body.active,
    };
    Ok(Json(state.engine.upsert_service(service).await?))
}

#[derive(Deserialize)]
pub struct VariantBody {
    pub sku: String,
    pub name: String,
    pub price: Cents,
    pub quantity: u32,
}

/// PUT /admin/variants/{id}
pub async fn put_variant(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
    ApiJson(body): ApiJson<VariantBody>,
) -> Result<Json<Variant>, ApiError> {
    let variant = Variant {
        id,
        sku: body.sku.trim().to_string(),
        name: body.name,
        price: body.price,
        quantity: body.quantity,
    };
    Ok(Json(state.engine.upsert_variant(variant).await?))
}

// ── Orders ──────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct OrderFilter {
    #[serde(default)]
    pub status: Option<OrderStatus>,
}

/// GET /admin/orders?status=
pub async fn list_orders(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<OrderFilter>,
) -> Json<Vec<OrderView>> {
    let tz = tz(&state);
    Json(state.engine.orders(q.status).iter().map(|o| OrderView::new(tz, o)).collect())
}

#[derive(Deserialize)]
pub struct ResolveBody {
    #[serde(default)]
    pub note: Option<String>,
}

/// POST /admin/orders/{id}/resolve
pub async fn resolve_order(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
    ApiJson(body): ApiJson<ResolveBody>,
) -> Result<Json<OrderView>, ApiError> {
    let order = state.engine.resolve_order(id, body.note).await?;
    Ok(Json(OrderView::new(tz(&state), &order)))
}

// ── Alerts & janitor ────────────────────────────────────────────

#[derive(Deserialize)]
pub struct AlertFilter {
    #[serde(default)]
    pub open: bool,
}

/// GET /admin/alerts?open=true
pub async fn list_alerts(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<AlertFilter>,
) -> Json<Vec<AlertView>> {
    let tz = tz(&state);
    Json(state.engine.alerts(q.open).iter().map(|a| AlertView::new(tz, a)).collect())
}

/// POST /admin/alerts/{id}/ack
pub async fn ack_alert(State(state): State<AppState>, Path(id): Path<Ulid>) -> Result<Json<AlertView>, ApiError> {
    let alert = state.engine.acknowledge_alert(id).await?;
    Ok(Json(AlertView::new(tz(&state), &alert)))
}

/// POST /admin/janitor/sweep
pub async fn sweep(State(state): State<AppState>) -> Json<SweepReport> {
    Json(janitor::sweep(&state.engine).await)
}
