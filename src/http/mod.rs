//! HTTP surface: public booking and storefront routes, the payment webhook,
//! and the bearer-protected admin console API.

mod admin;
mod booking;
mod error;
mod storefront;
pub mod views;
mod webhook;

pub use error::{ApiError, ApiJson, ApiQuery};

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, post, put};
use tower_http::trace::TraceLayer;

use crate::auth::{AdminAuth, require_admin};
use crate::booking::BookingService;
use crate::engine::Engine;
use crate::limits::MAX_WEBHOOK_BODY_BYTES;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub booking: Arc<BookingService>,
    pub webhook_secret: Arc<[u8]>,
}

impl AppState {
    pub fn new(booking: Arc<BookingService>, webhook_secret: &str) -> Self {
        Self {
            engine: booking.engine().clone(),
            booking,
            webhook_secret: webhook_secret.as_bytes().into(),
        }
    }
}

pub fn router(state: AppState, admin_auth: AdminAuth) -> Router {
    let admin = Router::new()
        .route("/reservations", get(admin::list_reservations))
        .route("/reservations/{id}/status", post(admin::set_status))
        .route("/reservations/{id}/notes", put(admin::set_notes))
        .route("/settings", get(admin::get_settings).put(admin::put_settings))
        .route("/rules", post(admin::upsert_rule))
        .route("/rules/{id}", delete(admin::remove_rule))
        .route("/blackouts", post(admin::add_blackout))
        .route("/blackouts/{date}", delete(admin::remove_blackout))
        .route("/services/{id}", put(admin::put_service))
        .route("/variants/{id}", put(admin::put_variant))
        .route("/orders", get(admin::list_orders))
        .route("/orders/{id}/resolve", post(admin::resolve_order))
        .route("/alerts", get(admin::list_alerts))
        .route("/alerts/{id}/ack", post(admin::ack_alert))
        .route("/janitor/sweep", post(admin::sweep))
        .route_layer(middleware::from_fn_with_state(admin_auth, require_admin));

    Router::new()
        .route("/health", get(booking::health))
        .route("/services/{id}/dates", get(booking::dates))
        .route("/services/{id}/slots", get(booking::slots))
        .route("/holds", post(booking::create_hold))
        .route("/reservations/{id}", get(booking::get_reservation))
        .route("/reservations/{id}/cancel", post(booking::cancel))
        .route("/variants", get(storefront::list_variants))
        .route("/checkout", post(storefront::checkout))
        .route(
            "/webhooks/payments",
            post(webhook::receive).layer(DefaultBodyLimit::max(MAX_WEBHOOK_BODY_BYTES)),
        )
        .nest("/admin", admin)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
