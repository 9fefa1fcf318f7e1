use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

// ── Reservations ────────────────────────────────────────────────

/// Counter: hold attempts. Labels: outcome (placed, confirmed, conflict, invalid).
pub const HOLDS_TOTAL: &str = "holdfast_holds_total";

/// Counter: applied state transitions. Labels: transition, actor.
pub const TRANSITIONS_TOTAL: &str = "holdfast_transitions_total";

/// Counter: guarded transitions that touched nothing. Labels: transition.
pub const TRANSITIONS_UNCHANGED_TOTAL: &str = "holdfast_transitions_unchanged_total";

/// Histogram: time to compute one day of slots, in seconds.
pub const AVAILABILITY_DURATION_SECONDS: &str = "holdfast_availability_duration_seconds";

// ── Payments ────────────────────────────────────────────────────

/// Counter: checkout sessions created. Labels: kind (reservation, order), status.
pub const CHECKOUT_SESSIONS_TOTAL: &str = "holdfast_checkout_sessions_total";

/// Counter: webhook deliveries. Labels: outcome.
pub const WEBHOOK_EVENTS_TOTAL: &str = "holdfast_webhook_events_total";

/// Counter: webhook deliveries rejected by signature verification.
pub const WEBHOOK_SIGNATURE_FAILURES_TOTAL: &str = "holdfast_webhook_signature_failures_total";

// ── Operator alerts ─────────────────────────────────────────────

/// Counter: alerts raised. Labels: kind.
pub const ALERTS_RAISED_TOTAL: &str = "holdfast_alerts_raised_total";

/// Gauge: unacknowledged alerts, refreshed each janitor sweep.
pub const ALERTS_OPEN: &str = "holdfast_alerts_open";

// ── Janitor ─────────────────────────────────────────────────────

/// Counter: holds expired by sweeps.
pub const JANITOR_EXPIRED_TOTAL: &str = "holdfast_janitor_expired_total";

/// Histogram: sweep duration in seconds.
pub const JANITOR_SWEEP_DURATION_SECONDS: &str = "holdfast_janitor_sweep_duration_seconds";

// ── Storefront ──────────────────────────────────────────────────

/// Counter: orders created. Labels: status (paid, needs_attention).
pub const ORDERS_TOTAL: &str = "holdfast_orders_total";

/// Counter: units paid for but not in stock.
pub const ORDER_SHORTFALL_UNITS_TOTAL: &str = "holdfast_order_shortfall_units_total";

// ── Notifications ───────────────────────────────────────────────

/// Counter: notices handed to the sender. Labels: kind.
pub const NOTICES_TOTAL: &str = "holdfast_notices_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "holdfast_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "holdfast_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "holdfast_wal_compactions_total";

// ── HTTP ────────────────────────────────────────────────────────

/// Counter: API errors returned. Labels: code.
pub const API_ERRORS_TOTAL: &str = "holdfast_api_errors_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
