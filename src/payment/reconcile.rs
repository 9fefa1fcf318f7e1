use serde::Serialize;
use tracing::info;
use ulid::Ulid;

use crate::engine::{Engine, EngineError, OrderOutcome, PaymentOutcome, TransitionOutcome};

use super::webhook::{GatewayEvent, Purpose};

/// What a webhook delivery did. Returned to the gateway in the 200 body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Confirmed,
    AlreadyConfirmed,
    Expired,
    Unchanged,
    OrderCreated,
    OrderNeedsAttention,
    DuplicateOrder,
    Anomaly,
    Ignored,
}

impl WebhookOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            WebhookOutcome::Confirmed => "confirmed",
            WebhookOutcome::AlreadyConfirmed => "already_confirmed",
            WebhookOutcome::Expired => "expired",
            WebhookOutcome::Unchanged => "unchanged",
            WebhookOutcome::OrderCreated => "order_created",
            WebhookOutcome::OrderNeedsAttention => "order_needs_attention",
            WebhookOutcome::DuplicateOrder => "duplicate_order",
            WebhookOutcome::Anomaly => "anomaly",
            WebhookOutcome::Ignored => "ignored",
        }
    }
}

/// Drive a verified gateway event into the engine.
///
/// Only storage failures come back as errors; the HTTP layer answers those
/// with a 5xx so the gateway redelivers.
pub async fn reconcile(engine: &Engine, event: GatewayEvent) -> Result<WebhookOutcome, EngineError> {
    let outcome = match event {
        GatewayEvent::Ignored { event_id, kind } => {
            info!(event = %event_id, kind, "ignoring gateway event");
            WebhookOutcome::Ignored
        }
        GatewayEvent::CheckoutCompleted {
            event_id,
            session_id,
            reference,
            amount_total,
            customer_email,
            purpose,
        } => {
            info!(event = %event_id, session = %session_id, amount_total, "checkout completed");
            match purpose {
                Purpose::Reservation => {
                    payment_for_reservation(engine, &session_id, reference.as_deref(), amount_total).await?
                }
                Purpose::Order { lines } => {
                    // Unreadable carts still produce a flagged order.
                    let lines = lines.unwrap_or_default();
                    match engine
                        .place_order(&session_id, &lines, customer_email, amount_total)
                        .await
                    {
                        Ok(OrderOutcome::Created(_)) => WebhookOutcome::OrderCreated,
                        Ok(OrderOutcome::NeedsAttention { .. }) => WebhookOutcome::OrderNeedsAttention,
                        Ok(OrderOutcome::Duplicate(_)) => WebhookOutcome::DuplicateOrder,
                        Err(e @ EngineError::WalError(_)) => return Err(e),
                        Err(e) => {
                            engine
                                .report_unmatched_payment(
                                    &session_id,
                                    reference.as_deref(),
                                    amount_total,
                                    format!("paid order could not be created: {e}"),
                                )
                                .await?;
                            WebhookOutcome::Anomaly
                        }
                    }
                }
            }
        }
        GatewayEvent::CheckoutExpired {
            event_id,
            session_id,
            reference,
            purpose,
        } => {
            info!(event = %event_id, session = %session_id, "checkout expired");
            match purpose {
                // Storefront checkouts reserve nothing.
                Purpose::Order { .. } => WebhookOutcome::Unchanged,
                Purpose::Reservation => {
                    let target = engine
                        .resolve_payment_target(&session_id, parse_reference(reference.as_deref()))
                        .await;
                    match target {
                        None => WebhookOutcome::Unchanged,
                        Some(id) => match engine.expire_session(id).await? {
                            TransitionOutcome::Applied(_) => WebhookOutcome::Expired,
                            TransitionOutcome::Unchanged { .. } => WebhookOutcome::Unchanged,
                        },
                    }
                }
            }
        }
    };
    metrics::counter!(crate::observability::WEBHOOK_EVENTS_TOTAL, "outcome" => outcome.as_str()).increment(1);
    Ok(outcome)
}

fn parse_reference(reference: Option<&str>) -> Option<Ulid> {
    reference.and_then(|r| r.parse().ok())
}

async fn payment_for_reservation(
    engine: &Engine,
    session_id: &str,
    reference: Option<&str>,
    amount: i64,
) -> Result<WebhookOutcome, EngineError> {
    let Some(id) = engine
        .resolve_payment_target(session_id, parse_reference(reference))
        .await
    else {
        engine
            .report_unmatched_payment(session_id, reference, amount, "payment for unknown reservation")
            .await?;
        return Ok(WebhookOutcome::Anomaly);
    };
    Ok(match engine.confirm_payment(id, session_id, amount).await? {
        PaymentOutcome::Confirmed(_) => WebhookOutcome::Confirmed,
        PaymentOutcome::AlreadyConfirmed(_) => WebhookOutcome::AlreadyConfirmed,
        PaymentOutcome::Anomaly(_) => WebhookOutcome::Anomaly,
    })
}
