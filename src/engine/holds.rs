use tracing::{debug, info};
use ulid::Ulid;

use crate::lifecycle::{self, Actor, Decision, ExpiryReason, Transition};
use crate::model::*;

use super::availability::check_bookable;
use super::conflict::{check_no_conflict, validate_contact, validate_span};
use super::{Engine, EngineError};

#[derive(Debug, Clone)]
pub struct HoldRequest {
    pub service_id: Ulid,
    pub start: Ms,
    pub contact: Contact,
    pub notes: Option<String>,
}

impl Engine {
    /// Create a hold for the requested slot.
    ///
    /// The overlap check and the insert run under the calendar write lock, so
    /// of two callers racing for the same window exactly one gets through.
    /// When no deposit is due the hold is confirmed inside the same critical
    /// section and the returned reservation is already `Confirmed`.
    pub async fn place_hold(&self, req: HoldRequest) -> Result<Reservation, EngineError> {
        let contact = validate_contact(&req.contact, req.notes.as_deref())?;
        let notes = req.notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        let service = self.service(req.service_id).ok_or(EngineError::NotFound(req.service_id))?;
        let schedule = self.schedule();

        let span = Span {
            start: req.start,
            end: req.start + service.duration_ms,
        };
        validate_span(&span)?;
        if let Err(e) = check_bookable(&schedule, &service, &span, self.now()) {
            metrics::counter!(crate::observability::HOLDS_TOTAL, "outcome" => "invalid").increment(1);
            return Err(e);
        }
        let buffer = schedule.buffer_for(&service);
        let deposit = schedule.deposit_due(&service);

        let cal = self.calendar(service.resource_id);
        let mut guard = cal.write().await;
        let now = self.now();

        self.expire_stale_holds(&mut guard, &span, buffer, now).await?;
        if let Err(e) = check_no_conflict(&guard, &span, buffer, None) {
            metrics::counter!(crate::observability::HOLDS_TOTAL, "outcome" => "conflict").increment(1);
            if let EngineError::SlotUnavailable { conflicting } = &e {
                debug!(service = %service.id, start = span.start, %conflicting, "hold rejected: slot taken");
            }
            return Err(e);
        }

        let id = Ulid::new();
        let reservation = Reservation {
            id,
            service_id: service.id,
            resource_id: service.resource_id,
            span,
            buffer_ms: buffer,
            contact,
            customer_notes: notes,
            status: ReservationStatus::Hold {
                expires_at: now + schedule.settings.hold_ttl_ms,
            },
            deposit: Deposit {
                amount: deposit,
                paid: false,
            },
            payment_session: None,
            admin_notes: None,
            created_at: now,
            confirmed_at: None,
            cancelled_at: None,
            updated_at: now,
        };
        self.commit_to_calendar(&mut guard, &Event::ReservationCreated { reservation })
            .await?;

        if deposit == 0 {
            let outcome = self
                .transition_locked(&mut guard, id, Transition::Confirm { deposit_paid: false }, Actor::System, now)
                .await?;
            metrics::counter!(crate::observability::HOLDS_TOTAL, "outcome" => "confirmed").increment(1);
            info!(reservation = %id, service = %service.id, "reservation confirmed, no deposit due");
            return Ok(outcome.into_reservation());
        }

        metrics::counter!(crate::observability::HOLDS_TOTAL, "outcome" => "placed").increment(1);
        info!(reservation = %id, service = %service.id, deposit, "hold placed");
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Record the checkout session created for a held reservation.
    pub async fn attach_payment_session(&self, id: Ulid, session_id: String) -> Result<(), EngineError> {
        let mut guard = self.lock_reservation(id).await?;
        let res = guard.get(id).ok_or(EngineError::NotFound(id))?;
        if res.payment_session.as_deref() == Some(session_id.as_str()) {
            return Ok(());
        }
        let event = Event::PaymentSessionAttached {
            id,
            resource_id: res.resource_id,
            session_id,
        };
        self.commit_to_calendar(&mut guard, &event).await
    }

    /// Expire holds past their deadline that would collide with `span`.
    /// Each one goes through the same guard as a janitor sweep.
    pub(super) async fn expire_stale_holds(
        &self,
        cal: &mut Calendar,
        span: &Span,
        buffer: Ms,
        now: Ms,
    ) -> Result<usize, EngineError> {
        let stale: Vec<Ulid> = cal
            .near(span, buffer)
            .filter(|r| r.is_stale_hold(now) && r.conflicts_with(span, buffer))
            .map(|r| r.id)
            .collect();
        let transition = Transition::Expire {
            reason: ExpiryReason::HoldTtl,
        };
        let mut expired = 0;
        for id in stale {
            let Some(res) = cal.get(id) else { continue };
            if lifecycle::decide(res, &transition, Actor::Janitor, now)? != Decision::Apply {
                continue;
            }
            let event = Event::ReservationTransitioned {
                id,
                resource_id: res.resource_id,
                transition,
                actor: Actor::Janitor,
                at: now,
            };
            self.commit_to_calendar(cal, &event).await?;
            metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "transition" => "expire", "actor" => "janitor")
                .increment(1);
            debug!(reservation = %id, "reclaimed stale hold");
            expired += 1;
        }
        Ok(expired)
    }
}
