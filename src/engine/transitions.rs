use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::lifecycle::{self, Actor, Decision, ExpiryReason, Transition, TransitionError, Unchanged};
use crate::model::*;
use crate::notify::Notice;

use super::alerts::NewAlert;
use super::conflict::check_no_conflict;
use super::{Engine, EngineError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied(Reservation),
    /// Guarded write touched nothing. Not an error.
    Unchanged { reservation: Reservation, why: Unchanged },
}

impl TransitionOutcome {
    pub fn reservation(&self) -> &Reservation {
        match self {
            TransitionOutcome::Applied(r) | TransitionOutcome::Unchanged { reservation: r, .. } => r,
        }
    }

    pub fn into_reservation(self) -> Reservation {
        match self {
            TransitionOutcome::Applied(r) | TransitionOutcome::Unchanged { reservation: r, .. } => r,
        }
    }

    pub fn applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

/// Result of applying a completed deposit payment to a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Confirmed(Reservation),
    AlreadyConfirmed(Reservation),
    /// Money moved but the reservation could not take it.
    Anomaly(OperatorAlert),
}

impl Engine {
    /// Guarded transition. Caller holds the calendar write lock.
    pub(super) async fn transition_locked(
        &self,
        cal: &mut Calendar,
        id: Ulid,
        transition: Transition,
        actor: Actor,
        now: Ms,
    ) -> Result<TransitionOutcome, EngineError> {
        let res = cal.get(id).ok_or(EngineError::NotFound(id))?;
        match lifecycle::decide(res, &transition, actor, now)? {
            Decision::Unchanged(why) => {
                metrics::counter!(crate::observability::TRANSITIONS_UNCHANGED_TOTAL, "transition" => transition.name())
                    .increment(1);
                debug!(reservation = %id, transition = transition.name(), %actor, ?why, "transition unchanged");
                Ok(TransitionOutcome::Unchanged {
                    reservation: res.clone(),
                    why,
                })
            }
            Decision::Apply => {
                let (span, buffer, resource_id) = (res.span, res.buffer_ms, res.resource_id);
                let previous = res.status.kind();
                if transition == Transition::Restore {
                    self.expire_stale_holds(cal, &span, buffer, now).await?;
                    check_no_conflict(cal, &span, buffer, Some(id))?;
                }
                let event = Event::ReservationTransitioned {
                    id,
                    resource_id,
                    transition,
                    actor,
                    at: now,
                };
                self.commit_to_calendar(cal, &event).await?;
                let updated = cal.get(id).cloned().ok_or(EngineError::NotFound(id))?;

                metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "transition" => transition.name(), "actor" => actor.as_str())
                    .increment(1);
                info!(reservation = %id, transition = transition.name(), %actor, status = %updated.status.kind(), "transition applied");
                if let Some(notice) = Notice::for_transition(&updated, previous, &transition, actor) {
                    self.notify.send(notice);
                }
                Ok(TransitionOutcome::Applied(updated))
            }
        }
    }

    pub async fn transition(&self, id: Ulid, transition: Transition, actor: Actor) -> Result<TransitionOutcome, EngineError> {
        let mut guard = self.lock_reservation(id).await?;
        let now = self.now();
        self.transition_locked(&mut guard, id, transition, actor, now).await
    }

    /// Customer cancellation. The email must match the reservation's contact.
    pub async fn cancel_by_customer(&self, id: Ulid, email: &str) -> Result<TransitionOutcome, EngineError> {
        let mut guard = self.lock_reservation(id).await?;
        let res = guard.get(id).ok_or(EngineError::NotFound(id))?;
        if !res.contact.email.eq_ignore_ascii_case(email.trim()) {
            // Same answer as an unknown id.
            return Err(EngineError::NotFound(id));
        }
        let now = self.now();
        self.transition_locked(&mut guard, id, Transition::Cancel, Actor::Customer, now)
            .await
    }

    /// Admin status change, mapped onto the same guarded transitions.
    /// `confirmed` confirms a hold (unpaid) or restores a terminal reservation.
    pub async fn admin_set_status(&self, id: Ulid, target: StatusKind) -> Result<TransitionOutcome, EngineError> {
        let mut guard = self.lock_reservation(id).await?;
        let current = guard.get(id).ok_or(EngineError::NotFound(id))?.status.kind();
        let transition = match target {
            StatusKind::Confirmed if current == StatusKind::Hold => Transition::Confirm { deposit_paid: false },
            StatusKind::Confirmed => Transition::Restore,
            StatusKind::Cancelled => Transition::Cancel,
            StatusKind::Completed => Transition::Complete,
            StatusKind::NoShow => Transition::NoShow,
            StatusKind::Expired => Transition::Expire {
                reason: ExpiryReason::HoldTtl,
            },
            StatusKind::Hold => {
                return Err(TransitionError::Illegal {
                    from: current,
                    transition: "hold",
                }
                .into());
            }
        };
        let now = self.now();
        self.transition_locked(&mut guard, id, transition, Actor::Admin, now)
            .await
    }

    pub async fn set_admin_notes(&self, id: Ulid, notes: Option<String>) -> Result<Reservation, EngineError> {
        let notes = notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        if notes
            .as_ref()
            .is_some_and(|n| n.chars().count() > crate::limits::MAX_NOTES_LEN)
        {
            return Err(EngineError::validation("notes are too long"));
        }
        let mut guard = self.lock_reservation(id).await?;
        let resource_id = guard.get(id).ok_or(EngineError::NotFound(id))?.resource_id;
        let event = Event::NotesUpdated {
            id,
            resource_id,
            notes,
            at: self.now(),
        };
        self.commit_to_calendar(&mut guard, &event).await?;
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Find the reservation a payment belongs to: by stored session id, else
    /// by the client reference if that reservation has no other session.
    pub async fn resolve_payment_target(&self, session_id: &str, reference: Option<Ulid>) -> Option<Ulid> {
        if let Some(id) = self.reservation_for_session(session_id) {
            return Some(id);
        }
        let id = reference?;
        let cal = self.calendars.get(&self.resource_of(id)?)?.value().clone();
        let guard = cal.read().await;
        let res = guard.get(id)?;
        match res.payment_session.as_deref() {
            None => Some(id),
            Some(s) if s == session_id => Some(id),
            Some(_) => None,
        }
    }

    /// Apply a completed deposit payment.
    ///
    /// The current status is checked under the calendar lock before anything
    /// is written, so duplicate deliveries confirm once and notify once.
    pub async fn confirm_payment(
        &self,
        id: Ulid,
        session_id: &str,
        amount_paid: Cents,
    ) -> Result<PaymentOutcome, EngineError> {
        let mut guard = self.lock_reservation(id).await?;
        let res = guard.get(id).ok_or(EngineError::NotFound(id))?.clone();
        let now = self.now();

        let anomaly = |kind: AlertKind, detail: String| NewAlert {
            kind,
            reservation_id: Some(id),
            order_id: None,
            session_id: Some(session_id.to_string()),
            amount: Some(amount_paid),
            detail,
        };

        match res.status {
            ReservationStatus::Hold { .. } if amount_paid < res.deposit.amount => {
                let alert = self
                    .raise_alert(anomaly(
                        AlertKind::Underpaid,
                        format!("paid {amount_paid}, deposit due {}", res.deposit.amount),
                    ))
                    .await?;
                Ok(PaymentOutcome::Anomaly(alert))
            }
            ReservationStatus::Hold { .. } => {
                if res.payment_session.is_none() {
                    let event = Event::PaymentSessionAttached {
                        id,
                        resource_id: res.resource_id,
                        session_id: session_id.to_string(),
                    };
                    self.commit_to_calendar(&mut guard, &event).await?;
                }
                let outcome = self
                    .transition_locked(&mut guard, id, Transition::Confirm { deposit_paid: true }, Actor::Gateway, now)
                    .await?;
                Ok(PaymentOutcome::Confirmed(outcome.into_reservation()))
            }
            ReservationStatus::Confirmed | ReservationStatus::Completed | ReservationStatus::NoShow => {
                debug!(reservation = %id, session = session_id, "duplicate payment event");
                Ok(PaymentOutcome::AlreadyConfirmed(res))
            }
            ReservationStatus::Expired => {
                warn!(reservation = %id, session = session_id, "payment arrived after hold expired");
                let alert = self
                    .raise_alert(anomaly(
                        AlertKind::PaidAfterExpiry,
                        "payment captured after the hold expired; slot was released".into(),
                    ))
                    .await?;
                Ok(PaymentOutcome::Anomaly(alert))
            }
            ReservationStatus::Cancelled => {
                warn!(reservation = %id, session = session_id, "payment arrived after cancellation");
                let alert = self
                    .raise_alert(anomaly(
                        AlertKind::PaidAfterCancellation,
                        "payment captured for a cancelled reservation".into(),
                    ))
                    .await?;
                Ok(PaymentOutcome::Anomaly(alert))
            }
        }
    }

    /// The gateway says the checkout can no longer be paid.
    pub async fn expire_session(&self, id: Ulid) -> Result<TransitionOutcome, EngineError> {
        let mut guard = self.lock_reservation(id).await?;
        let now = self.now();
        self.transition_locked(
            &mut guard,
            id,
            Transition::Expire {
                reason: ExpiryReason::SessionExpired,
            },
            Actor::Gateway,
            now,
        )
        .await
    }

    /// (reservation id, resource id) of every hold past its deadline.
    pub fn collect_expired_holds(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut expired = Vec::new();
        for entry in self.calendars.iter() {
            // A busy calendar is picked up by the next sweep.
            if let Ok(cal) = entry.value().try_read() {
                expired.extend(
                    cal.reservations
                        .iter()
                        .filter(|r| r.is_stale_hold(now))
                        .map(|r| (r.id, r.resource_id)),
                );
            }
        }
        expired
    }
}
