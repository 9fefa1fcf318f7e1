//! Reservation state machine.
//!
//! `decide` evaluates a transition's guard against the current record and
//! `apply` performs it. The engine calls both while holding the calendar write
//! lock, so guard and write form one conditional update.

use serde::{Deserialize, Serialize};

use crate::model::{Ms, Reservation, ReservationStatus, StatusKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpiryReason {
    /// Janitor sweep or lazy reclaim: only once `hold_expires_at <= now`.
    HoldTtl,
    /// The gateway reported the checkout session expired; it can no longer be paid.
    SessionExpired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    Confirm { deposit_paid: bool },
    Expire { reason: ExpiryReason },
    Cancel,
    Complete,
    NoShow,
    Restore,
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Confirm { .. } => "confirm",
            Transition::Expire { .. } => "expire",
            Transition::Cancel => "cancel",
            Transition::Complete => "complete",
            Transition::NoShow => "no_show",
            Transition::Restore => "restore",
        }
    }

    pub fn target(&self) -> StatusKind {
        match self {
            Transition::Confirm { .. } | Transition::Restore => StatusKind::Confirmed,
            Transition::Expire { .. } => StatusKind::Expired,
            Transition::Cancel => StatusKind::Cancelled,
            Transition::Complete => StatusKind::Completed,
            Transition::NoShow => StatusKind::NoShow,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Actor {
    Customer,
    Admin,
    Gateway,
    Janitor,
    System,
}

impl Actor {
    pub fn as_str(self) -> &'static str {
        match self {
            Actor::Customer => "customer",
            Actor::Admin => "admin",
            Actor::Gateway => "gateway",
            Actor::Janitor => "janitor",
            Actor::System => "system",
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a guarded transition touched nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unchanged {
    /// Already in the target status (duplicate delivery, double click).
    AlreadyInState,
    /// Expire guard: status is no longer exactly `hold`.
    NotHold,
    /// Expire guard: the hold deadline has not passed yet.
    NotDue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Apply,
    Unchanged(Unchanged),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot {transition} a reservation that is {from}")]
    Illegal {
        from: StatusKind,
        transition: &'static str,
    },
    #[error("{actor} is not allowed to {transition}")]
    NotPermitted {
        actor: Actor,
        transition: &'static str,
    },
    #[error("cannot {transition} before the appointment starts")]
    TooEarly { transition: &'static str },
}

pub fn permitted(actor: Actor, transition: &Transition) -> bool {
    match transition {
        Transition::Confirm { .. } => matches!(actor, Actor::Gateway | Actor::System | Actor::Admin),
        Transition::Expire { .. } => matches!(actor, Actor::Janitor | Actor::Gateway),
        Transition::Cancel => matches!(actor, Actor::Customer | Actor::Admin | Actor::System),
        Transition::Complete | Transition::NoShow | Transition::Restore => actor == Actor::Admin,
    }
}

/// Evaluate the guard for `transition` against the record as it is now.
pub fn decide(
    res: &Reservation,
    transition: &Transition,
    actor: Actor,
    now: Ms,
) -> Result<Decision, TransitionError> {
    if !permitted(actor, transition) {
        return Err(TransitionError::NotPermitted {
            actor,
            transition: transition.name(),
        });
    }
    let from = res.status.kind();
    let illegal = || TransitionError::Illegal {
        from,
        transition: transition.name(),
    };

    match (transition, res.status) {
        (Transition::Confirm { .. }, ReservationStatus::Hold { .. }) => Ok(Decision::Apply),
        (Transition::Confirm { .. }, ReservationStatus::Confirmed) => {
            Ok(Decision::Unchanged(Unchanged::AlreadyInState))
        }
        (Transition::Confirm { .. }, _) => Err(illegal()),

        (Transition::Expire { reason }, ReservationStatus::Hold { expires_at }) => {
            if *reason == ExpiryReason::HoldTtl && expires_at > now {
                Ok(Decision::Unchanged(Unchanged::NotDue))
            } else {
                Ok(Decision::Apply)
            }
        }
        (Transition::Expire { .. }, ReservationStatus::Expired) => {
            Ok(Decision::Unchanged(Unchanged::AlreadyInState))
        }
        (Transition::Expire { .. }, _) => Ok(Decision::Unchanged(Unchanged::NotHold)),

        (Transition::Cancel, ReservationStatus::Hold { .. } | ReservationStatus::Confirmed) => {
            Ok(Decision::Apply)
        }
        (Transition::Cancel, ReservationStatus::Cancelled) => {
            Ok(Decision::Unchanged(Unchanged::AlreadyInState))
        }
        (Transition::Cancel, _) => Err(illegal()),

        (Transition::Complete | Transition::NoShow, ReservationStatus::Confirmed) => {
            if now < res.span.start {
                Err(TransitionError::TooEarly {
                    transition: transition.name(),
                })
            } else {
                Ok(Decision::Apply)
            }
        }
        (Transition::Complete, ReservationStatus::Completed)
        | (Transition::NoShow, ReservationStatus::NoShow) => {
            Ok(Decision::Unchanged(Unchanged::AlreadyInState))
        }
        (Transition::Complete | Transition::NoShow, _) => Err(illegal()),

        (Transition::Restore, ReservationStatus::Confirmed) => {
            Ok(Decision::Unchanged(Unchanged::AlreadyInState))
        }
        (Transition::Restore, status) if status.kind().is_terminal() => Ok(Decision::Apply),
        (Transition::Restore, _) => Err(illegal()),
    }
}

/// Perform a transition that `decide` approved. Also used on WAL replay.
pub fn apply(res: &mut Reservation, transition: &Transition, at: Ms) {
    match transition {
        Transition::Confirm { deposit_paid } => {
            res.status = ReservationStatus::Confirmed;
            res.deposit.paid = *deposit_paid;
            res.confirmed_at = Some(at);
        }
        Transition::Expire { .. } => res.status = ReservationStatus::Expired,
        Transition::Cancel => {
            res.status = ReservationStatus::Cancelled;
            res.cancelled_at = Some(at);
        }
        Transition::Complete => res.status = ReservationStatus::Completed,
        Transition::NoShow => res.status = ReservationStatus::NoShow,
        Transition::Restore => {
            res.status = ReservationStatus::Confirmed;
            res.confirmed_at.get_or_insert(at);
        }
    }
    res.updated_at = at;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use ulid::Ulid;

    const START: Ms = 10 * HOUR;

    fn res(status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            service_id: Ulid::new(),
            resource_id: Ulid::new(),
            span: Span::new(START, START + HOUR),
            buffer_ms: 0,
            contact: Contact {
                name: "Grace".into(),
                email: "grace@example.com".into(),
                phone: None,
            },
            customer_notes: None,
            status,
            deposit: Deposit { amount: 3000, paid: false },
            payment_session: None,
            admin_notes: None,
            created_at: 0,
            confirmed_at: None,
            cancelled_at: None,
            updated_at: 0,
        }
    }

    fn hold(expires_at: Ms) -> Reservation {
        res(ReservationStatus::Hold { expires_at })
    }

    const TTL: Transition = Transition::Expire { reason: ExpiryReason::HoldTtl };
    const PAID: Transition = Transition::Confirm { deposit_paid: true };

    #[test]
    fn confirm_hold_clears_deadline_and_marks_paid() {
        let mut r = hold(100);
        assert_eq!(decide(&r, &PAID, Actor::Gateway, 50), Ok(Decision::Apply));
        apply(&mut r, &PAID, 50);
        assert_eq!(r.status, ReservationStatus::Confirmed);
        assert_eq!(r.hold_expires_at(), None);
        assert!(r.deposit.paid);
        assert_eq!(r.confirmed_at, Some(50));
    }

    #[test]
    fn confirm_twice_is_unchanged() {
        let r = res(ReservationStatus::Confirmed);
        assert_eq!(
            decide(&r, &PAID, Actor::Gateway, 0),
            Ok(Decision::Unchanged(Unchanged::AlreadyInState))
        );
    }

    #[test]
    fn confirm_expired_is_illegal() {
        let r = res(ReservationStatus::Expired);
        assert!(matches!(
            decide(&r, &PAID, Actor::Gateway, 0),
            Err(TransitionError::Illegal { from: StatusKind::Expired, .. })
        ));
    }

    #[test]
    fn expire_requires_deadline_passed() {
        let r = hold(100);
        assert_eq!(
            decide(&r, &TTL, Actor::Janitor, 99),
            Ok(Decision::Unchanged(Unchanged::NotDue))
        );
        assert_eq!(decide(&r, &TTL, Actor::Janitor, 100), Ok(Decision::Apply));
    }

    #[test]
    fn session_expiry_skips_deadline() {
        let r = hold(100);
        let t = Transition::Expire { reason: ExpiryReason::SessionExpired };
        assert_eq!(decide(&r, &t, Actor::Gateway, 0), Ok(Decision::Apply));
    }

    #[test]
    fn expire_after_confirm_touches_nothing() {
        let mut r = hold(100);
        apply(&mut r, &PAID, 99);
        assert_eq!(
            decide(&r, &TTL, Actor::Janitor, 100),
            Ok(Decision::Unchanged(Unchanged::NotHold))
        );
    }

    #[test]
    fn cancel_from_hold_and_confirmed() {
        for status in [ReservationStatus::Hold { expires_at: 5 }, ReservationStatus::Confirmed] {
            let mut r = res(status);
            assert_eq!(decide(&r, &Transition::Cancel, Actor::Customer, 0), Ok(Decision::Apply));
            apply(&mut r, &Transition::Cancel, 7);
            assert_eq!(r.status, ReservationStatus::Cancelled);
            assert_eq!(r.cancelled_at, Some(7));
            assert_eq!(r.hold_expires_at(), None);
        }
    }

    #[test]
    fn cancel_completed_is_illegal() {
        let r = res(ReservationStatus::Completed);
        assert!(decide(&r, &Transition::Cancel, Actor::Admin, 0).is_err());
    }

    #[test]
    fn complete_waits_for_start() {
        let r = res(ReservationStatus::Confirmed);
        assert!(matches!(
            decide(&r, &Transition::Complete, Actor::Admin, START - 1),
            Err(TransitionError::TooEarly { .. })
        ));
        assert_eq!(decide(&r, &Transition::NoShow, Actor::Admin, START), Ok(Decision::Apply));
    }

    #[test]
    fn restore_only_from_terminal() {
        for status in [
            ReservationStatus::Cancelled,
            ReservationStatus::Expired,
            ReservationStatus::Completed,
            ReservationStatus::NoShow,
        ] {
            let mut r = res(status);
            assert_eq!(decide(&r, &Transition::Restore, Actor::Admin, 0), Ok(Decision::Apply));
            apply(&mut r, &Transition::Restore, 3);
            assert_eq!(r.status, ReservationStatus::Confirmed);
        }
        assert!(decide(&hold(9), &Transition::Restore, Actor::Admin, 0).is_err());
    }

    #[test]
    fn permissions_by_actor() {
        let r = hold(100);
        assert!(matches!(
            decide(&r, &TTL, Actor::Customer, 200),
            Err(TransitionError::NotPermitted { actor: Actor::Customer, .. })
        ));
        assert!(decide(&r, &PAID, Actor::Customer, 0).is_err());
        assert!(decide(&r, &Transition::Cancel, Actor::Gateway, 0).is_err());
        assert!(!permitted(Actor::System, &Transition::Restore));
        assert!(permitted(Actor::Admin, &Transition::Confirm { deposit_paid: false }));
    }
}
