//! Response bodies. Instants are rendered as RFC 3339 in the business timezone.

use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;
use ulid::Ulid;

use crate::model::*;

pub fn rfc3339(tz: Tz, at: Ms) -> String {
    DateTime::from_timestamp_millis(at).map_or_else(|| at.to_string(), |t| t.with_timezone(&tz).to_rfc3339())
}

#[derive(Debug, Serialize)]
pub struct SlotView {
    pub start: String,
    pub end: String,
}

impl SlotView {
    pub fn new(tz: Tz, span: &Span) -> Self {
        Self {
            start: rfc3339(tz, span.start),
            end: rfc3339(tz, span.end),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ContactView {
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReservationView {
    pub id: Ulid,
    pub service_id: Ulid,
    pub status: StatusKind,
    pub start: String,
    pub end: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hold_expires_at: Option<String>,
    pub deposit_amount: Cents,
    pub deposit_paid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_notes: Option<String>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<String>,
    // Admin-only fields below.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<ContactView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_session: Option<String>,
}

impl ReservationView {
    /// What a customer holding the reservation id may see.
    pub fn public(tz: Tz, r: &Reservation) -> Self {
        Self {
            id: r.id,
            service_id: r.service_id,
            status: r.status.kind(),
            start: rfc3339(tz, r.span.start),
            end: rfc3339(tz, r.span.end),
            hold_expires_at: r.hold_expires_at().map(|t| rfc3339(tz, t)),
            deposit_amount: r.deposit.amount,
            deposit_paid: r.deposit.paid,
            customer_notes: r.customer_notes.clone(),
            created_at: rfc3339(tz, r.created_at),
            confirmed_at: r.confirmed_at.map(|t| rfc3339(tz, t)),
            cancelled_at: r.cancelled_at.map(|t| rfc3339(tz, t)),
            contact: None,
            admin_notes: None,
            payment_session: None,
        }
    }

    pub fn admin(tz: Tz, r: &Reservation) -> Self {
        Self {
            contact: Some(ContactView {
                name: r.contact.name.clone(),
                email: r.contact.email.clone(),
                phone: r.contact.phone.clone(),
            }),
            admin_notes: r.admin_notes.clone(),
            payment_session: r.payment_session.clone(),
            ..Self::public(tz, r)
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AlertView {
    pub id: Ulid,
    pub kind: AlertKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<Ulid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Ulid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Cents>,
    pub detail: String,
    pub raised_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<String>,
}

impl AlertView {
    pub fn new(tz: Tz, a: &OperatorAlert) -> Self {
        Self {
            id: a.id,
            kind: a.kind,
            reservation_id: a.reservation_id,
            order_id: a.order_id,
            session_id: a.session_id.clone(),
            amount: a.amount,
            detail: a.detail.clone(),
            raised_at: rfc3339(tz, a.raised_at),
            acknowledged_at: a.acknowledged_at.map(|t| rfc3339(tz, t)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderView {
    pub id: Ulid,
    pub status: OrderStatus,
    pub payment_session: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    pub lines: Vec<OrderLine>,
    pub total: Cents,
    pub amount_paid: Cents,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_note: Option<String>,
}

impl OrderView {
    pub fn new(tz: Tz, o: &Order) -> Self {
        Self {
            id: o.id,
            status: o.status,
            payment_session: o.payment_session.clone(),
            customer_email: o.customer_email.clone(),
            lines: o.lines.clone(),
            total: o.total,
            amount_paid: o.amount_paid,
            created_at: rfc3339(tz, o.created_at),
            resolved_at: o.resolved_at.map(|t| rfc3339(tz, t)),
            resolution_note: o.resolution_note.clone(),
        }
    }
}
