use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, NaiveTime};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::lifecycle::{Actor, Transition};

/// Unix milliseconds. The only instant type inside the engine.
pub type Ms = i64;

/// Money in the smallest currency unit.
pub type Cents = i64;

pub const MINUTE: Ms = 60_000;
pub const HOUR: Ms = 60 * MINUTE;
pub const DAY: Ms = 24 * HOUR;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Grow both edges by `by` (buffer time before and after).
    pub fn widen(&self, by: Ms) -> Span {
        Span {
            start: self.start - by,
            end: self.end + by,
        }
    }
}

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositPolicy {
    Flat { amount: Cents },
    Percent { percent: u8 },
}

impl DepositPolicy {
    /// Amount due up front for a service with the given price.
    pub fn amount_due(&self, price: Cents) -> Cents {
        match *self {
            DepositPolicy::Flat { amount } => amount.clamp(0, price.max(0)),
            DepositPolicy::Percent { percent } => {
                let pct = Cents::from(percent.min(100));
                (price.max(0) * pct + 50) / 100
            }
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        match *self {
            DepositPolicy::Flat { amount } if amount < 0 => Err("deposit amount must not be negative"),
            DepositPolicy::Percent { percent } if percent > 100 => Err("deposit percent must be at most 100"),
            _ => Ok(()),
        }
    }
}

/// A bookable offering. Owned by the catalog; the core only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    /// The calendar this service books against (e.g. the practitioner).
    pub resource_id: Ulid,
    pub name: String,
    pub duration_ms: Ms,
    pub price: Cents,
    /// Overrides the settings buffer when set.
    pub buffer_ms: Option<Ms>,
    /// Overrides the settings default deposit when set.
    pub deposit: Option<DepositPolicy>,
    pub active: bool,
}

/// Recurring weekly opening window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub id: Ulid,
    /// 0 = Sunday … 6 = Saturday.
    pub day_of_week: u8,
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub active: bool,
}

impl AvailabilityRule {
    pub fn applies_to(&self, date: NaiveDate) -> bool {
        self.active && u32::from(self.day_of_week) == date.weekday().num_days_from_sunday()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackoutDate {
    pub date: NaiveDate,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationSettings {
    pub timezone: Tz,
    pub min_notice_ms: Ms,
    pub buffer_ms: Ms,
    pub max_days_out: u32,
    pub hold_ttl_ms: Ms,
    pub default_deposit: Option<DepositPolicy>,
}

impl Default for ReservationSettings {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            min_notice_ms: 2 * HOUR,
            buffer_ms: 15 * MINUTE,
            max_days_out: 60,
            hold_ttl_ms: 15 * MINUTE,
            default_deposit: None,
        }
    }
}

/// Everything the availability engine and hold manager read from settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    pub settings: ReservationSettings,
    pub rules: Vec<AvailabilityRule>,
    pub blackouts: BTreeMap<NaiveDate, BlackoutDate>,
}

impl Schedule {
    pub fn buffer_for(&self, service: &Service) -> Ms {
        service.buffer_ms.unwrap_or(self.settings.buffer_ms)
    }

    pub fn deposit_due(&self, service: &Service) -> Cents {
        service
            .deposit
            .or(self.settings.default_deposit)
            .map_or(0, |policy| policy.amount_due(service.price))
    }

    pub fn is_blackout(&self, date: NaiveDate) -> bool {
        self.blackouts.contains_key(&date)
    }

    pub fn rules_for(&self, date: NaiveDate) -> impl Iterator<Item = &AvailabilityRule> {
        self.rules.iter().filter(move |r| r.applies_to(date))
    }
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Hold,
    Confirmed,
    Cancelled,
    Expired,
    Completed,
    NoShow,
}

impl StatusKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusKind::Hold => "hold",
            StatusKind::Confirmed => "confirmed",
            StatusKind::Cancelled => "cancelled",
            StatusKind::Expired => "expired",
            StatusKind::Completed => "completed",
            StatusKind::NoShow => "no_show",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hold" => Some(StatusKind::Hold),
            "confirmed" => Some(StatusKind::Confirmed),
            "cancelled" => Some(StatusKind::Cancelled),
            "expired" => Some(StatusKind::Expired),
            "completed" => Some(StatusKind::Completed),
            "no_show" => Some(StatusKind::NoShow),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StatusKind::Cancelled | StatusKind::Expired | StatusKind::Completed | StatusKind::NoShow
        )
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reservation status. The hold deadline only exists on the `Hold` variant,
/// so "expires_at is set iff status = hold" cannot be violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Hold { expires_at: Ms },
    Confirmed,
    Cancelled,
    Expired,
    Completed,
    NoShow,
}

impl ReservationStatus {
    pub fn kind(&self) -> StatusKind {
        match self {
            ReservationStatus::Hold { .. } => StatusKind::Hold,
            ReservationStatus::Confirmed => StatusKind::Confirmed,
            ReservationStatus::Cancelled => StatusKind::Cancelled,
            ReservationStatus::Expired => StatusKind::Expired,
            ReservationStatus::Completed => StatusKind::Completed,
            ReservationStatus::NoShow => StatusKind::NoShow,
        }
    }

    pub fn hold_expires_at(&self) -> Option<Ms> {
        match self {
            ReservationStatus::Hold { expires_at } => Some(*expires_at),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub amount: Cents,
    pub paid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub service_id: Ulid,
    pub resource_id: Ulid,
    pub span: Span,
    /// Buffer in effect when the reservation was made.
    pub buffer_ms: Ms,
    pub contact: Contact,
    pub customer_notes: Option<String>,
    pub status: ReservationStatus,
    pub deposit: Deposit,
    pub payment_session: Option<String>,
    pub admin_notes: Option<String>,
    pub created_at: Ms,
    pub confirmed_at: Option<Ms>,
    pub cancelled_at: Option<Ms>,
    pub updated_at: Ms,
}

impl Reservation {
    pub fn hold_expires_at(&self) -> Option<Ms> {
        self.status.hold_expires_at()
    }

    /// Hold or confirmed: counts against the no-overlap invariant.
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            ReservationStatus::Hold { .. } | ReservationStatus::Confirmed
        )
    }

    /// Active and not a hold past its deadline: hides the slot from availability.
    pub fn occupies(&self, now: Ms) -> bool {
        match self.status {
            ReservationStatus::Hold { expires_at } => expires_at > now,
            ReservationStatus::Confirmed => true,
            _ => false,
        }
    }

    pub fn is_stale_hold(&self, now: Ms) -> bool {
        matches!(self.status, ReservationStatus::Hold { expires_at } if expires_at <= now)
    }

    /// Does `span` (booked with `buffer`) collide with this reservation?
    pub fn conflicts_with(&self, span: &Span, buffer: Ms) -> bool {
        let b = buffer.max(self.buffer_ms);
        self.span.widen(b).overlaps(span)
    }
}

/// All reservations on one bookable resource, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct Calendar {
    pub resource_id: Ulid,
    pub reservations: Vec<Reservation>,
    /// Longest reservation seen, used to bound overlap scans.
    longest_ms: Ms,
}

impl Calendar {
    pub fn new(resource_id: Ulid) -> Self {
        Self {
            resource_id,
            reservations: Vec::new(),
            longest_ms: 0,
        }
    }

    /// Insert (or replace) a reservation, keeping sort order by start.
    pub fn insert(&mut self, reservation: Reservation) {
        if let Some(pos) = self.position(reservation.id) {
            self.reservations.remove(pos);
        }
        self.longest_ms = self.longest_ms.max(reservation.span.duration_ms() + reservation.buffer_ms);
        let pos = self
            .reservations
            .partition_point(|r| r.span.start <= reservation.span.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn position(&self, id: Ulid) -> Option<usize> {
        self.reservations.iter().position(|r| r.id == id)
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Reservations whose span could intersect `query` once buffers are applied.
    pub fn near(&self, query: &Span, buffer: Ms) -> impl Iterator<Item = &Reservation> {
        let reach = buffer.max(0) + self.longest_ms;
        let left = self
            .reservations
            .partition_point(|r| r.span.start < query.start - reach);
        let right = self
            .reservations
            .partition_point(|r| r.span.start < query.end + reach);
        self.reservations[left..right.max(left)].iter()
    }
}

// ── Storefront ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: Ulid,
    pub sku: String,
    pub name: String,
    pub price: Cents,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub variant_id: Ulid,
    pub quantity: u32,
    pub unit_price: Cents,
    /// Units taken from stock: all of `quantity`, or none when the line is short.
    pub allocated: u32,
}

impl OrderLine {
    pub fn is_short(&self) -> bool {
        self.allocated < self.quantity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Paid,
    NeedsAttention,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: Ulid,
    pub payment_session: String,
    pub customer_email: Option<String>,
    pub lines: Vec<OrderLine>,
    pub total: Cents,
    pub amount_paid: Cents,
    pub status: OrderStatus,
    pub created_at: Ms,
    pub resolved_at: Option<Ms>,
    pub resolution_note: Option<String>,
}

// ── Operator alerts ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    PaidAfterExpiry,
    PaidAfterCancellation,
    UnknownPaymentReference,
    Underpaid,
    Oversold,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::PaidAfterExpiry => "paid_after_expiry",
            AlertKind::PaidAfterCancellation => "paid_after_cancellation",
            AlertKind::UnknownPaymentReference => "unknown_payment_reference",
            AlertKind::Underpaid => "underpaid",
            AlertKind::Oversold => "oversold",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorAlert {
    pub id: Ulid,
    pub kind: AlertKind,
    pub reservation_id: Option<Ulid>,
    pub order_id: Option<Ulid>,
    pub session_id: Option<String>,
    pub amount: Option<Cents>,
    pub detail: String,
    pub raised_at: Ms,
    pub acknowledged_at: Option<Ms>,
}

// ── WAL records ──────────────────────────────────────────────────

/// WAL record format. One variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ServiceUpserted {
        service: Service,
    },
    SettingsUpdated {
        settings: ReservationSettings,
    },
    RuleUpserted {
        rule: AvailabilityRule,
    },
    RuleRemoved {
        id: Ulid,
    },
    BlackoutAdded {
        blackout: BlackoutDate,
    },
    BlackoutRemoved {
        date: NaiveDate,
    },
    /// New hold, or a full reservation snapshot written by compaction.
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationTransitioned {
        id: Ulid,
        resource_id: Ulid,
        transition: Transition,
        actor: Actor,
        at: Ms,
    },
    PaymentSessionAttached {
        id: Ulid,
        resource_id: Ulid,
        session_id: String,
    },
    NotesUpdated {
        id: Ulid,
        resource_id: Ulid,
        notes: Option<String>,
        at: Ms,
    },
    VariantUpserted {
        variant: Variant,
    },
    /// Order plus the absolute stock level of every variant it touched.
    OrderPlaced {
        order: Order,
        stock_after: Vec<(Ulid, u32)>,
    },
    OrderResolved {
        id: Ulid,
        note: Option<String>,
        at: Ms,
    },
    AlertRaised {
        alert: OperatorAlert,
    },
    AlertAcknowledged {
        id: Ulid,
        at: Ms,
    },
}
