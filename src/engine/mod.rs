mod alerts;
mod availability;
mod catalog;
mod conflict;
mod error;
mod fulfillment;
mod holds;
mod queries;
mod transitions;

pub use availability::{
    Occupied, available_dates, check_bookable, local_date, local_instant, merge_overlapping, open_slots,
    subtract_intervals,
};
pub use conflict::validate_contact;
pub use error::EngineError;
pub use fulfillment::{CartLine, OrderOutcome, validate_cart};
pub use holds::HoldRequest;
pub use transitions::{PaymentOutcome, TransitionOutcome};

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::lifecycle;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedCalendar = Arc<RwLock<Calendar>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while a flush is running are written
/// as one batch with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_control(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<Pending>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so the partial batch does not leak
    // into the next one; every caller in this batch is told it failed.
    let flushed = wal.flush_sync();
    let result = result.and(flushed);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    if let Err(e) = &result {
        tracing::error!("WAL flush failed: {e}");
    }
    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => {}
    }
}

// ── Engine ───────────────────────────────────────────────────

/// In-memory datastore for reservations, catalog, orders and alerts.
///
/// Every mutation runs inside the lock that guards the record it changes
/// (calendar, variant, order session), evaluates its guard there, and goes
/// through `commit`, which makes the event durable before applying it.
pub struct Engine {
    /// Per-resource calendars. The write lock is the serialization point for
    /// the no-overlap invariant.
    calendars: DashMap<Ulid, SharedCalendar>,
    /// reservation id → resource id
    reservation_index: DashMap<Ulid, Ulid>,
    /// checkout session id → reservation id
    session_index: DashMap<String, Ulid>,
    services: DashMap<Ulid, Service>,
    schedule: StdRwLock<Arc<Schedule>>,
    variants: DashMap<Ulid, Arc<Mutex<Variant>>>,
    orders: DashMap<Ulid, Order>,
    /// checkout session id → order id once placed. The mutex makes
    /// placement idempotent per session.
    order_sessions: DashMap<String, Arc<Mutex<Option<Ulid>>>>,
    alerts: DashMap<Ulid, OperatorAlert>,
    /// Serializes alert dedup checks with their inserts.
    alert_gate: Mutex<()>,
    /// Held shared by every commit and exclusively by compaction, so a
    /// snapshot never misses an event that reached the old log.
    compact_gate: RwLock<()>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        Self::with_clock(wal_path, notify, Arc::new(SystemClock))
    }

    pub fn with_clock(wal_path: PathBuf, notify: Arc<NotifyHub>, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        let wal = Wal::open_after_replay(&wal_path, &replay)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            calendars: DashMap::new(),
            reservation_index: DashMap::new(),
            session_index: DashMap::new(),
            services: DashMap::new(),
            schedule: StdRwLock::new(Arc::new(Schedule::default())),
            variants: DashMap::new(),
            orders: DashMap::new(),
            order_sessions: DashMap::new(),
            alerts: DashMap::new(),
            alert_gate: Mutex::new(()),
            compact_gate: RwLock::new(()),
            wal_tx,
            notify,
            clock,
        };

        // We are the only owner of every lock here, so try_* always succeeds.
        // Blocking variants would panic inside the runtime.
        for event in &replay.events {
            engine.replay_event(event)?;
        }
        tracing::info!(
            events = replay.events.len(),
            calendars = engine.calendars.len(),
            "engine state restored"
        );
        Ok(engine)
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Current settings, rules and blackouts.
    pub fn schedule(&self) -> Arc<Schedule> {
        self.schedule
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_schedule(&self, edit: impl FnOnce(&mut Schedule)) {
        let mut guard = self.schedule.write().unwrap_or_else(PoisonError::into_inner);
        edit(Arc::make_mut(&mut guard));
    }

    fn replay_event(&self, event: &Event) -> io::Result<()> {
        if let Some(resource_id) = calendar_of(event) {
            let cal = self.calendar(resource_id);
            let mut guard = cal
                .try_write()
                .map_err(|_| io::Error::other("replay: calendar lock contended"))?;
            self.apply_to_calendar(&mut guard, event);
            return Ok(());
        }
        if let Event::OrderPlaced { stock_after, .. } = event {
            for (variant_id, quantity) in stock_after {
                if let Some(v) = self.variants.get(variant_id) {
                    let mut guard = v
                        .try_lock()
                        .map_err(|_| io::Error::other("replay: variant lock contended"))?;
                    guard.quantity = *quantity;
                }
            }
        }
        self.apply_global(event);
        Ok(())
    }

    /// Get or create the calendar for a resource.
    pub(crate) fn calendar(&self, resource_id: Ulid) -> SharedCalendar {
        self.calendars
            .entry(resource_id)
            .or_insert_with(|| Arc::new(RwLock::new(Calendar::new(resource_id))))
            .clone()
    }

    /// Apply a calendar event. Caller holds the calendar write lock.
    fn apply_to_calendar(&self, cal: &mut Calendar, event: &Event) {
        match event {
            Event::ReservationCreated { reservation } => {
                self.reservation_index.insert(reservation.id, reservation.resource_id);
                if let Some(session) = &reservation.payment_session {
                    self.session_index.insert(session.clone(), reservation.id);
                }
                cal.insert(reservation.clone());
            }
            Event::ReservationTransitioned { id, transition, at, .. } => {
                if let Some(r) = cal.get_mut(*id) {
                    lifecycle::apply(r, transition, *at);
                }
            }
            Event::PaymentSessionAttached { id, session_id, .. } => {
                if let Some(r) = cal.get_mut(*id) {
                    r.payment_session = Some(session_id.clone());
                    self.session_index.insert(session_id.clone(), *id);
                }
            }
            Event::NotesUpdated { id, notes, at, .. } => {
                if let Some(r) = cal.get_mut(*id) {
                    r.admin_notes = notes.clone();
                    r.updated_at = *at;
                }
            }
            _ => {}
        }
    }

    /// Apply an event that does not live in a calendar.
    fn apply_global(&self, event: &Event) {
        match event {
            Event::ServiceUpserted { service } => {
                self.services.insert(service.id, service.clone());
            }
            Event::SettingsUpdated { settings } => {
                self.replace_schedule(|s| s.settings = settings.clone());
            }
            Event::RuleUpserted { rule } => self.replace_schedule(|s| {
                s.rules.retain(|r| r.id != rule.id);
                s.rules.push(rule.clone());
            }),
            Event::RuleRemoved { id } => self.replace_schedule(|s| s.rules.retain(|r| r.id != *id)),
            Event::BlackoutAdded { blackout } => self.replace_schedule(|s| {
                s.blackouts.insert(blackout.date, blackout.clone());
            }),
            Event::BlackoutRemoved { date } => self.replace_schedule(|s| {
                s.blackouts.remove(date);
            }),
            Event::VariantUpserted { variant } => match self.variants.get(&variant.id) {
                Some(existing) => {
                    if let Ok(mut guard) = existing.try_lock() {
                        *guard = variant.clone();
                    }
                }
                None => {
                    self.variants
                        .insert(variant.id, Arc::new(Mutex::new(variant.clone())));
                }
            },
            Event::OrderPlaced { order, .. } => {
                self.order_sessions
                    .entry(order.payment_session.clone())
                    .or_default()
                    .try_lock()
                    .map(|mut slot| *slot = Some(order.id))
                    .ok();
                self.orders.insert(order.id, order.clone());
            }
            Event::OrderResolved { id, note, at } => {
                if let Some(mut order) = self.orders.get_mut(id) {
                    order.status = OrderStatus::Resolved;
                    order.resolved_at = Some(*at);
                    order.resolution_note = note.clone();
                }
            }
            Event::AlertRaised { alert } => {
                self.alerts.insert(alert.id, alert.clone());
            }
            Event::AlertAcknowledged { id, at } => {
                if let Some(mut alert) = self.alerts.get_mut(id) {
                    alert.acknowledged_at = Some(*at);
                }
            }
            _ => {}
        }
    }

    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Make `event` durable, then run `apply`. Nothing changes in memory if
    /// the append fails.
    pub(super) async fn commit<R>(&self, event: &Event, apply: impl FnOnce() -> R) -> Result<R, EngineError> {
        let _gate = self.compact_gate.read().await;
        self.wal_append(event).await?;
        Ok(apply())
    }

    /// Commit a calendar event and apply it to the locked calendar.
    pub(super) async fn commit_to_calendar(&self, cal: &mut Calendar, event: &Event) -> Result<(), EngineError> {
        self.commit(event, || self.apply_to_calendar(cal, event)).await
    }

    /// Commit an event that lives outside the calendars.
    pub(super) async fn commit_global(&self, event: &Event) -> Result<(), EngineError> {
        self.commit(event, || self.apply_global(event)).await
    }

    pub fn resource_of(&self, reservation_id: Ulid) -> Option<Ulid> {
        self.reservation_index.get(&reservation_id).map(|e| *e.value())
    }

    pub fn reservation_for_session(&self, session_id: &str) -> Option<Ulid> {
        self.session_index.get(session_id).map(|e| *e.value())
    }

    /// Look up the calendar holding a reservation and take its write lock.
    pub(super) async fn lock_reservation(
        &self,
        id: Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<Calendar>, EngineError> {
        let resource_id = self.resource_of(id).ok_or(EngineError::NotFound(id))?;
        let cal = self
            .calendars
            .get(&resource_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(resource_id))?;
        Ok(cal.write_owned().await)
    }

    /// Rewrite the WAL as the minimal event set that recreates current state.
    /// Returns false without compacting if some lock was busy; try again later.
    pub async fn compact_wal(&self) -> Result<bool, EngineError> {
        let _gate = self.compact_gate.write().await;
        let Some(events) = self.snapshot_events() else {
            tracing::debug!("compaction skipped: state busy");
            return Ok(false);
        };
        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        tracing::info!(events = count, "WAL compacted");
        Ok(true)
    }

    fn snapshot_events(&self) -> Option<Vec<Event>> {
        let schedule = self.schedule();
        let mut events = vec![Event::SettingsUpdated {
            settings: schedule.settings.clone(),
        }];
        events.extend(schedule.rules.iter().map(|rule| Event::RuleUpserted { rule: rule.clone() }));
        events.extend(
            schedule
                .blackouts
                .values()
                .map(|b| Event::BlackoutAdded { blackout: b.clone() }),
        );
        events.extend(self.services.iter().map(|s| Event::ServiceUpserted {
            service: s.value().clone(),
        }));
        for entry in self.variants.iter() {
            let variant = entry.value().try_lock().ok()?.clone();
            events.push(Event::VariantUpserted { variant });
        }
        for entry in self.calendars.iter() {
            let cal = entry.value().try_read().ok()?;
            events.extend(cal.reservations.iter().map(|r| Event::ReservationCreated {
                reservation: r.clone(),
            }));
        }
        // Stock levels are already in the variant snapshots above.
        events.extend(self.orders.iter().map(|o| Event::OrderPlaced {
            order: o.value().clone(),
            stock_after: Vec::new(),
        }));
        events.extend(self.alerts.iter().map(|a| Event::AlertRaised {
            alert: a.value().clone(),
        }));
        Some(events)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// The resource whose calendar an event belongs to, if any.
fn calendar_of(event: &Event) -> Option<Ulid> {
    match event {
        Event::ReservationCreated { reservation } => Some(reservation.resource_id),
        Event::ReservationTransitioned { resource_id, .. }
        | Event::PaymentSessionAttached { resource_id, .. }
        | Event::NotesUpdated { resource_id, .. } => Some(*resource_id),
        _ => None,
    }
}
