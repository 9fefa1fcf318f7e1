use std::time::Instant;

use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::limits::MAX_QUERY_DAYS;
use crate::model::*;

use super::availability::{Occupied, available_dates, local_instant, open_slots};
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_reservation(&self, id: Ulid) -> Option<Reservation> {
        let resource_id = self.resource_of(id)?;
        let cal = self.calendars.get(&resource_id)?.value().clone();
        let guard = cal.read().await;
        guard.get(id).cloned()
    }

    /// All reservations, ordered by start. Optionally only one status.
    pub async fn list_reservations(&self, status: Option<StatusKind>) -> Vec<Reservation> {
        let cals: Vec<_> = self.calendars.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for cal in cals {
            let guard = cal.read().await;
            out.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| status.is_none_or(|s| r.status.kind() == s))
                    .cloned(),
            );
        }
        out.sort_by_key(|r| (r.span.start, r.id));
        out
    }

    /// Footprints on a resource that hide slots inside `window`.
    async fn occupied(&self, resource_id: Ulid, window: &Span, now: Ms) -> Vec<Occupied> {
        let Some(cal) = self.calendars.get(&resource_id).map(|e| e.value().clone()) else {
            return Vec::new();
        };
        let guard = cal.read().await;
        guard
            .near(window, crate::limits::MAX_BUFFER_MS)
            .filter(|r| r.occupies(now))
            .map(Occupied::of)
            .collect()
    }

    /// Bounds of a run of local dates, with a day of slack on each side for
    /// buffers reaching across midnight.
    fn date_window(schedule: &Schedule, from: NaiveDate, to: NaiveDate) -> Span {
        let tz = schedule.settings.timezone;
        let start = local_instant(tz, from, NaiveTime::MIN) - DAY;
        let end = local_instant(tz, to, NaiveTime::MIN) + 2 * DAY;
        Span { start, end }
    }

    pub async fn open_slots(&self, service_id: Ulid, date: NaiveDate) -> Result<Vec<Span>, EngineError> {
        let service = self.service(service_id).ok_or(EngineError::NotFound(service_id))?;
        let schedule = self.schedule();
        let now = self.now();
        let occupied = self
            .occupied(service.resource_id, &Self::date_window(&schedule, date, date), now)
            .await;

        let started = Instant::now();
        let slots = open_slots(&schedule, &service, date, &occupied, now);
        metrics::histogram!(crate::observability::AVAILABILITY_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(slots)
    }

    pub async fn available_dates(
        &self,
        service_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<NaiveDate>, EngineError> {
        if to < from {
            return Err(EngineError::validation("`to` must not be before `from`"));
        }
        if (to - from).num_days() >= MAX_QUERY_DAYS {
            return Err(EngineError::LimitExceeded("date range too long"));
        }
        let service = self.service(service_id).ok_or(EngineError::NotFound(service_id))?;
        let schedule = self.schedule();
        let now = self.now();
        let occupied = self
            .occupied(service.resource_id, &Self::date_window(&schedule, from, to), now)
            .await;
        Ok(available_dates(&schedule, &service, from, to, &occupied, now))
    }
}
