use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;

use crate::limits::MAX_QUERY_DAYS;
use crate::model::*;

use super::EngineError;

/// A reservation's footprint as seen by the availability engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupied {
    pub span: Span,
    pub buffer_ms: Ms,
}

impl Occupied {
    pub fn of(reservation: &Reservation) -> Self {
        Self {
            span: reservation.span,
            buffer_ms: reservation.buffer_ms,
        }
    }
}

// ── Local time ───────────────────────────────────────────────────

/// Instant of a wall-clock time in `tz`. Ambiguous times (DST fall-back)
/// resolve to the earlier instant; times inside a DST gap move forward an hour.
pub fn local_instant(tz: Tz, date: NaiveDate, time: NaiveTime) -> Ms {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.timestamp_millis(),
        LocalResult::Ambiguous(earliest, _) => earliest.timestamp_millis(),
        LocalResult::None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .map_or_else(|| naive.and_utc().timestamp_millis(), |dt| dt.timestamp_millis()),
    }
}

pub fn local_date(tz: Tz, at: Ms) -> NaiveDate {
    DateTime::from_timestamp_millis(at)
        .unwrap_or_default()
        .with_timezone(&tz)
        .date_naive()
}

/// Opening windows on `date` from the weekly rules, merged.
fn opening_windows(schedule: &Schedule, date: NaiveDate) -> Vec<Span> {
    let tz = schedule.settings.timezone;
    let mut windows: Vec<Span> = schedule
        .rules_for(date)
        .filter_map(|rule| {
            let open = local_instant(tz, date, rule.open);
            let close = local_instant(tz, date, rule.close);
            (open < close).then(|| Span::new(open, close))
        })
        .collect();
    windows.sort_by_key(|s| s.start);
    merge_overlapping(&windows)
}

fn within_horizon(schedule: &Schedule, date: NaiveDate, now: Ms) -> bool {
    let today = local_date(schedule.settings.timezone, now);
    date >= today && (date - today).num_days() <= i64::from(schedule.settings.max_days_out)
}

// ── Slots ────────────────────────────────────────────────────────

/// Candidate start slots for `service` on `date`, ordered and non-overlapping.
///
/// Each rule window is cut into a grid of `duration_ms` steps from its open
/// time. A cell is offered if it starts after the notice window and misses
/// every occupied reservation widened by the larger of the two buffers.
/// Pure: same inputs give the same output.
pub fn open_slots(
    schedule: &Schedule,
    service: &Service,
    date: NaiveDate,
    occupied: &[Occupied],
    now: Ms,
) -> Vec<Span> {
    if !service.active
        || service.duration_ms <= 0
        || schedule.is_blackout(date)
        || !within_horizon(schedule, date, now)
    {
        return Vec::new();
    }
    let windows = opening_windows(schedule, date);
    if windows.is_empty() {
        return Vec::new();
    }

    let buffer = schedule.buffer_for(service);
    let mut blocked: Vec<Span> = occupied
        .iter()
        .map(|o| o.span.widen(buffer.max(o.buffer_ms)))
        .collect();
    blocked.sort_by_key(|s| s.start);
    let blocked = merge_overlapping(&blocked);
    let free = subtract_intervals(&windows, &blocked);

    let earliest = now + schedule.settings.min_notice_ms;
    let step = service.duration_ms;
    let mut slots = Vec::new();
    for window in &windows {
        let mut t = window.start;
        while t + step <= window.end {
            let cell = Span::new(t, t + step);
            if t >= earliest && fits(&free, &cell) {
                slots.push(cell);
            }
            t += step;
        }
    }
    slots
}

fn fits(free: &[Span], cell: &Span) -> bool {
    let idx = free.partition_point(|f| f.start <= cell.start);
    idx > 0 && free[idx - 1].contains_span(cell)
}

/// Dates in `[from, to]` with at least one open slot, at most `MAX_QUERY_DAYS`.
pub fn available_dates(
    schedule: &Schedule,
    service: &Service,
    from: NaiveDate,
    to: NaiveDate,
    occupied: &[Occupied],
    now: Ms,
) -> Vec<NaiveDate> {
    from.iter_days()
        .take_while(|d| *d <= to)
        .take(MAX_QUERY_DAYS as usize)
        .filter(|d| !open_slots(schedule, service, *d, occupied, now).is_empty())
        .collect()
}

/// Schedule checks for a requested span: active service, notice window,
/// blackout, horizon and opening hours. Overlap is checked separately.
pub fn check_bookable(schedule: &Schedule, service: &Service, span: &Span, now: Ms) -> Result<(), EngineError> {
    if !service.active {
        return Err(EngineError::validation("service is not bookable"));
    }
    if span.start % MINUTE != 0 {
        return Err(EngineError::validation("start must fall on a whole minute"));
    }
    if span.start < now + schedule.settings.min_notice_ms {
        return Err(EngineError::validation("start is inside the minimum notice window"));
    }
    let date = local_date(schedule.settings.timezone, span.start);
    if schedule.is_blackout(date) {
        return Err(EngineError::validation("date is not available"));
    }
    if !within_horizon(schedule, date, now) {
        return Err(EngineError::validation("date is too far in advance"));
    }
    if !opening_windows(schedule, date).iter().any(|w| w.contains_span(span)) {
        return Err(EngineError::validation("outside opening hours"));
    }
    Ok(())
}

// ── Interval helpers ─────────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`. Both sorted by start; `to_remove` disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut cursor = b.start;
        while ri < to_remove.len() && to_remove[ri].end <= cursor {
            ri += 1;
        }
        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = to_remove[j];
            if r.start > cursor {
                result.push(Span::new(cursor, r.start));
            }
            cursor = cursor.max(r.end);
            j += 1;
        }
        if cursor < b.end {
            result.push(Span::new(cursor, b.end));
        }
    }
    result
}
