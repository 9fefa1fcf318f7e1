use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{Engine, TransitionOutcome};
use crate::lifecycle::{Actor, ExpiryReason, Transition};

const COMPACT_CHECK_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    /// Holds that were confirmed or released between collection and commit.
    pub skipped: usize,
    pub open_alerts: usize,
}

/// Expire every hold past its TTL. Each one goes through the guarded
/// transition, so a payment landing mid-sweep wins and is counted as skipped.
pub async fn sweep(engine: &Engine) -> SweepReport {
    let started = Instant::now();
    let mut report = SweepReport::default();
    let transition = Transition::Expire {
        reason: ExpiryReason::HoldTtl,
    };

    for (id, _resource) in engine.collect_expired_holds(engine.now()) {
        match engine.transition(id, transition, Actor::Janitor).await {
            Ok(TransitionOutcome::Applied(_)) => report.expired += 1,
            Ok(TransitionOutcome::Unchanged { why, .. }) => {
                debug!(reservation = %id, ?why, "sweep skip");
                report.skipped += 1;
            }
            Err(e) => {
                warn!(reservation = %id, "sweep could not expire hold: {e}");
                report.skipped += 1;
            }
        }
    }

    report.open_alerts = engine.open_alert_count();
    metrics::counter!(crate::observability::JANITOR_EXPIRED_TOTAL).increment(report.expired as u64);
    metrics::gauge!(crate::observability::ALERTS_OPEN).set(report.open_alerts as f64);
    metrics::histogram!(crate::observability::JANITOR_SWEEP_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    if report.expired > 0 {
        info!(expired = report.expired, skipped = report.skipped, "expired stale holds");
    }
    if report.open_alerts > 0 {
        warn!(open_alerts = report.open_alerts, "operator alerts awaiting acknowledgement");
    }
    report
}

/// Background task: sweep every `period` until cancelled.
pub async fn run_janitor(engine: Arc<Engine>, period: Duration, token: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                sweep(&engine).await;
            }
        }
    }
    info!("janitor stopped");
}

/// Background task: compact the WAL once `threshold` appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, token: CancellationToken) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_PERIOD);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                let appends = engine.wal_appends_since_compact().await;
                if appends < threshold {
                    continue;
                }
                match engine.compact_wal().await {
                    Ok(true) => {}
                    Ok(false) => debug!(appends, "compaction deferred"),
                    Err(e) => warn!("WAL compaction failed: {e}"),
                }
            }
        }
    }
}
