use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveTime;
use ulid::Ulid;

use holdfast::clock::ManualClock;
use holdfast::engine::{Engine, EngineError, HoldRequest, PaymentOutcome};
use holdfast::model::*;
use holdfast::notify::NotifyHub;

/// 2026-06-01 00:00 UTC.
const MIDNIGHT: Ms = 1_780_272_000_000;
const DAY: Ms = 24 * HOUR;
const SLOTS_PER_DAY: i64 = 16;

/// Start of the `k`-th bookable hour: 06:00-22:00 from tomorrow on.
fn slot(k: i64) -> Ms {
    MIDNIGHT + DAY * (1 + k / SLOTS_PER_DAY) + HOUR * (6 + k % SLOTS_PER_DAY)
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn contact(i: usize) -> Contact {
    Contact {
        name: format!("Bench {i}"),
        email: format!("bench{i}@example.com"),
        phone: None,
    }
}

async fn setup(engine: &Engine, deposits: &[Option<DepositPolicy>]) -> Vec<Service> {
    engine
        .update_settings(ReservationSettings {
            min_notice_ms: 0,
            buffer_ms: 0,
            max_days_out: 730,
            ..ReservationSettings::default()
        })
        .await
        .unwrap();
    for day in 0..7 {
        engine
            .upsert_rule(AvailabilityRule {
                id: Ulid::new(),
                day_of_week: day,
                open: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
                close: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
                active: true,
            })
            .await
            .unwrap();
    }

    let mut services = Vec::new();
    for (i, deposit) in deposits.iter().enumerate() {
        let service = engine
            .upsert_service(Service {
                id: Ulid::new(),
                resource_id: Ulid::new(),
                name: format!("Chair {i}"),
                duration_ms: HOUR,
                price: 6000,
                buffer_ms: None,
                deposit: *deposit,
                active: true,
            })
            .await
            .unwrap();
        services.push(service);
    }
    println!("  created {} services on separate resources", services.len());
    services
}

async fn phase1_sequential(engine: &Engine, service: &Service) {
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for k in 0..n {
        let t = Instant::now();
        engine
            .place_hold(HoldRequest {
                service_id: service.id,
                start: slot(k as i64),
                contact: contact(k),
                notes: None,
            })
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} holds in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("place_hold", &mut latencies);
}

/// Many callers race for the same slots. Exactly one hold per slot may win.
async fn phase2_contention(engine: &Arc<Engine>, services: &[Service]) {
    let slots_per_service = 50;
    let racers_per_slot = 8;
    let start = Instant::now();

    let mut handles = Vec::new();
    for service in services {
        for k in 0..slots_per_service {
            for r in 0..racers_per_slot {
                let engine = engine.clone();
                let req = HoldRequest {
                    service_id: service.id,
                    start: slot(k),
                    contact: contact(r),
                    notes: None,
                };
                handles.push(tokio::spawn(async move {
                    let t = Instant::now();
                    let result = engine.place_hold(req).await;
                    (result, t.elapsed())
                }));
            }
        }
    }

    let mut won = 0;
    let mut lost = 0;
    let mut latencies = Vec::with_capacity(handles.len());
    for (result, latency) in futures::future::join_all(handles).await.into_iter().map(Result::unwrap) {
        latencies.push(latency);
        match result {
            Ok(_) => won += 1,
            Err(EngineError::SlotUnavailable { .. }) => lost += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    let elapsed = start.elapsed();
    let expected = services.len() * slots_per_service as usize;
    println!(
        "  {} attempts in {:.2}s: {won} won, {lost} rejected (expected {expected} winners)",
        won + lost,
        elapsed.as_secs_f64()
    );
    assert_eq!(won, expected, "double booking under contention");
    print_latency("contended place_hold", &mut latencies);
}

/// Availability queries while writers keep booking.
async fn phase3_read_under_load(engine: &Arc<Engine>, service: &Service) {
    let writers = 8;
    let per_writer = 200;
    let readers = 4;
    let reads_per_reader = 500;

    let mut writer_handles = Vec::new();
    for w in 0..writers {
        let engine = engine.clone();
        let service_id = service.id;
        writer_handles.push(tokio::spawn(async move {
            for i in 0..per_writer {
                let k = (w * per_writer + i) as i64;
                let _ = engine
                    .place_hold(HoldRequest {
                        service_id,
                        start: slot(k),
                        contact: contact(i),
                        notes: None,
                    })
                    .await;
            }
        }));
    }

    let mut reader_handles = Vec::new();
    for r in 0..readers {
        let engine = engine.clone();
        let service_id = service.id;
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let date = chrono::DateTime::from_timestamp_millis(slot(((r * reads_per_reader + i) * 7) as i64))
                    .unwrap()
                    .date_naive();
                let t = Instant::now();
                engine.open_slots(service_id, date).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    futures::future::join_all(writer_handles).await;
    let mut latencies: Vec<Duration> = futures::future::join_all(reader_handles)
        .await
        .into_iter()
        .flat_map(Result::unwrap)
        .collect();
    print_latency("open_slots under write load", &mut latencies);
}

/// Deposit holds confirmed by payment, each delivered twice.
async fn phase4_payments(engine: &Arc<Engine>, service: &Service) {
    let n = 500;
    let mut ids = Vec::with_capacity(n);
    for k in 0..n {
        let res = engine
            .place_hold(HoldRequest {
                service_id: service.id,
                start: slot(k as i64),
                contact: contact(k),
                notes: None,
            })
            .await
            .unwrap();
        engine
            .attach_payment_session(res.id, format!("cs_bench_{k}"))
            .await
            .unwrap();
        ids.push((res.id, res.deposit.amount, format!("cs_bench_{k}")));
    }

    let start = Instant::now();
    let deliveries = ids.iter().cycle().take(2 * n).map(|(id, amount, session)| {
        let engine = engine.clone();
        let (id, amount, session) = (*id, *amount, session.clone());
        async move {
            let t = Instant::now();
            let outcome = engine.confirm_payment(id, &session, amount).await.unwrap();
            (outcome, t.elapsed())
        }
    });
    let results = futures::future::join_all(deliveries).await;
    let elapsed = start.elapsed();

    let confirmed = results
        .iter()
        .filter(|(o, _)| matches!(o, PaymentOutcome::Confirmed(_)))
        .count();
    let duplicate = results
        .iter()
        .filter(|(o, _)| matches!(o, PaymentOutcome::AlreadyConfirmed(_)))
        .count();
    println!(
        "  {} deliveries in {:.2}s: {confirmed} confirmed, {duplicate} duplicates",
        results.len(),
        elapsed.as_secs_f64()
    );
    assert_eq!(confirmed, n);
    let mut latencies: Vec<Duration> = results.into_iter().map(|(_, l)| l).collect();
    print_latency("confirm_payment", &mut latencies);
}

#[tokio::main]
async fn main() {
    let dir = std::env::temp_dir().join(format!("holdfast_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let clock = Arc::new(ManualClock::new(MIDNIGHT + 8 * HOUR));
    let engine = Arc::new(Engine::with_clock(dir.join("bench.wal"), Arc::new(NotifyHub::new()), clock).unwrap());

    println!("=== holdfast stress benchmark ===");
    println!("wal: {}\n", dir.display());

    println!("[setup]");
    let mut deposits = vec![None; 12];
    deposits.push(Some(DepositPolicy::Percent { percent: 25 }));
    let services = setup(&engine, &deposits).await;

    println!("\n[phase 1] sequential hold throughput");
    phase1_sequential(&engine, &services[0]).await;

    println!("\n[phase 2] contention on shared slots");
    phase2_contention(&engine, &services[1..11]).await;

    println!("\n[phase 3] availability latency under write load");
    phase3_read_under_load(&engine, &services[11]).await;

    println!("\n[phase 4] payment confirmation");
    phase4_payments(&engine, &services[12]).await;

    println!("\n[compaction]");
    let appends = engine.wal_appends_since_compact().await;
    let t = Instant::now();
    let done = engine.compact_wal().await.unwrap();
    println!(
        "  {appends} appends compacted={done} in {:.2}ms",
        t.elapsed().as_secs_f64() * 1000.0
    );

    println!("\n=== benchmark complete ===");
    let _ = std::fs::remove_dir_all(&dir);
}
