#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::NaiveTime;
use serde_json::{Value, json};
use tower::ServiceExt;
use ulid::Ulid;

use holdfast::auth::AdminAuth;
use holdfast::booking::BookingService;
use holdfast::clock::ManualClock;
use holdfast::engine::Engine;
use holdfast::http::{AppState, router};
use holdfast::model::*;
use holdfast::notify::NotifyHub;
use holdfast::payment::{SIGNATURE_HEADER, SandboxGateway, signature};

pub const ADMIN_TOKEN: &str = "admin-secret";
pub const WEBHOOK_SECRET: &str = "whsec_test";

/// Monday 2026-06-01, 08:00 UTC.
pub const NOW: Ms = 1_780_300_800_000;

/// Tuesday 2026-06-02, 10:00 UTC.
pub const TUESDAY_10: &str = "2026-06-02T10:00:00Z";

pub struct TestApp {
    pub router: Router,
    pub engine: Arc<Engine>,
    pub clock: Arc<ManualClock>,
    pub gateway: Arc<SandboxGateway>,
    pub service: Service,
}

fn wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("holdfast_test_http");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

/// Open 09:00-17:00 every day with one 60-minute service priced 6000.
pub async fn spawn_app(name: &str, deposit: Option<DepositPolicy>) -> TestApp {
    let clock = Arc::new(ManualClock::new(NOW));
    let engine = Arc::new(
        Engine::with_clock(wal_path(name), Arc::new(NotifyHub::new()), clock.clone()).unwrap(),
    );
    for day in 0..7 {
        engine
            .upsert_rule(AvailabilityRule {
                id: Ulid::new(),
                day_of_week: day,
                open: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                close: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
                active: true,
            })
            .await
            .unwrap();
    }
    let service = engine
        .upsert_service(Service {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            name: "Haircut".into(),
            duration_ms: HOUR,
            price: 6000,
            buffer_ms: Some(0),
            deposit,
            active: true,
        })
        .await
        .unwrap();

    let gateway = Arc::new(SandboxGateway::new("http://shop.test"));
    let booking = Arc::new(BookingService::new(
        engine.clone(),
        gateway.clone(),
        "USD",
        "http://shop.test/",
    ));
    let router = router(AppState::new(booking, WEBHOOK_SECRET), AdminAuth::new(ADMIN_TOKEN));
    TestApp {
        router,
        engine,
        clock,
        gateway,
        service,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(json_request("POST", uri, &body, None)).await
    }

    pub async fn admin(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = match body {
            Some(body) => json_request(method, uri, &body, Some(ADMIN_TOKEN)),
            None => Request::builder()
                .method(method)
                .uri(uri)
                .header("authorization", format!("Bearer {ADMIN_TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        };
        self.send(request).await
    }

    /// Place a hold at `start` for the fixture service.
    pub async fn hold(&self, start: &str) -> (StatusCode, Value) {
        self.post(
            "/holds",
            json!({
                "service_id": self.service.id,
                "start": start,
                "name": "Ada Lovelace",
                "email": "ada@example.com",
                "notes": "first visit"
            }),
        )
        .await
    }

    /// Deliver a webhook signed with the configured secret at the engine's clock.
    pub async fn webhook(&self, payload: &Value) -> (StatusCode, Value) {
        let body = serde_json::to_vec(payload).unwrap();
        let header = signature::signature_header(WEBHOOK_SECRET.as_bytes(), self.engine.now() / 1000, &body).unwrap();
        self.send(
            Request::builder()
                .method("POST")
                .uri("/webhooks/payments")
                .header("content-type", "application/json")
                .header(SIGNATURE_HEADER, header)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }

    /// Session id the sandbox issued most recently.
    pub async fn last_session(&self) -> String {
        let sessions = self.gateway.sessions().await;
        sessions.last().map(|(s, _)| s.id.clone()).unwrap()
    }
}

pub fn json_request(method: &str, uri: &str, body: &Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

/// A `checkout.session.*` event as the gateway would post it.
pub fn checkout_event(kind: &str, session_id: &str, reference: Option<&str>, amount: Cents, metadata: Value) -> Value {
    json!({
        "id": format!("evt_{}", Ulid::new()),
        "type": kind,
        "data": {
            "object": {
                "id": session_id,
                "client_reference_id": reference,
                "amount_total": amount,
                "payment_status": "paid",
                "customer_details": { "email": "ada@example.com" },
                "metadata": metadata
            }
        }
    })
}
