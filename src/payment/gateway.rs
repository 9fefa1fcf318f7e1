use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::model::{Cents, Ms};

/// Stripe refuses checkout sessions that expire sooner than this.
const MIN_SESSION_LIFETIME_SECS: i64 = 30 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutKind {
    Reservation,
    Order,
}

impl CheckoutKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckoutKind::Reservation => "reservation",
            CheckoutKind::Order => "order",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutLine {
    pub name: String,
    pub unit_amount: Cents,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub kind: CheckoutKind,
    /// Reservation id, or a fresh cart id for storefront orders.
    pub client_reference_id: String,
    pub currency: String,
    pub lines: Vec<CheckoutLine>,
    pub customer_email: Option<String>,
    pub expires_at: Option<Ms>,
    /// Extra metadata echoed back on webhook events.
    pub metadata: Vec<(String, String)>,
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutRequest {
    pub fn amount(&self) -> Cents {
        self.lines
            .iter()
            .map(|l| l.unit_amount.saturating_mul(Cents::from(l.quantity)))
            .fold(0, Cents::saturating_add)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway unreachable: {0}")]
    Transport(String),
    #[error("gateway rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("unexpected gateway response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(&self, req: &CheckoutRequest) -> Result<CheckoutSession, GatewayError>;
}

// ── Stripe-compatible REST gateway ───────────────────────────────

pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

#[derive(Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, secret_key: impl Into<String>) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }

    /// Form fields in the gateway's bracketed-key encoding.
    fn form_params(req: &CheckoutRequest, now_secs: i64) -> Vec<(String, String)> {
        let mut params = vec![
            ("mode".to_string(), "payment".to_string()),
            ("client_reference_id".to_string(), req.client_reference_id.clone()),
            ("success_url".to_string(), req.success_url.clone()),
            ("cancel_url".to_string(), req.cancel_url.clone()),
            ("metadata[kind]".to_string(), req.kind.as_str().to_string()),
        ];
        if let Some(email) = &req.customer_email {
            params.push(("customer_email".into(), email.clone()));
        }
        if let Some(expires_at) = req.expires_at {
            let secs = (expires_at / 1000).max(now_secs + MIN_SESSION_LIFETIME_SECS);
            params.push(("expires_at".into(), secs.to_string()));
        }
        for (i, line) in req.lines.iter().enumerate() {
            let key = |field: &str| format!("line_items[{i}][{field}]");
            params.push((key("price_data][currency"), req.currency.clone()));
            params.push((key("price_data][unit_amount"), line.unit_amount.to_string()));
            params.push((key("price_data][product_data][name"), line.name.clone()));
            params.push((key("quantity"), line.quantity.to_string()));
        }
        for (k, v) in &req.metadata {
            params.push((format!("metadata[{k}]"), v.clone()));
        }
        params
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn create_checkout_session(&self, req: &CheckoutRequest) -> Result<CheckoutSession, GatewayError> {
        let params = Self::form_params(req, chrono::Utc::now().timestamp());
        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.base_url))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", format!("checkout-{}", req.client_reference_id))
            .form(&params)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), "checkout session rejected: {body}");
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        let url = session
            .url
            .ok_or_else(|| GatewayError::Decode("session has no redirect url".into()))?;
        Ok(CheckoutSession { id: session.id, url })
    }
}

// ── Sandbox gateway ──────────────────────────────────────────────

/// Local stand-in: issues session ids and URLs without calling anything,
/// and remembers every request.
pub struct SandboxGateway {
    public_url: String,
    requests: Mutex<Vec<(CheckoutSession, CheckoutRequest)>>,
    failing: AtomicBool,
}

impl SandboxGateway {
    pub fn new(public_url: impl Into<String>) -> Self {
        Self {
            public_url: public_url.into().trim_end_matches('/').to_string(),
            requests: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Make subsequent calls fail like an unreachable gateway.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn sessions(&self) -> Vec<(CheckoutSession, CheckoutRequest)> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn create_checkout_session(&self, req: &CheckoutRequest) -> Result<CheckoutSession, GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("sandbox gateway set to fail".into()));
        }
        let id = format!("cs_test_{}", Ulid::new());
        let session = CheckoutSession {
            url: format!("{}/sandbox/checkout/{id}", self.public_url),
            id,
        };
        tracing::info!(session = %session.id, kind = req.kind.as_str(), amount = req.amount(), "sandbox checkout session");
        self.requests.lock().await.push((session.clone(), req.clone()));
        Ok(session)
    }
}
