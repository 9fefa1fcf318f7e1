//! Payment gateway adapter: checkout sessions out, signed webhooks in.

pub mod gateway;
pub mod reconcile;
pub mod signature;
pub mod webhook;

pub use gateway::{
    CheckoutKind, CheckoutLine, CheckoutRequest, CheckoutSession, GatewayError, HttpGateway, PaymentGateway,
    SandboxGateway,
};
pub use reconcile::{WebhookOutcome, reconcile};
pub use signature::{SIGNATURE_HEADER, SignatureError};
pub use webhook::{GatewayEvent, Purpose, parse_event};
