//! Customer-facing flows that span the engine and the payment gateway.

use std::sync::Arc;

use tracing::{error, info};
use ulid::Ulid;

use crate::engine::{CartLine, Engine, EngineError, HoldRequest};
use crate::lifecycle::{Actor, Transition};
use crate::model::{Reservation, ReservationStatus};
use crate::payment::webhook::encode_lines;
use crate::payment::{CheckoutKind, CheckoutLine, CheckoutRequest, CheckoutSession, GatewayError, PaymentGateway};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldOutcome {
    /// No deposit was due; the reservation is already confirmed.
    Confirmed(Reservation),
    /// The customer must pay the deposit at `checkout_url` before the hold expires.
    CheckoutRequired { reservation: Reservation, checkout_url: String },
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

pub struct BookingService {
    engine: Arc<Engine>,
    gateway: Arc<dyn PaymentGateway>,
    currency: String,
    public_url: String,
}

impl BookingService {
    pub fn new(
        engine: Arc<Engine>,
        gateway: Arc<dyn PaymentGateway>,
        currency: impl Into<String>,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            gateway,
            currency: currency.into().to_ascii_lowercase(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Hold a slot and, when a deposit is due, open a checkout session for it.
    ///
    /// If the gateway cannot be reached the hold is cancelled straight away so
    /// the slot does not stay blocked until the TTL runs out.
    pub async fn create_hold(&self, req: HoldRequest) -> Result<HoldOutcome, BookingError> {
        let reservation = self.engine.place_hold(req).await?;
        let ReservationStatus::Hold { expires_at } = reservation.status else {
            return Ok(HoldOutcome::Confirmed(reservation));
        };
        let service_name = self
            .engine
            .service(reservation.service_id)
            .map_or_else(|| "Appointment".to_string(), |s| s.name);

        let id = reservation.id;
        let checkout = CheckoutRequest {
            kind: CheckoutKind::Reservation,
            client_reference_id: id.to_string(),
            currency: self.currency.clone(),
            lines: vec![CheckoutLine {
                name: format!("Deposit: {service_name}"),
                unit_amount: reservation.deposit.amount,
                quantity: 1,
            }],
            customer_email: Some(reservation.contact.email.clone()),
            expires_at: Some(expires_at),
            metadata: vec![("reservation_id".into(), id.to_string())],
            success_url: format!("{}/reservations/{id}?checkout=success", self.public_url),
            cancel_url: format!("{}/reservations/{id}?checkout=cancelled", self.public_url),
        };

        let session = match self.gateway.create_checkout_session(&checkout).await {
            Ok(session) => session,
            Err(e) => {
                metrics::counter!(crate::observability::CHECKOUT_SESSIONS_TOTAL, "kind" => "reservation", "status" => "failed")
                    .increment(1);
                error!(reservation = %id, "checkout session failed, releasing hold: {e}");
                if let Err(release) = self.engine.transition(id, Transition::Cancel, Actor::System).await {
                    error!(reservation = %id, "could not release hold: {release}");
                }
                return Err(e.into());
            }
        };
        metrics::counter!(crate::observability::CHECKOUT_SESSIONS_TOTAL, "kind" => "reservation", "status" => "created")
            .increment(1);
        self.engine
            .attach_payment_session(id, session.id.clone())
            .await?;
        info!(reservation = %id, session = %session.id, "deposit checkout opened");

        let reservation = self
            .engine
            .get_reservation(id)
            .await
            .ok_or(EngineError::NotFound(id))?;
        Ok(HoldOutcome::CheckoutRequired {
            reservation,
            checkout_url: session.url,
        })
    }

    /// Open a checkout for a storefront cart. Stock is only taken once the
    /// payment completes.
    pub async fn start_order_checkout(
        &self,
        lines: &[CartLine],
        customer_email: Option<String>,
    ) -> Result<CheckoutSession, BookingError> {
        let quoted = self.engine.quote_cart(lines).await?;
        let folded: Vec<CartLine> = quoted.iter().map(|(line, _)| *line).collect();
        let cart_id = Ulid::new();
        let checkout = CheckoutRequest {
            kind: CheckoutKind::Order,
            client_reference_id: cart_id.to_string(),
            currency: self.currency.clone(),
            lines: quoted
                .iter()
                .map(|(line, variant)| CheckoutLine {
                    name: variant.name.clone(),
                    unit_amount: variant.price,
                    quantity: line.quantity,
                })
                .collect(),
            customer_email,
            expires_at: None,
            metadata: vec![("lines".into(), encode_lines(&folded))],
            success_url: format!("{}/shop/thanks?cart={cart_id}", self.public_url),
            cancel_url: format!("{}/shop/cart", self.public_url),
        };
        let result = self.gateway.create_checkout_session(&checkout).await;
        let status = if result.is_ok() { "created" } else { "failed" };
        metrics::counter!(crate::observability::CHECKOUT_SESSIONS_TOTAL, "kind" => "order", "status" => status)
            .increment(1);
        let session = result?;
        info!(cart = %cart_id, session = %session.id, amount = checkout.amount(), "order checkout opened");
        Ok(session)
    }
}
