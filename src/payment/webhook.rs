use std::collections::HashMap;

use serde::Deserialize;
use ulid::Ulid;

use crate::engine::CartLine;
use crate::model::Cents;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";
pub const CHECKOUT_EXPIRED: &str = "checkout.session.expired";

#[derive(Debug, Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    data: EnvelopeData,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    object: SessionObject,
}

#[derive(Debug, Default, Deserialize)]
struct SessionObject {
    #[serde(default)]
    id: String,
    #[serde(default)]
    client_reference_id: Option<String>,
    #[serde(default)]
    amount_total: Option<Cents>,
    #[serde(default)]
    customer_email: Option<String>,
    #[serde(default)]
    customer_details: Option<CustomerDetails>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct CustomerDetails {
    #[serde(default)]
    email: Option<String>,
}

/// What a checkout session was paying for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Purpose {
    Reservation,
    /// Storefront order. `None` if the cart metadata could not be read.
    Order { lines: Option<Vec<CartLine>> },
}

/// Gateway events this system acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    CheckoutCompleted {
        event_id: String,
        session_id: String,
        reference: Option<String>,
        amount_total: Cents,
        customer_email: Option<String>,
        purpose: Purpose,
    },
    CheckoutExpired {
        event_id: String,
        session_id: String,
        reference: Option<String>,
        purpose: Purpose,
    },
    Ignored {
        event_id: String,
        kind: String,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("malformed webhook payload: {0}")]
pub struct PayloadError(#[from] serde_json::Error);

/// `<variant>:<qty>,...` as carried in checkout metadata.
pub fn encode_lines(lines: &[CartLine]) -> String {
    lines
        .iter()
        .map(|l| format!("{}:{}", l.variant_id, l.quantity))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn decode_lines(s: &str) -> Option<Vec<CartLine>> {
    s.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            let (id, qty) = part.trim().split_once(':')?;
            Some(CartLine {
                variant_id: id.parse::<Ulid>().ok()?,
                quantity: qty.parse().ok()?,
            })
        })
        .collect()
}

fn purpose_of(metadata: &HashMap<String, String>) -> Purpose {
    match metadata.get("kind").map(String::as_str) {
        Some("order") => Purpose::Order {
            lines: metadata.get("lines").and_then(|s| decode_lines(s)),
        },
        _ => Purpose::Reservation,
    }
}

/// Parse a verified webhook body. Only call after the signature checked out.
pub fn parse_event(body: &[u8]) -> Result<GatewayEvent, PayloadError> {
    let envelope: Envelope = serde_json::from_slice(body)?;
    let object = envelope.data.object;
    let purpose = purpose_of(&object.metadata);

    let event = match envelope.kind.as_str() {
        // Delayed payment methods complete the session before the money moves.
        CHECKOUT_COMPLETED if object.payment_status.as_deref() == Some("unpaid") => GatewayEvent::Ignored {
            event_id: envelope.id,
            kind: format!("{CHECKOUT_COMPLETED} (unpaid)"),
        },
        CHECKOUT_COMPLETED => GatewayEvent::CheckoutCompleted {
            event_id: envelope.id,
            session_id: object.id,
            reference: object.client_reference_id,
            amount_total: object.amount_total.unwrap_or(0),
            customer_email: object
                .customer_email
                .or_else(|| object.customer_details.and_then(|d| d.email)),
            purpose,
        },
        CHECKOUT_EXPIRED => GatewayEvent::CheckoutExpired {
            event_id: envelope.id,
            session_id: object.id,
            reference: object.client_reference_id,
            purpose,
        },
        _ => GatewayEvent::Ignored {
            event_id: envelope.id,
            kind: envelope.kind,
        },
    };
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(kind: &str, object: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({"id": "evt_1", "type": kind, "data": {"object": object}})).unwrap()
    }

    #[test]
    fn completed_reservation_payment() {
        let event = parse_event(&body(
            CHECKOUT_COMPLETED,
            json!({
                "id": "cs_1",
                "client_reference_id": "01HZX",
                "amount_total": 3000,
                "payment_status": "paid",
                "customer_details": {"email": "ada@example.com"},
                "metadata": {"kind": "reservation"}
            }),
        ))
        .unwrap();
        assert_eq!(
            event,
            GatewayEvent::CheckoutCompleted {
                event_id: "evt_1".into(),
                session_id: "cs_1".into(),
                reference: Some("01HZX".into()),
                amount_total: 3000,
                customer_email: Some("ada@example.com".into()),
                purpose: Purpose::Reservation,
            }
        );
    }

    #[test]
    fn completed_order_carries_lines() {
        let variant = Ulid::new();
        let event = parse_event(&body(
            CHECKOUT_COMPLETED,
            json!({
                "id": "cs_2",
                "amount_total": 5000,
                "metadata": {"kind": "order", "lines": format!("{variant}:2")}
            }),
        ))
        .unwrap();
        let GatewayEvent::CheckoutCompleted { purpose, .. } = event else {
            panic!("expected completion");
        };
        assert_eq!(
            purpose,
            Purpose::Order {
                lines: Some(vec![CartLine { variant_id: variant, quantity: 2 }])
            }
        );
    }

    #[test]
    fn unpaid_completion_is_ignored() {
        let event = parse_event(&body(CHECKOUT_COMPLETED, json!({"id": "cs_3", "payment_status": "unpaid"}))).unwrap();
        assert!(matches!(event, GatewayEvent::Ignored { .. }));
    }

    #[test]
    fn expired_session() {
        let event = parse_event(&body(CHECKOUT_EXPIRED, json!({"id": "cs_4", "client_reference_id": "r"}))).unwrap();
        assert!(matches!(event, GatewayEvent::CheckoutExpired { ref session_id, .. } if session_id == "cs_4"));
    }

    #[test]
    fn unknown_type_is_ignored() {
        let event = parse_event(&body("invoice.paid", json!({"id": "in_1"}))).unwrap();
        assert_eq!(
            event,
            GatewayEvent::Ignored {
                event_id: "evt_1".into(),
                kind: "invoice.paid".into()
            }
        );
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_event(b"not json").is_err());
    }

    #[test]
    fn lines_encoding() {
        let a = Ulid::new();
        let b = Ulid::new();
        let lines = vec![CartLine { variant_id: a, quantity: 1 }, CartLine { variant_id: b, quantity: 3 }];
        assert_eq!(decode_lines(&encode_lines(&lines)), Some(lines));
        assert_eq!(decode_lines("nope:1"), None);
        assert_eq!(decode_lines(&format!("{a}:x")), None);
    }
}
