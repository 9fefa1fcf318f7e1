use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::{MAX_CART_LINES, MAX_LINE_QUANTITY};
use crate::model::*;
use crate::notify::Notice;

use super::alerts::NewAlert;
use super::{Engine, EngineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub variant_id: Ulid,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderOutcome {
    Created(Order),
    /// Created, but something is short or unpaid. Alerts already raised.
    NeedsAttention { order: Order, alerts: Vec<OperatorAlert> },
    /// An order already exists for this payment session.
    Duplicate(Order),
}

/// Merge repeated variants into one line.
fn fold_cart(lines: &[CartLine]) -> Vec<CartLine> {
    let mut folded: Vec<CartLine> = Vec::with_capacity(lines.len());
    for line in lines {
        match folded.iter_mut().find(|l| l.variant_id == line.variant_id) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(line.quantity),
            None => folded.push(*line),
        }
    }
    folded
}

/// Bounds-check a cart and fold repeated variants into one line.
pub fn validate_cart(lines: &[CartLine]) -> Result<Vec<CartLine>, EngineError> {
    if lines.is_empty() {
        return Err(EngineError::validation("cart is empty"));
    }
    if lines.len() > MAX_CART_LINES {
        return Err(EngineError::LimitExceeded("too many cart lines"));
    }
    let folded = fold_cart(lines);
    if folded
        .iter()
        .any(|l| l.quantity == 0 || l.quantity > MAX_LINE_QUANTITY)
    {
        return Err(EngineError::validation("quantity must be between 1 and 100"));
    }
    Ok(folded)
}

fn line_total(line: &OrderLine, quantity: u32) -> Cents {
    line.unit_price.saturating_mul(Cents::from(quantity))
}

impl Engine {
    /// Validate a cart against the catalog and price it.
    pub async fn quote_cart(&self, lines: &[CartLine]) -> Result<Vec<(CartLine, Variant)>, EngineError> {
        let lines = validate_cart(lines)?;
        let mut quoted = Vec::with_capacity(lines.len());
        for line in lines {
            let variant = self
                .variant(line.variant_id)
                .await
                .ok_or(EngineError::NotFound(line.variant_id))?;
            quoted.push((line, variant));
        }
        Ok(quoted)
    }

    /// Create the order for a completed checkout, taking stock line by line.
    ///
    /// Payment has already been captured, so nothing here rejects the order.
    /// A line is filled in full or not at all; a line that cannot be filled
    /// (short stock, unknown variant) keeps `allocated = 0` and the order is
    /// flagged. Variant locks are taken in id order.
    pub async fn place_order(
        &self,
        session_id: &str,
        lines: &[CartLine],
        customer_email: Option<String>,
        amount_paid: Cents,
    ) -> Result<OrderOutcome, EngineError> {
        let gate = self
            .order_sessions
            .entry(session_id.to_string())
            .or_default()
            .clone();
        let mut placed = gate.lock().await;
        if let Some(order_id) = *placed {
            let order = self.order(order_id).ok_or(EngineError::NotFound(order_id))?;
            return Ok(OrderOutcome::Duplicate(order));
        }

        let lines: Vec<CartLine> = fold_cart(lines).into_iter().filter(|l| l.quantity > 0).collect();
        let ids: BTreeSet<Ulid> = lines.iter().map(|l| l.variant_id).collect();
        let mut guards = BTreeMap::new();
        for id in ids {
            let Some(handle) = self.variants.get(&id).map(|v| v.value().clone()) else {
                continue;
            };
            guards.insert(id, handle.lock_owned().await);
        }

        let mut remaining: BTreeMap<Ulid, u32> = guards.iter().map(|(id, g)| (*id, g.quantity)).collect();
        let mut order_lines = Vec::with_capacity(lines.len());
        let mut unknown = 0usize;
        for line in &lines {
            let (unit_price, allocated) = match (guards.get(&line.variant_id), remaining.get_mut(&line.variant_id)) {
                (Some(variant), Some(left)) if *left >= line.quantity => {
                    *left -= line.quantity;
                    (variant.price, line.quantity)
                }
                (Some(variant), _) => (variant.price, 0),
                _ => {
                    unknown += 1;
                    (0, 0)
                }
            };
            order_lines.push(OrderLine {
                variant_id: line.variant_id,
                quantity: line.quantity,
                unit_price,
                allocated,
            });
        }

        let total: Cents = order_lines
            .iter()
            .map(|l| line_total(l, l.quantity))
            .fold(0, Cents::saturating_add);
        let short = order_lines.iter().any(OrderLine::is_short);
        let empty = order_lines.is_empty();
        let underpaid = amount_paid < total;
        let order = Order {
            id: Ulid::new(),
            payment_session: session_id.to_string(),
            customer_email,
            lines: order_lines,
            total,
            amount_paid,
            status: if short || empty || underpaid {
                OrderStatus::NeedsAttention
            } else {
                OrderStatus::Paid
            },
            created_at: self.now(),
            resolved_at: None,
            resolution_note: None,
        };
        let stock_after: Vec<(Ulid, u32)> = remaining.into_iter().collect();
        let event = Event::OrderPlaced {
            order: order.clone(),
            stock_after: stock_after.clone(),
        };
        self.commit(&event, || {
            for (id, quantity) in &stock_after {
                if let Some(guard) = guards.get_mut(id) {
                    guard.quantity = *quantity;
                }
            }
            self.orders.insert(order.id, order.clone());
        })
        .await?;
        *placed = Some(order.id);
        drop(guards);

        let status = if order.status == OrderStatus::Paid { "paid" } else { "needs_attention" };
        metrics::counter!(crate::observability::ORDERS_TOTAL, "status" => status).increment(1);
        info!(order = %order.id, session = session_id, total, status, "order placed");
        self.notify.send(Notice::OrderPlaced { order: order.clone() });

        let mut alerts = Vec::new();
        if short {
            let failed: Vec<&OrderLine> = order.lines.iter().filter(|l| l.is_short()).collect();
            let shortfall: u32 = failed.iter().map(|l| l.quantity).fold(0, u32::saturating_add);
            let missing: Cents = failed
                .iter()
                .map(|l| line_total(l, l.quantity))
                .fold(0, Cents::saturating_add);
            metrics::counter!(crate::observability::ORDER_SHORTFALL_UNITS_TOTAL).increment(u64::from(shortfall));
            warn!(order = %order.id, shortfall, unknown, "order paid for more stock than available");
            let detail = if unknown > 0 {
                format!("{shortfall} unit(s) paid for but not filled, {unknown} line(s) name an unknown variant")
            } else {
                format!("{shortfall} unit(s) paid for but not in stock")
            };
            alerts.push(
                self.raise_alert(NewAlert {
                    kind: AlertKind::Oversold,
                    reservation_id: None,
                    order_id: Some(order.id),
                    session_id: Some(session_id.to_string()),
                    amount: Some(missing),
                    detail,
                })
                .await?,
            );
        }
        if empty {
            warn!(order = %order.id, "paid order has no readable cart lines");
            alerts.push(
                self.raise_alert(NewAlert {
                    kind: AlertKind::UnknownPaymentReference,
                    reservation_id: None,
                    order_id: Some(order.id),
                    session_id: Some(session_id.to_string()),
                    amount: Some(amount_paid),
                    detail: "paid order has no readable cart lines".into(),
                })
                .await?,
            );
        }
        if underpaid {
            alerts.push(
                self.raise_alert(NewAlert {
                    kind: AlertKind::Underpaid,
                    reservation_id: None,
                    order_id: Some(order.id),
                    session_id: Some(session_id.to_string()),
                    amount: Some(amount_paid),
                    detail: format!("paid {amount_paid}, order total {total}"),
                })
                .await?,
            );
        }

        if alerts.is_empty() {
            Ok(OrderOutcome::Created(order))
        } else {
            Ok(OrderOutcome::NeedsAttention { order, alerts })
        }
    }

    pub fn order(&self, id: Ulid) -> Option<Order> {
        self.orders.get(&id).map(|o| o.value().clone())
    }

    /// Orders, newest first.
    pub fn orders(&self, status: Option<OrderStatus>) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|o| status.is_none_or(|s| o.status == s))
            .map(|o| o.value().clone())
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        orders
    }

    /// Admin sign-off on an order that needed attention.
    pub async fn resolve_order(&self, id: Ulid, note: Option<String>) -> Result<Order, EngineError> {
        let order = self.order(id).ok_or(EngineError::NotFound(id))?;
        match order.status {
            OrderStatus::Resolved => return Ok(order),
            OrderStatus::Paid => return Err(EngineError::validation("order does not need attention")),
            OrderStatus::NeedsAttention => {}
        }
        if note
            .as_ref()
            .is_some_and(|n| n.len() > crate::limits::MAX_NOTES_LEN)
        {
            return Err(EngineError::validation("note is too long"));
        }
        self.commit_global(&Event::OrderResolved {
            id,
            note,
            at: self.now(),
        })
        .await?;
        info!(order = %id, "order resolved");
        self.order(id).ok_or(EngineError::NotFound(id))
    }
}
