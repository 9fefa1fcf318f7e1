use tracing::error;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

/// Fields of an alert before it gets an id and timestamp.
#[derive(Debug, Clone)]
pub(crate) struct NewAlert {
    pub kind: AlertKind,
    pub reservation_id: Option<Ulid>,
    pub order_id: Option<Ulid>,
    pub session_id: Option<String>,
    pub amount: Option<Cents>,
    pub detail: String,
}

impl Engine {
    /// Record an operator alert. An alert of the same kind for the same
    /// payment session is raised once; later calls return the first one.
    pub(crate) async fn raise_alert(&self, new: NewAlert) -> Result<OperatorAlert, EngineError> {
        let _gate = self.alert_gate.lock().await;
        if let Some(session) = new.session_id.as_deref()
            && let Some(existing) = self
                .alerts
                .iter()
                .find(|a| a.kind == new.kind && a.session_id.as_deref() == Some(session))
        {
            return Ok(existing.value().clone());
        }

        let alert = OperatorAlert {
            id: Ulid::new(),
            kind: new.kind,
            reservation_id: new.reservation_id,
            order_id: new.order_id,
            session_id: new.session_id,
            amount: new.amount,
            detail: new.detail,
            raised_at: self.now(),
            acknowledged_at: None,
        };
        self.commit_global(&Event::AlertRaised { alert: alert.clone() })
            .await?;

        metrics::counter!(crate::observability::ALERTS_RAISED_TOTAL, "kind" => alert.kind.as_str()).increment(1);
        error!(
            alert = %alert.id,
            kind = alert.kind.as_str(),
            reservation = ?alert.reservation_id,
            order = ?alert.order_id,
            session = ?alert.session_id,
            amount = ?alert.amount,
            "operator attention required: {}",
            alert.detail
        );
        Ok(alert)
    }

    /// Money arrived for something this system cannot match.
    pub async fn report_unmatched_payment(
        &self,
        session_id: &str,
        reference: Option<&str>,
        amount: Cents,
        detail: impl Into<String>,
    ) -> Result<OperatorAlert, EngineError> {
        let detail = detail.into();
        self.raise_alert(NewAlert {
            kind: AlertKind::UnknownPaymentReference,
            reservation_id: reference.and_then(|r| r.parse().ok()),
            order_id: None,
            session_id: Some(session_id.to_string()),
            amount: Some(amount),
            detail: match reference {
                Some(r) => format!("{detail} (reference {r})"),
                None => detail,
            },
        })
        .await
    }

    /// Alerts, newest first.
    pub fn alerts(&self, open_only: bool) -> Vec<OperatorAlert> {
        let mut alerts: Vec<OperatorAlert> = self
            .alerts
            .iter()
            .filter(|a| !open_only || a.acknowledged_at.is_none())
            .map(|a| a.value().clone())
            .collect();
        alerts.sort_by(|a, b| b.raised_at.cmp(&a.raised_at).then(b.id.cmp(&a.id)));
        alerts
    }

    pub fn open_alert_count(&self) -> usize {
        self.alerts
            .iter()
            .filter(|a| a.acknowledged_at.is_none())
            .count()
    }

    pub async fn acknowledge_alert(&self, id: Ulid) -> Result<OperatorAlert, EngineError> {
        let _gate = self.alert_gate.lock().await;
        let alert = self
            .alerts
            .get(&id)
            .map(|a| a.value().clone())
            .ok_or(EngineError::NotFound(id))?;
        if alert.acknowledged_at.is_some() {
            return Ok(alert);
        }
        self.commit_global(&Event::AlertAcknowledged { id, at: self.now() })
            .await?;
        self.alerts
            .get(&id)
            .map(|a| a.value().clone())
            .ok_or(EngineError::NotFound(id))
    }
}
