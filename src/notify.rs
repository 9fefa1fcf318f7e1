use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::lifecycle::{Actor, Transition};
use crate::model::{Order, Reservation, StatusKind};

const CHANNEL_CAPACITY: usize = 256;

/// Something a customer or the shop should hear about. Published only for
/// transitions that were actually applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    ReservationConfirmed { reservation: Reservation },
    ReservationCancelled { reservation: Reservation, actor: Actor },
    ReservationRestored { reservation: Reservation },
    OrderPlaced { order: Order },
}

impl Notice {
    /// `previous` is the status before the transition. A hold the system
    /// releases was never booked from the customer's side, so it is silent.
    pub fn for_transition(
        reservation: &Reservation,
        previous: StatusKind,
        transition: &Transition,
        actor: Actor,
    ) -> Option<Self> {
        let reservation = reservation.clone();
        match transition {
            Transition::Confirm { .. } => Some(Notice::ReservationConfirmed { reservation }),
            Transition::Cancel if actor == Actor::System && previous == StatusKind::Hold => None,
            Transition::Cancel => Some(Notice::ReservationCancelled { reservation, actor }),
            Transition::Restore => Some(Notice::ReservationRestored { reservation }),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notice::ReservationConfirmed { .. } => "reservation_confirmed",
            Notice::ReservationCancelled { .. } => "reservation_cancelled",
            Notice::ReservationRestored { .. } => "reservation_restored",
            Notice::OrderPlaced { .. } => "order_placed",
        }
    }
}

/// Broadcast hub between the engine and whoever delivers notices.
pub struct NotifyHub {
    tx: broadcast::Sender<Notice>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            tx: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    /// Publish. No-op if nobody is listening.
    pub fn send(&self, notice: Notice) {
        let _ = self.tx.send(notice);
    }
}

#[derive(Debug, thiserror::Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Delivery collaborator (email, SMS, ...).
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn deliver(&self, notice: &Notice) -> Result<(), NotifyError>;
}

/// Writes each notice to the log instead of sending it anywhere.
#[derive(Debug, Default)]
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn deliver(&self, notice: &Notice) -> Result<(), NotifyError> {
        match notice {
            Notice::ReservationConfirmed { reservation }
            | Notice::ReservationRestored { reservation } => {
                info!(kind = notice.kind(), reservation = %reservation.id, to = %reservation.contact.email, "notify");
            }
            Notice::ReservationCancelled { reservation, actor } => {
                info!(kind = notice.kind(), reservation = %reservation.id, to = %reservation.contact.email, %actor, "notify");
            }
            Notice::OrderPlaced { order } => {
                info!(kind = notice.kind(), order = %order.id, to = ?order.customer_email, "notify");
            }
        }
        Ok(())
    }
}

/// Forward every published notice to `sender` until cancelled.
pub async fn run_dispatcher(
    mut rx: broadcast::Receiver<Notice>,
    sender: Arc<dyn NotificationSender>,
    token: CancellationToken,
) {
    loop {
        let notice = tokio::select! {
            _ = token.cancelled() => break,
            received = rx.recv() => match received {
                Ok(notice) => notice,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "notification dispatcher lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };
        metrics::counter!(crate::observability::NOTICES_TOTAL, "kind" => notice.kind()).increment(1);
        if let Err(e) = sender.deliver(&notice).await {
            warn!(kind = notice.kind(), "{e}");
        }
    }
}
