//! Cross-view settlement notifications.
//!
//! Dashboards and invoice lists render independently of the payment screen
//! and there is no server push channel, so completed settlements are
//! announced on a process-wide typed channel. The bus is created once at
//! startup and handed to whoever needs it; subscribers live and die with
//! the views that own them.

use crate::domain::invoice::{BillId, PaymentMethod};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 32;

/// Broadcast payload for one completed settlement. Never persisted and
/// never re-delivered: a subscriber that joins after `publish` returns does
/// not see the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementEvent {
    pub bill_id: BillId,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SettlementEventBus {
    tx: broadcast::Sender<SettlementEvent>,
}

impl SettlementEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// `capacity` bounds how many events a slow subscriber may lag behind
    /// before it starts missing them. A lagging subscriber never blocks
    /// delivery to the others.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Fire-and-forget delivery to every subscriber registered before the
    /// call. Returns how many were reached; zero subscribers is not an
    /// error.
    pub fn publish(&self, event: SettlementEvent) -> usize {
        let bill_id = event.bill_id;
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::trace!(%bill_id, "settlement event dropped, no subscribers");
                0
            }
        }
    }

    /// Dropping the returned receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<SettlementEvent> {
        self.tx.subscribe()
    }
}

impl Default for SettlementEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn event(bill: u64) -> SettlementEvent {
        SettlementEvent {
            bill_id: BillId(bill),
            amount: dec!(500000),
            payment_method: PaymentMethod::Transfer,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_all_current_subscribers() {
        let bus = SettlementEventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        let reached = bus.publish(event(1));
        assert_eq!(reached, 2);
        assert_eq!(a.recv().await.unwrap().bill_id, BillId(1));
        assert_eq!(b.recv().await.unwrap().bill_id, BillId(1));
    }

    #[tokio::test]
    async fn test_no_replay_for_late_subscribers() {
        let bus = SettlementEventBus::new();
        bus.publish(event(1));

        let mut late = bus.subscribe();
        assert!(matches!(
            late.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = SettlementEventBus::new();
        assert_eq!(bus.publish(event(1)), 0);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_block_others() {
        let bus = SettlementEventBus::new();
        let dead = bus.subscribe();
        let mut live = bus.subscribe();
        drop(dead);

        let reached = bus.publish(event(2));
        assert_eq!(reached, 1);
        assert_eq!(live.recv().await.unwrap().bill_id, BillId(2));
    }

    #[tokio::test]
    async fn test_lagging_subscriber_does_not_block_others() {
        let bus = SettlementEventBus::with_capacity(1);
        let mut lagging = bus.subscribe();
        let mut live = bus.subscribe();

        // The live subscriber keeps up; the lagging one never reads and
        // falls out of the buffer without holding anything up.
        bus.publish(event(1));
        assert_eq!(live.recv().await.unwrap().bill_id, BillId(1));
        bus.publish(event(2));
        assert_eq!(live.recv().await.unwrap().bill_id, BillId(2));

        assert!(matches!(
            lagging.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        assert_eq!(lagging.recv().await.unwrap().bill_id, BillId(2));
    }
}
