//! Realtime fan-out of payment updates.
//!
//! One producer (the payment processor), any number of subscribers. Delivery is
//! best-effort and never replayed: a subscriber only sees events published after
//! it subscribed, and a subscriber that falls more than `capacity` events behind
//! skips the ones it missed. Events reach each subscriber in publish order.

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::models::PaymentUpdate;

pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<PaymentUpdate>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Sends `update` to every live subscriber and returns how many there were.
    pub fn publish(&self, update: PaymentUpdate) -> usize {
        match self.tx.send(update) {
            Ok(subscribers) => {
                debug!(subscribers, "payment update broadcast");
                subscribers
            }
            // No receivers: nothing to deliver, nothing to keep
            Err(_) => 0,
        }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: Some(self.tx.subscribe()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A single consumer's view of the channel.
///
/// Yields events until cancelled or until every [`Broadcaster`] is dropped.
/// Once it has returned `None` it stays finished.
pub struct Subscription {
    rx: Option<broadcast::Receiver<PaymentUpdate>>,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<PaymentUpdate> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.recv().await {
                Ok(update) => return Some(update),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged, dropping missed updates");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Non-blocking variant of [`Subscription::next`]: `None` when nothing is queued.
    pub fn try_next(&mut self) -> Option<PaymentUpdate> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.try_recv() {
                Ok(update) => return Some(update),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged, dropping missed updates");
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Stops delivery immediately; later calls to [`Subscription::next`] return `None`.
    pub fn cancel(&mut self) {
        self.rx = None;
    }

    pub fn is_active(&self) -> bool {
        self.rx.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn update(name: &str) -> PaymentUpdate {
        PaymentUpdate {
            student_id: Uuid::new_v4(),
            name: name.to_string(),
            email: format!("{}@x.com", name),
            fees_paid: true,
        }
    }

    #[tokio::test]
    async fn test_fan_out_to_every_subscriber() {
        let broadcaster = Broadcaster::default();
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();

        let event = update("asha");
        assert_eq!(broadcaster.publish(event.clone()), 2);
        assert_eq!(a.next().await, Some(event.clone()));
        assert_eq!(b.next().await, Some(event));
        assert_eq!(a.try_next(), None);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_no_replay() {
        let broadcaster = Broadcaster::default();
        assert_eq!(broadcaster.publish(update("early")), 0);

        let mut late = broadcaster.subscribe();
        let fresh = update("fresh");
        broadcaster.publish(fresh.clone());
        assert_eq!(late.next().await, Some(fresh));
    }

    #[tokio::test]
    async fn test_events_arrive_in_publish_order() {
        let broadcaster = Broadcaster::default();
        let mut sub = broadcaster.subscribe();
        let events: Vec<_> = (0..5).map(|i| update(&format!("s{i}"))).collect();
        for event in &events {
            broadcaster.publish(event.clone());
        }
        for event in events {
            assert_eq!(sub.next().await, Some(event));
        }
    }

    #[tokio::test]
    async fn test_cancel_stops_delivery() {
        let broadcaster = Broadcaster::default();
        let mut sub = broadcaster.subscribe();
        sub.cancel();

        assert!(!sub.is_active());
        assert_eq!(broadcaster.subscriber_count(), 0);
        broadcaster.publish(update("asha"));
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn test_closed_when_broadcaster_dropped() {
        let broadcaster = Broadcaster::default();
        let mut sub = broadcaster.subscribe();
        drop(broadcaster);
        assert_eq!(sub.next().await, None);
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_missed_updates() {
        let broadcaster = Broadcaster::new(2);
        let mut sub = broadcaster.subscribe();
        for i in 0..4 {
            broadcaster.publish(update(&format!("s{i}")));
        }
        // Oldest two were overwritten
        assert_eq!(sub.next().await.map(|u| u.name), Some("s2".to_string()));
        assert_eq!(sub.next().await.map(|u| u.name), Some("s3".to_string()));
    }
}
