//! Outbound delivery.
//!
//! The broadcaster is the only path by which events reach a connection's
//! queue. It is handed to the HTTP layer so business state changes (a new
//! trade, a new notification) can be pushed to the affected subjects.
//!
//! Delivery is best-effort per connection: a queue that is closed, or stays
//! full past the send timeout, gets its connection removed from the registry
//! and the remaining targets are still served.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::{debug, instrument, warn};

use crate::auth::SubjectId;
use crate::connection::{ConnectionId, ConnectionRegistry};
use crate::message::{OutboundEvent, Target};

/// Result of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections the event was enqueued on
    pub delivered: usize,
    /// Connections dropped because their queue was closed or stuck
    pub dropped: usize,
}

/// Pushes outbound events to live connections.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    send_timeout: Duration,
}

impl Broadcaster {
    /// Creates a new broadcaster.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }

    /// Sends an event to one connection.
    ///
    /// Returns false if the connection is gone; that is not an error.
    pub async fn send(&self, id: ConnectionId, event: OutboundEvent) -> bool {
        self.broadcast(Target::Connection(id), event).await.delivered == 1
    }

    /// Sends an event to every connection matching `target`.
    #[instrument(skip_all, fields(%target, event_type = %event.event_type()))]
    pub async fn broadcast(&self, target: Target, event: OutboundEvent) -> DeliveryReport {
        let recipients = self.registry.outbound(&target);
        if recipients.is_empty() {
            debug!("No live recipients");
            return DeliveryReport::default();
        }

        let event = Arc::new(event);
        let sends = recipients.into_iter().map(|(id, sender)| {
            let event = event.clone();
            async move { (id, sender.send_timeout(event, self.send_timeout).await) }
        });

        let mut report = DeliveryReport::default();
        for (id, result) in join_all(sends).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(SendTimeoutError::Closed(_)) => {
                    debug!(conn_id = %id, "Connection closed before delivery");
                    self.registry.remove(id);
                    report.dropped += 1;
                }
                Err(SendTimeoutError::Timeout(_)) => {
                    warn!(conn_id = %id, "Outbound queue stuck, dropping connection");
                    self.registry.remove(id);
                    report.dropped += 1;
                }
            }
        }
        report
    }

    /// Sends an event to every authenticated connection of a subject.
    pub async fn to_subject(&self, subject: &SubjectId, event: OutboundEvent) -> DeliveryReport {
        self.broadcast(Target::Subject(subject.clone()), event).await
    }

    /// Sends an event to every authenticated connection.
    pub async fn to_all(&self, event: OutboundEvent) -> DeliveryReport {
        self.broadcast(Target::All, event).await
    }

    /// Returns the number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn broadcaster() -> (Arc<ConnectionRegistry>, Broadcaster) {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone(), Duration::from_millis(50));
        (registry, broadcaster)
    }

    #[tokio::test]
    async fn test_broadcast_no_connections() {
        let (_registry, broadcaster) = broadcaster();
        let report = broadcaster
            .to_all(OutboundEvent::new("trade", json!({ "id": 1 })))
            .await;
        assert_eq!(report, DeliveryReport::default());
        assert_eq!(broadcaster.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_subject_broadcast_reaches_only_authenticated_connections() {
        let (registry, broadcaster) = broadcaster();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let (tx3, mut rx3) = mpsc::channel(8);
        let a = registry.add(tx1);
        let b = registry.add(tx2);
        let _anon = registry.add(tx3);
        registry.authenticate(a, SubjectId::from("u1")).unwrap();
        registry.authenticate(b, SubjectId::from("u1")).unwrap();

        let event = OutboundEvent::new("notification", json!({ "text": "filled" }));
        let report = broadcaster.to_subject(&SubjectId::from("u1"), event.clone()).await;

        assert_eq!(report.delivered, 2);
        assert_eq!(*rx1.recv().await.unwrap(), event);
        assert_eq!(*rx2.recv().await.unwrap(), event);
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_reaches_unauthenticated_connection() {
        let (registry, broadcaster) = broadcaster();
        let (tx, mut rx) = mpsc::channel(8);
        let id = registry.add(tx);

        assert!(broadcaster.send(id, OutboundEvent::welcome("hi")).await);
        assert_eq!(rx.recv().await.unwrap().event_type(), OutboundEvent::WELCOME);
    }

    #[tokio::test]
    async fn test_send_to_gone_connection_is_noop() {
        let (registry, broadcaster) = broadcaster();
        let (tx, _rx) = mpsc::channel(8);
        let id = registry.add(tx);
        registry.remove(id);

        assert!(!broadcaster.send(id, OutboundEvent::welcome("hi")).await);
    }

    #[tokio::test]
    async fn test_closed_queue_removes_connection_and_continues() {
        let (registry, broadcaster) = broadcaster();
        let (tx1, rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let a = registry.add(tx1);
        let b = registry.add(tx2);
        registry.authenticate(a, SubjectId::from("u1")).unwrap();
        registry.authenticate(b, SubjectId::from("u2")).unwrap();
        drop(rx1);

        let report = broadcaster.to_all(OutboundEvent::new("tick", json!(1))).await;

        assert_eq!(report, DeliveryReport { delivered: 1, dropped: 1 });
        assert!(registry.by_connection(a).is_none());
        assert!(registry.by_subject(&SubjectId::from("u1")).is_empty());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_stuck_queue_removes_connection() {
        let (registry, broadcaster) = broadcaster();
        let (tx, _rx) = mpsc::channel(1);
        let id = registry.add(tx);

        assert!(broadcaster.send(id, OutboundEvent::new("a", json!(null))).await);
        assert!(!broadcaster.send(id, OutboundEvent::new("b", json!(null))).await);
        assert!(registry.by_connection(id).is_none());
    }

    #[tokio::test]
    async fn test_events_arrive_in_enqueue_order() {
        let (registry, broadcaster) = broadcaster();
        let (tx, mut rx) = mpsc::channel(8);
        let id = registry.add(tx);

        for n in 0..5 {
            broadcaster.send(id, OutboundEvent::new("seq", json!(n))).await;
        }
        for n in 0..5 {
            assert_eq!(rx.recv().await.unwrap().payload(), &json!(n));
        }
    }
}
