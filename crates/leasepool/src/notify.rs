//! Revocation notifications.
//!
//! Single topic: a lease went Active → Inactive. Every subscriber owns an
//! unbounded queue, so `publish` never waits on a slow listener. Callback
//! subscribers are driven by their own task; no ordering is guaranteed
//! across distinct subscribers.

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::holder::HolderId;
use crate::lease::LeaseId;
use crate::pool::PoolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RevocationReason {
    /// Released by an explicit `release` call.
    Released,
    /// Released by the expiration scheduler.
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevocationEvent {
    pub holder: HolderId,
    pub lease: LeaseId,
    pub reason: RevocationReason,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(uuid::Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type Subscribers = DashMap<SubscriptionId, mpsc::UnboundedSender<RevocationEvent>>;

/// Publish/subscribe channel for revocation events. Clones share subscribers.
#[derive(Clone, Default)]
pub struct NotificationChannel {
    subscribers: Arc<Subscribers>,
}

impl fmt::Debug for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationChannel")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl NotificationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked for every revocation until the returned
    /// handle is dropped or unsubscribed. Requires a tokio runtime.
    pub fn subscribe<F>(&self, handler: F) -> Result<Subscription, PoolError>
    where
        F: Fn(RevocationEvent) + Send + Sync + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PoolError::NoRuntime)?;
        let (id, mut rx) = self.register();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => handler(event),
                        None => break,
                    },
                }
            }
            tracing::trace!(subscription = %id, "Revocation listener stopped");
        });

        Ok(Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
            cancel: Some(cancel),
        })
    }

    /// Register a receiver-style subscriber. The receiver yields `None` once
    /// the subscription is dropped and pending events are drained.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<RevocationEvent>) {
        let (id, rx) = self.register();
        let subscription = Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
            cancel: None,
        };
        (subscription, rx)
    }

    fn register(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<RevocationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriptionId::new();
        self.subscribers.insert(id, tx);
        tracing::debug!(subscription = %id, "Revocation subscriber registered");
        (id, rx)
    }

    /// Queue `event` for every live subscriber. Returns how many accepted it.
    pub fn publish(&self, event: RevocationEvent) -> usize {
        let mut delivered = 0;
        self.subscribers.retain(|id, tx| match tx.send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                tracing::debug!(subscription = %id, "Dropping closed revocation subscriber");
                false
            }
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Handle for a registered subscriber. Unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriptionId,
    subscribers: Weak<Subscribers>,
    cancel: Option<CancellationToken>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn unsubscribe(self) {}
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    fn event(holder: &str, seq: u64) -> RevocationEvent {
        RevocationEvent {
            holder: HolderId::parse(holder).unwrap(),
            lease: LeaseId::new(seq),
            reason: RevocationReason::Released,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn channel_subscriber_receives_events() {
        let channel = NotificationChannel::new();
        let (_sub, mut rx) = channel.subscribe_channel();

        assert_eq!(channel.publish(event("Alice", 1)), 1);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.holder.as_str(), "Alice");
        assert_eq!(received.lease, LeaseId::new(1));
    }

    #[tokio::test]
    async fn every_subscriber_gets_a_copy() {
        let channel = NotificationChannel::new();
        let (_a, mut rx_a) = channel.subscribe_channel();
        let (_b, mut rx_b) = channel.subscribe_channel();

        assert_eq!(channel.publish(event("Bob", 2)), 2);
        assert_eq!(rx_a.recv().await.unwrap().holder.as_str(), "Bob");
        assert_eq!(rx_b.recv().await.unwrap().holder.as_str(), "Bob");
    }

    #[tokio::test]
    async fn callback_runs_off_the_publisher() {
        let channel = NotificationChannel::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let seen_cb = Arc::clone(&seen);
        let _sub = channel
            .subscribe(move |ev| {
                // A slow listener must not stall publish().
                std::thread::sleep(Duration::from_millis(20));
                seen_cb.lock().unwrap().push(ev.holder.to_string());
                let _ = done_tx.send(());
            })
            .unwrap();

        let started = std::time::Instant::now();
        channel.publish(event("Charlie", 3));
        channel.publish(event("Diana", 4));
        assert!(started.elapsed() < Duration::from_millis(20));

        done_rx.recv().await.unwrap();
        done_rx.recv().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["Charlie", "Diana"]);
    }

    #[tokio::test]
    async fn drop_unsubscribes() {
        let channel = NotificationChannel::new();
        let (sub, mut rx) = channel.subscribe_channel();
        assert_eq!(channel.subscriber_count(), 1);

        sub.unsubscribe();
        assert_eq!(channel.subscriber_count(), 0);
        assert_eq!(channel.publish(event("Eve", 5)), 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn closed_receivers_are_pruned() {
        let channel = NotificationChannel::new();
        let (_sub, rx) = channel.subscribe_channel();
        drop(rx);

        assert_eq!(channel.publish(event("Frank", 6)), 0);
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[test]
    fn callback_subscribe_requires_runtime() {
        let channel = NotificationChannel::new();
        assert!(matches!(
            channel.subscribe(|_| {}),
            Err(PoolError::NoRuntime)
        ));
    }

    #[test]
    fn event_serializes() {
        let ev = RevocationEvent {
            holder: HolderId::parse("Grace").unwrap(),
            lease: LeaseId::new(9),
            reason: RevocationReason::Expired,
            at: DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        };
        insta::assert_json_snapshot!(ev, @r#"
        {
          "holder": "Grace",
          "lease": 9,
          "reason": "expired",
          "at": "2024-05-01T12:00:00Z"
        }
        "#);
    }
}
