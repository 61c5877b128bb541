//! Status event fanout.
//!
//! Pool, scheduler, and task state machines publish here; observers are
//! pure sinks holding a receiver. Producers never hold back-references
//! to consumers.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// Payload types that can ride the bus.
pub trait Event: Clone + Send + Sync + std::fmt::Debug + 'static {}

impl<T> Event for T where T: Clone + Send + Sync + std::fmt::Debug + 'static {}

#[derive(Clone, Debug, Error)]
pub enum BusError {
    #[error("no subscribers for event")]
    NoSubscribers,
}

#[async_trait]
pub trait EventBus<E>: Send + Sync
where
    E: Event,
{
    async fn publish(&self, event: E) -> Result<(), BusError>;
    fn subscribe(&self) -> broadcast::Receiver<E>;
}

/// Broadcast-backed bus. Publishing with zero subscribers is not an
/// error for status streams; use [`StatusChannel::emit`] for that.
pub struct InMemoryBus<E>
where
    E: Event,
{
    sender: broadcast::Sender<E>,
}

impl<E> InMemoryBus<E>
where
    E: Event,
{
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self { sender })
    }
}

#[async_trait]
impl<E> EventBus<E> for InMemoryBus<E>
where
    E: Event,
{
    async fn publish(&self, event: E) -> Result<(), BusError> {
        self.sender
            .send(event)
            .map(|_| ())
            .map_err(|_| BusError::NoSubscribers)
    }

    fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }
}

/// Fire-and-forget wrapper for status producers: events are dropped when
/// nobody listens instead of surfacing an error at the emit site.
#[derive(Clone)]
pub struct StatusChannel<E>
where
    E: Event,
{
    sender: broadcast::Sender<E>,
}

impl<E> StatusChannel<E>
where
    E: Event,
{
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: E) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E> Default for StatusChannel<E>
where
    E: Event,
{
    fn default() -> Self {
        Self::new(256)
    }
}

/// Materialize an mpsc receiver from a subscription so observers can
/// await events without handling broadcast lag semantics.
pub fn to_mpsc<E>(mut rx: broadcast::Receiver<E>, capacity: usize) -> mpsc::Receiver<E>
where
    E: Event,
{
    let (tx, out_rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    out_rx
}

/// Collect every event published on a subscription; test helper for
/// asserting causal order of status streams.
pub async fn drain_now<E>(rx: &mut broadcast::Receiver<E>) -> Vec<E>
where
    E: Event,
{
    let mut collected = Vec::new();
    while let Ok(event) = rx.try_recv() {
        collected.push(event);
    }
    collected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Ping(u32);

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = InMemoryBus::<Ping>::new(8);
        let mut rx = bus.subscribe();
        bus.publish(Ping(1)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Ping(1));
    }

    #[tokio::test]
    async fn publish_without_subscribers_errors() {
        let bus = InMemoryBus::<Ping>::new(8);
        assert!(bus.publish(Ping(1)).await.is_err());
    }

    #[tokio::test]
    async fn status_channel_drops_silently() {
        let channel = StatusChannel::<Ping>::new(8);
        channel.emit(Ping(1));

        let mut rx = channel.subscribe();
        channel.emit(Ping(2));
        assert_eq!(rx.recv().await.unwrap(), Ping(2));
    }

    #[tokio::test]
    async fn mpsc_materialization_preserves_order() {
        let channel = StatusChannel::<Ping>::new(8);
        let mut rx = to_mpsc(channel.subscribe(), 8);
        for i in 0..4 {
            channel.emit(Ping(i));
        }
        for i in 0..4 {
            assert_eq!(rx.recv().await.unwrap(), Ping(i));
        }
    }
}
