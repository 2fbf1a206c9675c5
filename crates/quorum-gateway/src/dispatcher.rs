use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};
use uuid::Uuid;

use quorum_core::LivePublisher;
use quorum_types::events::GatewayEvent;

type TopicSender = (Uuid, mpsc::UnboundedSender<GatewayEvent>);

/// Fans events out to connected clients.
///
/// Feed events go to everyone through one broadcast channel. Topic events
/// (a user's notifications) go only to the connections subscribed to that
/// topic; a user may hold several connections at once.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// topic -> live connections subscribed to it
    topics: RwLock<HashMap<String, Vec<TopicSender>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                topics: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to feed events.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Adds `conn_id` to `topic`, returning the receiving end of its queue.
    pub fn subscribe_topic(&self, topic: &str, conn_id: Uuid) -> mpsc::UnboundedReceiver<GatewayEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut topics = self.inner.topics.write().unwrap_or_else(PoisonError::into_inner);
        topics.entry(topic.to_string()).or_default().push((conn_id, tx));
        debug!("Connection {} joined {}", conn_id, topic);
        rx
    }

    /// Removes `conn_id` from `topic`. Other connections of the same user stay.
    pub fn unsubscribe_topic(&self, topic: &str, conn_id: Uuid) {
        let mut topics = self.inner.topics.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(senders) = topics.get_mut(topic) {
            senders.retain(|(id, _)| *id != conn_id);
            if senders.is_empty() {
                topics.remove(topic);
            }
        }
        debug!("Connection {} left {}", conn_id, topic);
    }

    /// Number of live connections on `topic`.
    pub fn topic_size(&self, topic: &str) -> usize {
        self.inner
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Sends `event` to every connection on `topic` and drops connections
    /// whose receiver is gone. Returns how many connections got it.
    pub fn send_to_topic(&self, topic: &str, event: GatewayEvent) -> usize {
        let mut topics = self.inner.topics.write().unwrap_or_else(PoisonError::into_inner);
        let Some(senders) = topics.get_mut(topic) else {
            trace!("No subscribers on {}", topic);
            return 0;
        };

        senders.retain(|(_, tx)| tx.send(event.clone()).is_ok());
        let delivered = senders.len();
        if delivered == 0 {
            topics.remove(topic);
        }
        delivered
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl LivePublisher for Dispatcher {
    /// Nobody listening is not an error: the inbox already holds the event.
    fn publish(&self, topic: &str, event: GatewayEvent) -> anyhow::Result<()> {
        let delivered = self.send_to_topic(topic, event);
        trace!("Published on {} to {} connection(s)", topic, delivered);
        Ok(())
    }

    fn broadcast(&self, event: GatewayEvent) {
        // No receivers is the normal idle state
        let _ = self.inner.broadcast_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use quorum_types::models::TargetRef;

    use super::*;

    fn like_event() -> GatewayEvent {
        GatewayEvent::LikeUpdated {
            target: TargetRef::Question(Uuid::new_v4()),
            like_count: 1,
        }
    }

    #[tokio::test]
    async fn topic_events_reach_every_connection_of_the_user() {
        let dispatcher = Dispatcher::new();
        let mut first = dispatcher.subscribe_topic("user-a", Uuid::new_v4());
        let mut second = dispatcher.subscribe_topic("user-a", Uuid::new_v4());
        let mut other = dispatcher.subscribe_topic("user-b", Uuid::new_v4());

        dispatcher.publish("user-a", like_event()).unwrap();

        assert!(first.recv().await.is_some());
        assert!(second.recv().await.is_some());
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_ok() {
        let dispatcher = Dispatcher::new();
        assert!(dispatcher.publish("user-nobody", like_event()).is_ok());
        assert_eq!(dispatcher.send_to_topic("user-nobody", like_event()), 0);
    }

    #[tokio::test]
    async fn closed_receivers_are_pruned() {
        let dispatcher = Dispatcher::new();
        let kept = dispatcher.subscribe_topic("user-a", Uuid::new_v4());
        let dropped = dispatcher.subscribe_topic("user-a", Uuid::new_v4());
        drop(dropped);

        assert_eq!(dispatcher.send_to_topic("user-a", like_event()), 1);
        assert_eq!(dispatcher.topic_size("user-a"), 1);

        drop(kept);
        assert_eq!(dispatcher.send_to_topic("user-a", like_event()), 0);
        assert_eq!(dispatcher.topic_size("user-a"), 0);
    }

    #[tokio::test]
    async fn unsubscribe_only_removes_that_connection() {
        let dispatcher = Dispatcher::new();
        let conn = Uuid::new_v4();
        let _a = dispatcher.subscribe_topic("user-a", conn);
        let _b = dispatcher.subscribe_topic("user-a", Uuid::new_v4());

        dispatcher.unsubscribe_topic("user-a", conn);
        assert_eq!(dispatcher.topic_size("user-a"), 1);
    }

    #[tokio::test]
    async fn feed_events_reach_all_subscribers() {
        let dispatcher = Dispatcher::new();
        let mut rx1 = dispatcher.subscribe();
        let mut rx2 = dispatcher.subscribe();

        LivePublisher::broadcast(&dispatcher, like_event());

        assert!(matches!(rx1.recv().await.unwrap(), GatewayEvent::LikeUpdated { .. }));
        assert!(matches!(rx2.recv().await.unwrap(), GatewayEvent::LikeUpdated { .. }));
    }
}
