//! In-process bus over tokio broadcast channels

use crate::{validate_topic, BusError, BusMessage, LocalBus, MessageHandler, Subscription};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::FutureExt;
use serde_json::Value as JsonValue;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

const DEFAULT_TOPIC_CAPACITY: usize = 64;

/// Bus shared by agents running in the same process.
///
/// Each topic owns a broadcast channel; every subscription runs its handler
/// on a dedicated task, one message at a time.
pub struct InProcessBus {
    topics: DashMap<String, broadcast::Sender<BusMessage>>,
    capacity: usize,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    /// Messages a slow subscriber may fall behind before it starts losing them.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalBus for InProcessBus {
    async fn publish(&self, topic: &str, payload: JsonValue) -> Result<(), BusError> {
        validate_topic(topic)?;
        let message = BusMessage {
            topic: topic.to_string(),
            payload,
        };
        match self.sender(topic).send(message) {
            Ok(receivers) => debug!("Published on {} to {} subscriber(s)", topic, receivers),
            Err(_) => debug!("Published on {} with no subscribers", topic),
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, BusError> {
        validate_topic(topic)?;
        let mut receiver = self.sender(topic).subscribe();
        let topic_name = topic.to_string();

        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => deliver(handler.as_ref(), message).await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Subscriber on {} lagged, {} message(s) lost", topic_name, missed);
                    }
                    Err(RecvError::Closed) => {
                        info!("Topic {} closed, ending subscription", topic_name);
                        break;
                    }
                }
            }
        });

        info!("Subscribed to topic: {}", topic);
        Ok(Subscription::new(topic.to_string(), task))
    }
}

/// Run a handler, containing both its errors and its panics.
async fn deliver(handler: &dyn MessageHandler, message: BusMessage) {
    let topic = message.topic.clone();
    match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Handler for {} failed: {}", topic, e),
        Err(_) => error!("Handler for {} panicked; subscription continues", topic),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FnHandler;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Forward(mpsc::UnboundedSender<BusMessage>);

    #[async_trait]
    impl MessageHandler for Forward {
        async fn handle(&self, message: BusMessage) -> Result<(), BusError> {
            self.0.send(message).map_err(|e| BusError::Handler(e.to_string()))
        }
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<BusMessage>) -> BusMessage {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for delivery")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_publish_delivers_to_subscriber() {
        let bus = InProcessBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = bus.subscribe("camera/images", Arc::new(Forward(tx))).await.unwrap();

        bus.publish("camera/images", json!({"n": 1})).await.unwrap();
        let message = recv(&mut rx).await;
        assert_eq!(message.topic, "camera/images");
        assert_eq!(message.payload, json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = InProcessBus::new();
        assert!(bus.publish("nobody/listens", json!({})).await.is_ok());
        assert_eq!(bus.subscriber_count("nobody/listens"), 0);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = InProcessBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = bus.subscribe("a", Arc::new(Forward(tx))).await.unwrap();

        bus.publish("b", json!("ignored")).await.unwrap();
        bus.publish("a", json!("seen")).await.unwrap();
        assert_eq!(recv(&mut rx).await.payload, json!("seen"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handler_failure_and_panic_keep_subscription() {
        let bus = InProcessBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let handler = FnHandler(move |msg: BusMessage| {
            let n = msg.payload.as_i64().unwrap_or_default();
            if n == 1 {
                return Err(BusError::Handler("rejected".to_string()));
            }
            if n == 2 {
                panic!("handler blew up");
            }
            seen_clone.lock().push(n);
            Ok(())
        });
        let sub = bus.subscribe("t", Arc::new(handler)).await.unwrap();

        for n in [1, 2, 3] {
            bus.publish("t", json!(n)).await.unwrap();
        }
        for _ in 0..50 {
            if !seen.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(*seen.lock(), vec![3]);
        assert!(sub.is_active());
    }

    #[tokio::test]
    async fn test_cancel_stops_delivery() {
        let bus = InProcessBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = bus.subscribe("t", Arc::new(Forward(tx))).await.unwrap();
        sub.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;

        bus.publish("t", json!(1)).await.unwrap();
        let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(matches!(result, Ok(None) | Err(_)));
    }

    #[tokio::test]
    async fn test_invalid_topic_rejected() {
        let bus = InProcessBus::new();
        assert!(matches!(bus.publish("", json!({})).await, Err(BusError::InvalidTopic(_))));
    }
}
