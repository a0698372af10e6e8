//! vigil-bus: on-device publish/subscribe
//!
//! The capture producer and the inference consumer talk through a
//! [`LocalBus`]: fire-and-forget publishing, at-most-once delivery, and
//! handlers run by the bus on its own tasks. [`InProcessBus`] serves both
//! agents inside one process; the HTTP bridge connects two processes.

pub mod error;
pub mod http;
pub mod memory;
pub mod queue;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub use error::BusError;
pub use http::{bridge_router, serve_bridge, RemoteBus};
pub use memory::InProcessBus;
pub use queue::{DropOldestQueue, PushOutcome};

/// Message delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: JsonValue,
}

/// Receives messages for a subscribed topic.
///
/// Errors are logged by the bus and never end the subscription.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: BusMessage) -> Result<(), BusError>;
}

/// Adapts a synchronous closure into a [`MessageHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(BusMessage) -> Result<(), BusError> + Send + Sync,
{
    async fn handle(&self, message: BusMessage) -> Result<(), BusError> {
        (self.0)(message)
    }
}

/// Local publish/subscribe channel
#[async_trait]
pub trait LocalBus: Send + Sync {
    /// Fire-and-forget publish. Succeeds even when nobody is subscribed.
    async fn publish(&self, topic: &str, payload: JsonValue) -> Result<(), BusError>;

    /// Register `handler` for every later message on `topic`.
    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, BusError>;
}

/// Handle to an active subscription
pub struct Subscription {
    topic: String,
    task: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(topic: String, task: JoinHandle<()>) -> Self {
        Self { topic, task }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop delivering messages to the handler.
    pub fn cancel(self) {
        self.task.abort();
    }
}

pub(crate) fn validate_topic(topic: &str) -> Result<(), BusError> {
    if topic.is_empty() || topic.len() > 256 {
        return Err(BusError::InvalidTopic(format!("{:?}", topic)));
    }
    if topic.contains(['#', '+']) {
        return Err(BusError::InvalidTopic(format!("wildcards are not supported: {}", topic)));
    }
    Ok(())
}
