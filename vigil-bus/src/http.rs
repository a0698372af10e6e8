//! HTTP bridge between a capture process and an inference process
//!
//! The inference side serves [`bridge_router`], which re-publishes every
//! `POST /topics/{topic}` body onto its in-process bus. The capture side
//! publishes through [`RemoteBus`].

use crate::{validate_topic, BusError, LocalBus, MessageHandler, Subscription};
use crate::memory::InProcessBus;
use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value as JsonValue};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Router exposing an in-process bus over HTTP
pub fn bridge_router(bus: Arc<InProcessBus>) -> Router {
    Router::new()
        .route("/topics/*topic", post(publish_handler))
        .route("/health", get(health_check))
        .with_state(bus)
}

/// Serve the bridge on `listener` until `shutdown` resolves.
pub async fn serve_bridge<F>(
    bus: Arc<InProcessBus>,
    listener: TcpListener,
    shutdown: F,
) -> Result<(), BusError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!("Bus bridge listening on {}", addr);
    axum::serve(listener, bridge_router(bus))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Bus bridge stopped");
    Ok(())
}

async fn publish_handler(
    State(bus): State<Arc<InProcessBus>>,
    Path(topic): Path<String>,
    Json(payload): Json<JsonValue>,
) -> Result<Json<JsonValue>, StatusCode> {
    let size = serde_json::to_vec(&payload).map(|v| v.len()).unwrap_or(usize::MAX);
    if size > MAX_PAYLOAD_BYTES {
        warn!("Bridge payload too large: {} bytes", size);
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }
    match bus.publish(&topic, payload).await {
        Ok(()) => Ok(Json(json!({"status": "ok"}))),
        Err(BusError::InvalidTopic(t)) => {
            warn!("Bridge rejected topic {}", t);
            Err(StatusCode::BAD_REQUEST)
        }
        Err(e) => {
            warn!("Bridge publish failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn health_check() -> Json<JsonValue> {
    Json(json!({"status": "healthy"}))
}

/// Publish-only bus that forwards to a peer's HTTP bridge
pub struct RemoteBus {
    base_url: String,
    client: reqwest::Client,
}

impl RemoteBus {
    pub fn new(base_url: impl Into<String>) -> Result<Self, BusError> {
        Self::with_timeout(base_url, Duration::from_secs(5))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BusError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(BusError::Publish(format!("Invalid bus URL: {}", base_url)));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl LocalBus for RemoteBus {
    async fn publish(&self, topic: &str, payload: JsonValue) -> Result<(), BusError> {
        validate_topic(topic)?;
        let url = format!("{}/topics/{}", self.base_url, topic);
        let response = self.client.post(&url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(BusError::Publish(format!(
                "Bridge at {} answered {}",
                self.base_url,
                response.status()
            )));
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        _handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, BusError> {
        Err(BusError::Unsupported(format!(
            "cannot subscribe to {} through a remote bus",
            topic
        )))
    }
}
