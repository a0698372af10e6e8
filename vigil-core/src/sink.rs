//! Outbound contracts for inference results
//!
//! The consumer depends only on these traits; cloud adapters live in
//! `vigil-cloud`. Both return an error instead of ending the process so the
//! caller can apply its own failure policy.

use crate::detection::ResultPayload;
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Fixed object key the latest annotated frame is uploaded to.
pub const LATEST_INFERENCE_KEY: &str = "camera/latest-inference.jpg";

/// Publishes one detection message per processed frame
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish(&self, payload: &ResultPayload) -> Result<()>;
}

/// Stores the annotated frame of a processed image
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Upload the file at `path`, returning the object location.
    async fn upload(&self, path: &Path) -> Result<String>;
}
