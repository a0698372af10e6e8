//! S3 artifact store
//!
//! Uploads the annotated frame with a single signed `PUT`. The key is fixed, so
//! every successful cycle overwrites the previous object.

use crate::credentials::CredentialsProvider;
use crate::error::CloudError;
use crate::sigv4::{self, CanonicalRequest};
use async_trait::async_trait;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use vigil_core::{ArtifactStore, PipelineConfig, Result as CoreResult, LATEST_INFERENCE_KEY};

const SERVICE: &str = "s3";

pub struct S3ArtifactStore {
    bucket: String,
    region: String,
    key: String,
    /// Path-style base URL used instead of the regional endpoint
    endpoint: Option<String>,
    client: reqwest::Client,
    credentials: Arc<dyn CredentialsProvider>,
}

impl S3ArtifactStore {
    pub fn new(
        bucket: impl Into<String>,
        region: impl Into<String>,
        credentials: Arc<dyn CredentialsProvider>,
    ) -> Result<Self, CloudError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            bucket: bucket.into(),
            region: region.into(),
            key: LATEST_INFERENCE_KEY.to_string(),
            endpoint: None,
            client,
            credentials,
        })
    }

    pub fn from_config(config: &PipelineConfig, credentials: Arc<dyn CredentialsProvider>) -> Result<Self, CloudError> {
        Self::new(config.bucket.clone(), config.region.clone(), credentials)
    }

    /// Send requests to `endpoint` (e.g. `http://127.0.0.1:9000`) with
    /// path-style addressing.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into().trim_end_matches('/').to_string());
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Request URL and the host/path pair it is signed with.
    fn target(&self) -> Result<(String, String, String), CloudError> {
        let key_path = sigv4::uri_encode(&self.key, false);
        match &self.endpoint {
            Some(endpoint) => {
                let host = endpoint
                    .split_once("://")
                    .map(|(_, rest)| rest)
                    .filter(|rest| !rest.is_empty())
                    .ok_or_else(|| CloudError::Config(format!("Invalid S3 endpoint: {}", endpoint)))?
                    .to_string();
                let path = format!("/{}/{}", sigv4::uri_encode(&self.bucket, true), key_path);
                Ok((format!("{}{}", endpoint, path), host, path))
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", self.bucket, self.region);
                let path = format!("/{}", key_path);
                Ok((format!("https://{}{}", host, path), host, path))
            }
        }
    }

    async fn put(&self, path: &Path) -> Result<String, CloudError> {
        if self.bucket.is_empty() {
            return Err(CloudError::Config("S3_BUCKET_NAME is not set".to_string()));
        }
        let body = tokio::fs::read(path).await?;
        let payload_sha256 = sigv4::sha256_hex(&body);
        let (url, host, canonical_path) = self.target()?;

        let credentials = self.credentials.credentials().await?;
        let request = CanonicalRequest {
            method: "PUT".to_string(),
            host,
            path: canonical_path,
            query: Vec::new(),
            headers: vec![
                ("content-type".to_string(), "image/jpeg".to_string()),
                ("x-amz-content-sha256".to_string(), payload_sha256.clone()),
            ],
            payload_sha256: payload_sha256.clone(),
        };
        let signed = sigv4::sign(&request, &credentials, &self.region, SERVICE, Utc::now())?;

        debug!("Uploading {} ({} bytes) to {}", path.display(), body.len(), url);
        let builder = self
            .client
            .put(&url)
            .header("content-type", "image/jpeg")
            .header("x-amz-content-sha256", payload_sha256)
            .body(body);
        let response = signed.apply(builder).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CloudError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let location = format!("s3://{}/{}", self.bucket, self.key);
        info!("Uploaded {} to {}", path.display(), location);
        Ok(location)
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn upload(&self, path: &Path) -> CoreResult<String> {
        self.put(path).await.map_err(CloudError::into_storage)
    }
}
