//! AWS credential resolution
//!
//! Static keys from the environment, or temporary credentials from the
//! container credential endpoint that edge runtimes (Greengrass token
//! exchange, ECS) expose to their components.

use crate::error::CloudError;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Temporary credentials are refreshed this long before they expire.
const REFRESH_MARGIN_MINUTES: i64 = 5;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>, session_token: Option<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
            expires_at: None,
        }
    }

    /// Still usable at `now`, keeping the refresh margin.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expiry) => now + ChronoDuration::minutes(REFRESH_MARGIN_MINUTES) < expiry,
            None => true,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn credentials(&self) -> Result<Credentials, CloudError>;
}

/// Fixed credentials
pub struct StaticCredentials(Credentials);

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self(credentials)
    }
}

#[async_trait]
impl CredentialsProvider for StaticCredentials {
    async fn credentials(&self) -> Result<Credentials, CloudError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerCredentialsResponse {
    access_key_id: String,
    secret_access_key: String,
    token: Option<String>,
    expiration: Option<DateTime<Utc>>,
}

/// Credentials served over HTTP by the local runtime, cached until shortly
/// before they expire.
pub struct ContainerCredentials {
    uri: String,
    authorization: Option<String>,
    client: reqwest::Client,
    cache: Mutex<Option<Credentials>>,
}

impl ContainerCredentials {
    pub fn new(uri: impl Into<String>, authorization: Option<String>) -> Result<Self, CloudError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            uri: uri.into(),
            authorization,
            client,
            cache: Mutex::new(None),
        })
    }

    async fn fetch(&self) -> Result<Credentials, CloudError> {
        let mut request = self.client.get(&self.uri);
        if let Some(token) = &self.authorization {
            request = request.header("authorization", token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CloudError::Status {
                service: "credential endpoint",
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let body: ContainerCredentialsResponse = response
            .json()
            .await
            .map_err(|e| CloudError::Credentials(format!("Invalid credential response: {}", e)))?;

        Ok(Credentials {
            access_key_id: body.access_key_id,
            secret_access_key: body.secret_access_key,
            session_token: body.token,
            expires_at: body.expiration,
        })
    }
}

#[async_trait]
impl CredentialsProvider for ContainerCredentials {
    async fn credentials(&self) -> Result<Credentials, CloudError> {
        let cached = self.cache.lock().clone();
        if let Some(cached) = cached.filter(|c| c.is_fresh(Utc::now())) {
            return Ok(cached);
        }
        let fresh = self.fetch().await?;
        debug!("Refreshed credentials from {}, expiring {:?}", self.uri, fresh.expires_at);
        *self.cache.lock() = Some(fresh.clone());
        Ok(fresh)
    }
}

/// Resolved on every call so a missing setup fails the affected upload or
/// publish instead of the whole process.
struct Unconfigured;

#[async_trait]
impl CredentialsProvider for Unconfigured {
    async fn credentials(&self) -> Result<Credentials, CloudError> {
        Err(CloudError::Credentials(
            "no AWS credentials: set AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY or AWS_CONTAINER_CREDENTIALS_FULL_URI"
                .to_string(),
        ))
    }
}

/// Pick a credentials source from environment-style `lookup`.
pub fn resolve_credentials<F>(lookup: F) -> Result<Arc<dyn CredentialsProvider>, CloudError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if let (Some(key), Some(secret)) = (get("AWS_ACCESS_KEY_ID"), get("AWS_SECRET_ACCESS_KEY")) {
        info!("Using AWS credentials from the environment");
        return Ok(Arc::new(StaticCredentials::new(Credentials::new(
            key,
            secret,
            get("AWS_SESSION_TOKEN"),
        ))));
    }
    if let Some(uri) = get("AWS_CONTAINER_CREDENTIALS_FULL_URI") {
        info!("Using AWS credentials from {}", uri);
        return Ok(Arc::new(ContainerCredentials::new(
            uri,
            get("AWS_CONTAINER_AUTHORIZATION_TOKEN"),
        )?));
    }
    Ok(Arc::new(Unconfigured))
}
