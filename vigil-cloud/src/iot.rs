//! IoT Core result publisher
//!
//! Publishes the detection payload through the IoT data-plane HTTPS API:
//! `POST /topics/{topic}?qos=1`, signed for `iotdata`.

use crate::credentials::CredentialsProvider;
use crate::error::CloudError;
use crate::sigv4::{self, CanonicalRequest};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use vigil_core::{PipelineConfig, ResultPayload, ResultPublisher, Result as CoreResult};

const SERVICE: &str = "iotdata";

pub struct IotResultPublisher {
    endpoint: String,
    region: String,
    topic: String,
    scheme: &'static str,
    client: reqwest::Client,
    credentials: Arc<dyn CredentialsProvider>,
}

impl IotResultPublisher {
    /// `endpoint` is the account's data endpoint host, e.g.
    /// `abc123-ats.iot.us-east-1.amazonaws.com`.
    pub fn new(
        endpoint: impl Into<String>,
        region: impl Into<String>,
        topic: impl Into<String>,
        credentials: Arc<dyn CredentialsProvider>,
    ) -> Result<Self, CloudError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        let endpoint: String = endpoint.into();
        let (scheme, host) = match endpoint.split_once("://") {
            Some(("http", host)) => ("http", host.to_string()),
            Some((_, host)) => ("https", host.to_string()),
            None => ("https", endpoint),
        };
        Ok(Self {
            endpoint: host.trim_end_matches('/').to_string(),
            region: region.into(),
            topic: topic.into(),
            scheme,
            client,
            credentials,
        })
    }

    pub fn from_config(config: &PipelineConfig, credentials: Arc<dyn CredentialsProvider>) -> Result<Self, CloudError> {
        Self::new(
            config.iot_endpoint.clone(),
            config.region.clone(),
            config.result_topic.clone(),
            credentials,
        )
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Path as sent, and as signed. IoT signs the path encoded a second time.
    fn paths(&self) -> (String, String) {
        let request_path = format!("/topics/{}", sigv4::uri_encode(&self.topic, true));
        let canonical_path = sigv4::uri_encode(&request_path, false);
        (request_path, canonical_path)
    }

    async fn post(&self, payload: &ResultPayload) -> Result<(), CloudError> {
        if self.endpoint.is_empty() {
            return Err(CloudError::Config("IOT_DATA_ENDPOINT is not set".to_string()));
        }
        let body = payload.to_bytes()?;
        let payload_sha256 = sigv4::sha256_hex(&body);
        let (request_path, canonical_path) = self.paths();

        let credentials = self.credentials.credentials().await?;
        let request = CanonicalRequest {
            method: "POST".to_string(),
            host: self.endpoint.clone(),
            path: canonical_path,
            query: vec![("qos".to_string(), "1".to_string())],
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            payload_sha256,
        };
        let signed = sigv4::sign(&request, &credentials, &self.region, SERVICE, Utc::now())?;

        let url = format!("{}://{}{}?qos=1", self.scheme, self.endpoint, request_path);
        let builder = self
            .client
            .post(&url)
            .header("content-type", "application/json")
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
        debug!("Published {} detections to {}", payload.len(), self.topic);
        Ok(())
    }
}

#[async_trait]
impl ResultPublisher for IotResultPublisher {
    async fn publish(&self, payload: &ResultPayload) -> CoreResult<()> {
        self.post(payload).await.map_err(CloudError::into_publish)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Credentials, StaticCredentials};
    use axum::{
        body::Bytes,
        extract::{RawQuery, State},
        http::{HeaderMap, StatusCode, Uri},
        routing::post,
        Router,
    };
    use parking_lot::Mutex;
    use vigil_core::{DetectionResult, Error as CoreError};

    #[derive(Default)]
    struct Received {
        uri: String,
        query: Option<String>,
        headers: Option<HeaderMap>,
        body: Vec<u8>,
    }

    fn credentials() -> Arc<dyn CredentialsProvider> {
        Arc::new(StaticCredentials::new(Credentials::new("AKID", "secret", None)))
    }

    fn payload() -> ResultPayload {
        ResultPayload::from_results(&[
            DetectionResult {
                index: 0,
                class_name: "person".to_string(),
                score: 0.91,
                detections_count: 2,
            },
            DetectionResult {
                index: 1,
                class_name: "dog".to_string(),
                score: 0.4,
                detections_count: 2,
            },
        ])
    }

    async fn serve(status: StatusCode) -> (String, Arc<Mutex<Received>>) {
        let received = Arc::new(Mutex::new(Received::default()));
        let app = Router::new()
            .route(
                "/topics/:topic",
                post(
                    move |State(received): State<Arc<Mutex<Received>>>,
                          uri: Uri,
                          RawQuery(query): RawQuery,
                          headers: HeaderMap,
                          body: Bytes| async move {
                        let mut slot = received.lock();
                        slot.uri = uri.path().to_string();
                        slot.query = query;
                        slot.headers = Some(headers);
                        slot.body = body.to_vec();
                        status
                    },
                ),
            )
            .with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{}", addr), received)
    }

    #[test]
    fn test_topic_path_is_encoded_twice_for_signing() {
        let publisher = IotResultPublisher::new("abc-ats.iot.us-east-1.amazonaws.com", "us-east-1", "camera/inference", credentials()).unwrap();
        let (request_path, canonical_path) = publisher.paths();
        assert_eq!(request_path, "/topics/camera%2Finference");
        assert_eq!(canonical_path, "/topics/camera%252Finference");
        assert_eq!(publisher.scheme, "https");
    }

    #[tokio::test]
    async fn test_publish_posts_json_with_qos() {
        let (endpoint, received) = serve(StatusCode::OK).await;
        let publisher = IotResultPublisher::new(endpoint, "us-east-1", "camera/inference", credentials()).unwrap();

        publisher.publish(&payload()).await.unwrap();

        let received = received.lock();
        assert_eq!(received.uri, "/topics/camera%2Finference");
        assert_eq!(received.query.as_deref(), Some("qos=1"));
        let body: serde_json::Value = serde_json::from_slice(&received.body).unwrap();
        assert_eq!(body["0"]["detection_classes"], "person");
        assert_eq!(body["1"]["num_detections"], 2);
        let headers = received.headers.as_ref().unwrap();
        let auth = headers.get("authorization").unwrap().to_str().unwrap();
        assert!(auth.contains("/us-east-1/iotdata/aws4_request"));
        assert!(auth.contains("SignedHeaders=content-type;host;x-amz-date,"));
        assert!(headers.get("x-amz-security-token").is_none());
    }

    #[tokio::test]
    async fn test_rejected_publish_is_publish_error() {
        let (endpoint, _) = serve(StatusCode::UNAUTHORIZED).await;
        let publisher = IotResultPublisher::new(endpoint, "us-east-1", "camera/inference", credentials()).unwrap();
        let err = publisher.publish(&payload()).await.unwrap_err();
        assert!(matches!(err, CoreError::Publish(ref msg) if msg.contains("401")));
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_publish_error() {
        let publisher = IotResultPublisher::new("", "us-east-1", "camera/inference", credentials()).unwrap();
        assert!(matches!(publisher.publish(&payload()).await, Err(CoreError::Publish(_))));
    }
}
