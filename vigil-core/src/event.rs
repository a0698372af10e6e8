//! Capture event carried on the local bus

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};

/// Announces a frame persisted by the capture producer.
///
/// Ownership of the referenced file moves to whoever consumes the event;
/// the producer never touches it again after publishing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageCaptureEvent {
    pub image_path: PathBuf,
    #[serde(rename = "timestamp", deserialize_with = "deserialize_timestamp")]
    pub captured_at: DateTime<Utc>,
}

impl ImageCaptureEvent {
    pub fn new(image_path: impl Into<PathBuf>, captured_at: DateTime<Utc>) -> Self {
        Self {
            image_path: image_path.into(),
            captured_at,
        }
    }

    pub fn path(&self) -> &Path {
        &self.image_path
    }

    /// Encode as the JSON bus payload.
    pub fn to_payload(&self) -> Result<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode a JSON bus payload.
    pub fn from_payload(payload: &JsonValue) -> Result<Self> {
        let event: ImageCaptureEvent = serde_json::from_value(payload.clone())
            .map_err(|e| Error::Serialization(format!("Invalid capture event: {}", e)))?;
        if event.image_path.as_os_str().is_empty() {
            return Err(Error::Serialization("Capture event has an empty image_path".to_string()));
        }
        Ok(event)
    }
}

/// Accept RFC 3339 timestamps and naive ISO-8601 ones (taken as UTC).
fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| serde::de::Error::custom(format!("invalid timestamp {:?}: {}", raw, e)))
}
