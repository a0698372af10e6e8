//! Pipeline configuration
//!
//! Resolved once at startup: built-in defaults, then an optional JSON/TOML
//! file, then environment overrides. The result is shared read-only
//! (`Arc<PipelineConfig>`) for the lifetime of the process.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Names of the output tensors the detection model must return.
pub const OUTPUT_TENSOR_NAMES: [&str; 4] = [
    "detection_boxes",
    "detection_classes",
    "detection_scores",
    "num_detections",
];

/// Camera selector: a device node path or a numeric index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceSelector {
    Index(u32),
    Path(PathBuf),
}

impl DeviceSelector {
    /// Parse `/dev/...` as a path and anything else as an integer index.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.starts_with("/dev/") {
            return Some(DeviceSelector::Path(PathBuf::from(raw)));
        }
        raw.parse::<u32>().ok().map(DeviceSelector::Index)
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Index(index) => write!(f, "{}", index),
            DeviceSelector::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Immutable pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Camera device to open on every capture cycle
    pub device: DeviceSelector,
    /// Pause between capture cycles, in seconds
    pub capture_interval_secs: u64,
    /// Requested capture resolution (width, height)
    pub resolution: (u32, u32),
    /// Directory captured and annotated frames are written to
    pub output_directory: PathBuf,
    /// Local bus topic carrying capture events
    pub local_topic: String,
    /// Cloud topic receiving detection results
    pub result_topic: String,
    /// Inference server gRPC address (`host:port`)
    pub inference_server: String,
    pub model_name: String,
    pub model_version: i64,
    pub input_tensor_name: String,
    /// Boxes, classes, scores and detection count tensors, in that order
    pub output_tensor_names: Vec<String>,
    /// Newline-delimited label file, line N is class N
    pub label_path: PathBuf,
    /// Maximum number of detections handled per frame
    pub max_detections: usize,
    pub bucket: String,
    pub region: String,
    /// IoT data-plane host the results are published to
    pub iot_endpoint: String,
    pub inference_timeout_secs: u64,
    pub inference_retries: u32,
    /// Bound of the consumer work queue
    pub queue_capacity: usize,
    pub shutdown_grace_secs: u64,
    pub jpeg_quality: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            device: DeviceSelector::Path(PathBuf::from("/dev/video0")),
            capture_interval_secs: 10,
            resolution: (640, 480),
            output_directory: PathBuf::from("/tmp"),
            local_topic: "camera/images".to_string(),
            result_topic: "camera/inference".to_string(),
            inference_server: "localhost:9000".to_string(),
            model_name: "faster_rcnn".to_string(),
            model_version: 1,
            input_tensor_name: "input_tensor".to_string(),
            output_tensor_names: OUTPUT_TENSOR_NAMES.iter().map(|s| s.to_string()).collect(),
            label_path: PathBuf::from("label_map.txt"),
            max_detections: 10,
            bucket: String::new(),
            region: "us-east-1".to_string(),
            iot_endpoint: String::new(),
            inference_timeout_secs: 10,
            inference_retries: 2,
            queue_capacity: 4,
            shutdown_grace_secs: 15,
            jpeg_quality: 90,
        }
    }
}

impl PipelineConfig {
    /// Resolve the configuration: defaults, optional file, process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = base.with_overrides(|key| std::env::var(key).ok());
        info!("Pipeline configuration resolved: {:?}", config);
        Ok(config)
    }

    /// Load a JSON or TOML configuration file. Missing fields take defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config = Self::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration text, trying JSON first and then TOML.
    pub fn from_str(content: &str) -> Result<Self> {
        if let Ok(config) = serde_json::from_str::<PipelineConfig>(content) {
            return Ok(config);
        }
        toml::from_str::<PipelineConfig>(content)
            .map_err(|e| Error::Config(format!("Config is neither valid JSON nor TOML: {}", e)))
    }

    /// Defaults plus overrides from `lookup`, without touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::default().with_overrides(lookup)
    }

    /// Apply environment-style overrides from `lookup`.
    ///
    /// Empty values are ignored. Values that fail to parse or validate are
    /// logged and the current value is kept.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(raw) = get("CAMERA_INDEX") {
            match DeviceSelector::parse(&raw) {
                Some(device) => self.device = device,
                None => warn!("Invalid camera index: {}. Using default: {}", raw, self.device),
            }
        }

        override_parsed(&get, "CAPTURE_INTERVAL", &mut self.capture_interval_secs, |v| *v > 0);
        override_parsed(&get, "IMAGE_WIDTH", &mut self.resolution.0, |v| *v > 0);
        override_parsed(&get, "IMAGE_HEIGHT", &mut self.resolution.1, |v| *v > 0);

        if let Some(dir) = get("OUTPUT_DIRECTORY").or_else(|| get("SNAP_USER_DATA")) {
            self.output_directory = PathBuf::from(dir);
        }
        if let Some(topic) = get("TOPIC").or_else(|| get("SUB_TOPIC")) {
            self.local_topic = topic;
        }
        if let Some(topic) = get("PUB_TOPIC") {
            self.result_topic = topic;
        }
        if let Some(url) = get("MODEL_SERVER_URL") {
            self.inference_server = url;
        }
        if let Some(name) = get("MODEL_NAME") {
            self.model_name = name;
        }
        override_parsed(&get, "MODEL_VERSION", &mut self.model_version, |v| *v >= 1);
        if let Some(name) = get("MODEL_INPUT_NAME") {
            self.input_tensor_name = name;
        }
        if let Some(path) = get("LABELS_FILE") {
            self.label_path = PathBuf::from(path);
        }
        override_parsed(&get, "DETECTIONS_LIMIT", &mut self.max_detections, |_| true);
        if let Some(bucket) = get("S3_BUCKET_NAME") {
            self.bucket = bucket;
        }
        if let Some(region) = get("AWS_REGION") {
            self.region = region;
        }
        if let Some(endpoint) = get("IOT_DATA_ENDPOINT") {
            self.iot_endpoint = endpoint;
        }
        override_parsed(&get, "INFERENCE_TIMEOUT_SECS", &mut self.inference_timeout_secs, |v| *v > 0);
        override_parsed(&get, "INFERENCE_RETRIES", &mut self.inference_retries, |_| true);
        override_parsed(&get, "QUEUE_CAPACITY", &mut self.queue_capacity, |v| *v > 0);
        override_parsed(&get, "SHUTDOWN_GRACE_SECS", &mut self.shutdown_grace_secs, |_| true);

        if self.label_path.is_relative() {
            if let Some(artifacts) = get("ARTIFACT_PATH") {
                self.label_path = PathBuf::from(artifacts).join(&self.label_path);
            }
        }

        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.capture_interval_secs == 0 {
            return Err(Error::Config("capture_interval_secs must be > 0".to_string()));
        }
        if self.resolution.0 == 0 || self.resolution.1 == 0 {
            return Err(Error::Config("Resolution must be non-zero".to_string()));
        }
        if self.model_version < 1 {
            return Err(Error::Config("model_version must be >= 1".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be > 0".to_string()));
        }
        if self.inference_timeout_secs == 0 {
            return Err(Error::Config("inference_timeout_secs must be > 0".to_string()));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(Error::Config("jpeg_quality must be between 1 and 100".to_string()));
        }
        if self.output_tensor_names.len() != OUTPUT_TENSOR_NAMES.len()
            || self.output_tensor_names.iter().any(|name| name.is_empty())
        {
            return Err(Error::Config(format!(
                "output_tensor_names must list {} non-empty names (boxes, classes, scores, count)",
                OUTPUT_TENSOR_NAMES.len()
            )));
        }
        if self.local_topic.is_empty() {
            return Err(Error::Config("local_topic must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_secs(self.capture_interval_secs)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn override_parsed<T, G, V>(get: &G, key: &str, field: &mut T, valid: V)
where
    T: FromStr + fmt::Display,
    G: Fn(&str) -> Option<String>,
    V: Fn(&T) -> bool,
{
    let Some(raw) = get(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => *field = value,
        _ => warn!("Invalid value for {}: {:?}. Using default: {}", key, raw, field),
    }
}
