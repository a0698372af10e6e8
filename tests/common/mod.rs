//! Fakes shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use vigil_core::{
    ArtifactStore, DeviceSelector, Error as CoreError, ImageCaptureEvent, LabelTable, PipelineConfig, ResultPayload,
    ResultPublisher,
};
use vigil_eye::{FrameSource, InputTensor, ModelInferenceClient, NamedTensors, OutputTensor, VisionError};

pub const COCO_HEAD: &str = "person\nbicycle\ncar\nmotorcycle\nairplane\nbus\ntrain\ntruck\nboat\ntraffic light\n\
fire hydrant\nstreet sign\nstop sign\nparking meter\nbench\nbird\ncat\ndog\nhorse\nsheep";

pub fn labels() -> Arc<LabelTable> {
    Arc::new(LabelTable::parse(COCO_HEAD))
}

pub fn config(dir: &Path) -> PipelineConfig {
    PipelineConfig {
        output_directory: dir.to_path_buf(),
        resolution: (64, 48),
        capture_interval_secs: 1,
        queue_capacity: 4,
        shutdown_grace_secs: 1,
        ..PipelineConfig::default()
    }
}

/// Write a small JPEG into `dir` and return an event for it.
pub fn captured_frame(dir: &Path, name: &str) -> ImageCaptureEvent {
    let path = dir.join(name);
    RgbImage::from_pixel(64, 48, Rgb([30, 60, 90])).save(&path).unwrap();
    ImageCaptureEvent::new(path, chrono::Utc::now())
}

pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    files.sort();
    files
}

/// Camera that fails its first `failures` grabs.
pub struct FlakyCamera {
    failures: usize,
    grabs: AtomicUsize,
    grabbed_at: Mutex<Vec<Instant>>,
}

impl FlakyCamera {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            grabs: AtomicUsize::new(0),
            grabbed_at: Mutex::new(Vec::new()),
        }
    }

    pub fn grabs(&self) -> usize {
        self.grabs.load(Ordering::SeqCst)
    }

    /// Runtime clock reading at each grab attempt
    pub fn grab_times(&self) -> Vec<Instant> {
        self.grabbed_at.lock().clone()
    }
}

impl FrameSource for FlakyCamera {
    fn grab(&self, _: &DeviceSelector, (w, h): (u32, u32)) -> Result<RgbImage, VisionError> {
        self.grabbed_at.lock().push(Instant::now());
        let n = self.grabs.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(VisionError::Camera("device busy".to_string()));
        }
        Ok(RgbImage::from_pixel(w, h, Rgb([120, 110, 100])))
    }
}

/// Build the four detection tensors for `classes` and `scores`.
pub fn detection_tensors(classes: &[f32], scores: &[f32], num_detections: f32) -> NamedTensors {
    let n = classes.len() as i64;
    let boxes: Vec<f32> = classes.iter().flat_map(|_| [0.2, 0.1, 0.8, 0.9]).collect();
    let mut tensors = NamedTensors::new();
    tensors.insert("detection_boxes".into(), OutputTensor { shape: vec![1, n, 4], values: boxes });
    tensors.insert("detection_classes".into(), OutputTensor { shape: vec![1, n], values: classes.to_vec() });
    tensors.insert("detection_scores".into(), OutputTensor { shape: vec![1, n], values: scores.to_vec() });
    tensors.insert("num_detections".into(), OutputTensor { shape: vec![1], values: vec![num_detections] });
    tensors
}

/// Model returning the same tensors for every call.
pub struct StaticModel {
    tensors: NamedTensors,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StaticModel {
    pub fn new(tensors: NamedTensors) -> Self {
        Self {
            tensors,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelInferenceClient for StaticModel {
    async fn predict(&self, input: &InputTensor, _: &str, _: i64) -> Result<NamedTensors, VisionError> {
        assert_eq!(input.shape, vec![1, 255, 255, 3]);
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(self.tensors.clone())
    }
}

/// Model server that refuses connections.
pub struct UnreachableModel;

#[async_trait]
impl ModelInferenceClient for UnreachableModel {
    async fn predict(&self, _: &InputTensor, _: &str, _: i64) -> Result<NamedTensors, VisionError> {
        Err(VisionError::Transport("connection refused".to_string()))
    }
}

/// Records publishes and uploads; can be told to fail either.
#[derive(Default)]
pub struct RecordingSink {
    pub payloads: Mutex<Vec<ResultPayload>>,
    pub uploads: Mutex<Vec<PathBuf>>,
    pub fail_publish: bool,
    pub fail_upload: bool,
}

impl RecordingSink {
    pub fn failing(fail_publish: bool, fail_upload: bool) -> Self {
        Self {
            fail_publish,
            fail_upload,
            ..Self::default()
        }
    }

    pub fn publish_count(&self) -> usize {
        self.payloads.lock().len()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().len()
    }
}

#[async_trait]
impl ResultPublisher for RecordingSink {
    async fn publish(&self, payload: &ResultPayload) -> vigil_core::Result<()> {
        if self.fail_publish {
            return Err(CoreError::Publish("topic unavailable".to_string()));
        }
        self.payloads.lock().push(payload.clone());
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for RecordingSink {
    async fn upload(&self, path: &Path) -> vigil_core::Result<String> {
        if self.fail_upload {
            return Err(CoreError::Storage("bucket unavailable".to_string()));
        }
        assert!(path.exists(), "annotated file must exist at upload time");
        self.uploads.lock().push(path.to_path_buf());
        Ok(format!("s3://bucket/{}", vigil_core::LATEST_INFERENCE_KEY))
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
