//! vigil-core: shared types for the capture/inference pipeline
//!
//! Configuration, the error taxonomy, capture events, the label table,
//! detection results with their cloud wire format, and the traits the
//! inference consumer uses to hand results to the outside world.

pub mod config;
pub mod detection;
pub mod error;
pub mod event;
pub mod labels;
pub mod sink;

pub use config::{DeviceSelector, PipelineConfig, OUTPUT_TENSOR_NAMES};
pub use detection::{DetectionBox, DetectionResult, InferenceOutcome, PixelBox, ResultPayload, WireDetection};
pub use error::{Error, Result};
pub use event::ImageCaptureEvent;
pub use labels::LabelTable;
pub use sink::{ArtifactStore, ResultPublisher, LATEST_INFERENCE_KEY};
