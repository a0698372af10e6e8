//! vigil-eye: the camera side and the inference side of the pipeline
//!
//! [`CaptureProducer`] grabs frames and announces them on the local bus.
//! [`InferenceConsumer`] queues those announcements and, one at a time,
//! sends each frame to a remote detection model, annotates it, and hands
//! the results to a publisher and an artifact store.

pub mod annotate;
pub mod camera;
pub mod capture;
pub mod consumer;
pub mod error;
pub mod font;
pub mod inference;
pub mod proto;
pub mod tensor;

pub use annotate::{Annotation, DetectionAnnotator};
pub use camera::{default_camera, FrameSource, UnavailableCamera};
#[cfg(feature = "opencv")]
pub use camera::OpenCvCamera;
pub use capture::{persist_frame, CaptureProducer, CaptureState, CaptureStats};
pub use consumer::{annotated_path_for, ConsumerStats, InferenceConsumer, ProcessReport};
pub use error::VisionError;
pub use inference::{
    GrpcInferenceClient, ModelInferenceClient, NamedTensors, OutputTensor, RawDetections, RetryingClient,
};
pub use tensor::{InputTensor, MODEL_INPUT_SIZE};
