//! Error types for vigil-eye

use thiserror::Error;
use vigil_core::Error as CoreError;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Camera error: {0}")]
    Camera(String),

    /// Connection could not be established or the call did not complete
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered with a non-OK status
    #[error("Inference RPC failed: {0}")]
    Rpc(#[from] tonic::Status),

    /// The server answered, but not with what the model contract promises
    #[error("Malformed inference response: {0}")]
    Malformed(String),

    #[error("Unknown class index {index} (label table has {labels} entries)")]
    UnknownLabel { index: i64, labels: usize },

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("OpenCV error: {0}")]
    OpenCv(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl VisionError {
    /// Whether another attempt at the same call could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            VisionError::Transport(_) => true,
            VisionError::Rpc(status) => matches!(
                status.code(),
                tonic::Code::Unavailable | tonic::Code::DeadlineExceeded
            ),
            _ => false,
        }
    }
}

impl From<VisionError> for CoreError {
    fn from(err: VisionError) -> Self {
        match err {
            VisionError::Camera(msg) | VisionError::OpenCv(msg) => CoreError::Device(msg),
            VisionError::Core(inner) => inner,
            other => CoreError::Inference(other.to_string()),
        }
    }
}

impl From<tonic::transport::Error> for VisionError {
    fn from(err: tonic::transport::Error) -> Self {
        VisionError::Transport(err.to_string())
    }
}

#[cfg(feature = "opencv")]
impl From<opencv::Error> for VisionError {
    fn from(err: opencv::Error) -> Self {
        VisionError::OpenCv(err.message)
    }
}
