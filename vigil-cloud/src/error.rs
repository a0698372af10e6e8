//! Error types for vigil-cloud

use thiserror::Error;
use vigil_core::Error as CoreError;

#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{service} answered {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl CloudError {
    /// Convert into the core taxonomy as a failed upload.
    pub fn into_storage(self) -> CoreError {
        match self {
            CloudError::Core(inner) => inner,
            other => CoreError::Storage(other.to_string()),
        }
    }

    /// Convert into the core taxonomy as a failed result publish.
    pub fn into_publish(self) -> CoreError {
        match self {
            CloudError::Core(inner) => inner,
            other => CoreError::Publish(other.to_string()),
        }
    }
}

impl From<CloudError> for CoreError {
    fn from(err: CloudError) -> Self {
        match err {
            CloudError::Config(msg) => CoreError::Config(msg),
            other => other.into_storage(),
        }
    }
}
