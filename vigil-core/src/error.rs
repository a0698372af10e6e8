use thiserror::Error;

/// Pipeline-wide error taxonomy.
///
/// Component crates define their own error enums and convert into this one,
/// mapping onto the kind that decides how the failure is handled: device and
/// config errors are recovered locally, inference errors drop the event,
/// storage/publish/cleanup errors are logged and never block later steps.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Device error: {0}")]
    Device(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Cleanup error: {0}")]
    Cleanup(String),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
