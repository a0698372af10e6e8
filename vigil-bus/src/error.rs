//! Error types for vigil-bus

use thiserror::Error;
use vigil_core::Error as CoreError;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Queue closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl BusError {
    /// Whether the message may have reached the peer despite the error.
    ///
    /// True for a remote publish that connected but then timed out or lost
    /// its response.
    pub fn maybe_delivered(&self) -> bool {
        match self {
            BusError::Network(e) => !(e.is_connect() || e.is_builder()),
            _ => false,
        }
    }
}

impl From<BusError> for CoreError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Core(inner) => inner,
            other => CoreError::Bus(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_error_to_core_error() {
        let core: CoreError = BusError::Publish("peer down".to_string()).into();
        match core {
            CoreError::Bus(msg) => assert!(msg.contains("peer down")),
            other => panic!("Expected Bus error, got {:?}", other),
        }
    }

    #[test]
    fn test_local_failures_are_undelivered() {
        assert!(!BusError::InvalidTopic("a b".to_string()).maybe_delivered());
        assert!(!BusError::Publish("Bridge answered 400".to_string()).maybe_delivered());
        assert!(!BusError::Closed.maybe_delivered());
    }

    #[test]
    fn test_core_error_passes_through() {
        let core: CoreError = BusError::Core(CoreError::Serialization("bad".to_string())).into();
        assert!(matches!(core, CoreError::Serialization(_)));
    }
}
