//! vigil-cloud: AWS adapters for inference results
//!
//! [`S3ArtifactStore`] uploads the annotated frame and [`IotResultPublisher`]
//! sends the detection message to an IoT Core topic. Both sign their requests
//! with SigV4 using credentials from the environment or the edge runtime.

pub mod credentials;
pub mod error;
pub mod iot;
pub mod s3;
pub mod sigv4;

pub use credentials::{resolve_credentials, ContainerCredentials, Credentials, CredentialsProvider, StaticCredentials};
pub use error::CloudError;
pub use iot::IotResultPublisher;
pub use s3::S3ArtifactStore;
