pub mod detector;
pub mod models;
pub mod registry;

pub use detector::{ScaleDetector, RELEASE_DELAY};
pub use models::{DetectionReport, ProbeOutcome, ProbeRecord};
pub use registry::ScaleRegistry;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Global scale registry already initialized")]
    AlreadyInitialized,

    #[error("Serial communication error: {0}")]
    SerialError(#[from] crate::serial::SerialError),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
