//! Driver for serial POS weighing scales speaking the KPOS 1530 protocol.
//!
//! ```no_run
//! use pos_scale::ScaleRegistry;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pos_scale::device::DeviceError> {
//!     let registry = ScaleRegistry::global();
//!     if let Some(scale) = registry.current().await? {
//!         println!("{}", scale.read_value().await);
//!     }
//!     Ok(())
//! }
//! ```
pub mod config;
pub mod device;
pub mod serial;

pub use config::{PortSettings, ScaleConfig};
pub use device::{DetectionReport, ScaleDetector, ScaleRegistry};
pub use serial::{ReadOutcome, ScaleSession, SerialError, Weight};
