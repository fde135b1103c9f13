//! Application layer: wiring of the pipeline stages and the status the UI reads.

pub mod device_status;
pub mod orchestrator;

pub use device_status::{DeviceStatus, DeviceStatusBoard};
pub use orchestrator::{Orchestrator, OrchestratorError, OrchestratorSettings};
