//! Tracking subsystem: device bookkeeping and frame acquisition
//!
//! Implements the producer side of the pipeline:
//!
//! 1. [`event_source`] - Boundary to the vendor tracking service
//! 2. [`device_registry`] - Connect/lost reconciliation keyed by serial
//! 3. [`poller`] - Polling thread that decodes tracking snapshots
//! 4. [`frame_queue`] - Lock-free SPSC handoff to the consumer
//!
//! # Architecture
//!
//! ```text
//! Service ──► Poller ──► DeviceRegistry   (connect / lost, synchronous)
//!               │
//!               └──► FrameQueue ──► consumer tick
//!                  (decoded Frames)
//! ```
//!
//! The poller runs on its own thread and polls with a 30ms timeout, sleeping
//! 1ms between polls. It never blocks on the queue: a full queue drops frames.

pub mod device_registry;
pub mod event_source;
pub mod frame;
pub mod frame_queue;
pub mod poller;
pub mod simulated;

pub use device_registry::{DeviceListener, DeviceRecord, DeviceRegistry};
pub use event_source::{DeviceHandle, DeviceId, DeviceRef, SourceError, SourceEvent, TrackingEventSource};
pub use frame::{Frame, Hand, HandSide};
pub use poller::{LeapPoller, PollerError, PollerHandle, PollerSettings};
