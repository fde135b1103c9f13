//! # Pipeline Module
//!
//! Consumer side of the frame flow. Frames drained from the queue pass
//! through two stages:
//!
//! ```text
//! Frame ──► HandSorter ──► DataProcessor ──► TransportSink
//!           (per serial     (alias, filters,
//!            hand filter)    zero burst)
//! ```
//!
//! Both stages are built without references to each other and wired once by
//! the orchestrator.

pub mod addressing;
pub mod data_processor;
pub mod filters;
pub mod hand_sorter;
pub mod message_buffer;

pub use data_processor::{DataProcessor, FrameObserver};
pub use filters::{FilterFlag, FilterSettings, FilterSnapshot};
pub use hand_sorter::{FrameSink, HandSorter};
