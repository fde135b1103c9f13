//! Hand tracking to OSC bridge.
//!
//! Tracking devices are polled on a dedicated thread, frames cross a
//! lock-free queue, and the consumer side turns each hand into addressed
//! float messages sent over UDP.

pub mod app;
pub mod persistence;
pub mod pipeline;
pub mod tracking;
pub mod transport;
