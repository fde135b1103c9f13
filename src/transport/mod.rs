//! Outbound message delivery.
//!
//! The data processor only knows the [`TransportSink`] trait. [`osc_sender`]
//! implements it over UDP with OSC encoding; [`recording`] keeps messages in
//! memory for tests and dry runs.

pub mod osc_sender;
pub mod recording;

use std::fmt::{self, Display};

/// One addressed message. The pipeline always sends a single value.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub address: String,
    pub values: Vec<f32>,
}

impl OutboundMessage {
    pub fn new(address: impl Into<String>, value: f32) -> Self {
        Self {
            address: address.into(),
            values: vec![value],
        }
    }

    /// First value, or 0 for an empty payload.
    pub fn value(&self) -> f32 {
        self.values.first().copied().unwrap_or_default()
    }
}

impl Display for OutboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.address, self.values)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to bind socket: {0}")]
    Socket(String),

    #[error("Failed to resolve target {0}: {1}")]
    Resolve(String, String),

    #[error("Failed to encode message: {0}")]
    Encode(String),

    #[error("Transport is closed")]
    Closed,

    #[error("Send failed: {0}")]
    Send(String),
}

/// Best-effort delivery of outbound messages.
///
/// Implementations never block the caller on failure and never return errors
/// from the send path: failures are logged and the message is dropped.
pub trait TransportSink: Send + Sync + 'static {
    fn send_osc_message(&self, message: &OutboundMessage);

    /// Sends several messages as one unit. Defaults to one send per message.
    fn send_osc_bundle(&self, messages: &[OutboundMessage]) {
        for message in messages {
            self.send_osc_message(message);
        }
    }

    /// Points subsequent sends at `host:port`.
    fn update_target(&self, host: &str, port: u16);

    /// Releases the socket. Sends fail silently until the next `update_target`.
    fn close(&self);
}
