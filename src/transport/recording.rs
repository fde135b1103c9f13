use super::{OutboundMessage, TransportSink};
use parking_lot::Mutex;
use tracing::debug;

/// In-memory sink. Keeps every message in send order; bundles are flattened.
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<OutboundMessage>>,
    target: Mutex<Option<(String, u16)>>,
    closed: Mutex<bool>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.messages.lock().clone()
    }

    /// Returns and clears everything recorded so far.
    pub fn take(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut *self.messages.lock())
    }

    pub fn addresses(&self) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .map(|m| m.address.clone())
            .collect()
    }

    /// Last value sent to `address`.
    pub fn last_value(&self, address: &str) -> Option<f32> {
        self.messages
            .lock()
            .iter()
            .rev()
            .find(|m| m.address == address)
            .map(OutboundMessage::value)
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    pub fn target(&self) -> Option<(String, u16)> {
        self.target.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

impl TransportSink for RecordingSink {
    fn send_osc_message(&self, message: &OutboundMessage) {
        if self.is_closed() {
            debug!("Recording sink closed, dropping {}", message.address);
            return;
        }
        self.messages.lock().push(message.clone());
    }

    fn update_target(&self, host: &str, port: u16) {
        *self.target.lock() = Some((host.to_string(), port));
        *self.closed.lock() = false;
    }

    fn close(&self) {
        *self.closed.lock() = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_in_order_and_take_clears() {
        let sink = RecordingSink::new();
        sink.send_osc_message(&OutboundMessage::new("/a", 1.0));
        sink.send_osc_bundle(&[
            OutboundMessage::new("/b", 2.0),
            OutboundMessage::new("/a", 3.0),
        ]);

        assert_eq!(sink.addresses(), vec!["/a", "/b", "/a"]);
        assert_eq!(sink.last_value("/a"), Some(3.0));
        assert_eq!(sink.take().len(), 3);
        assert!(sink.is_empty());
    }

    #[test]
    fn closed_sink_drops_until_retargeted() {
        let sink = RecordingSink::new();
        sink.close();
        sink.send_osc_message(&OutboundMessage::new("/a", 1.0));
        assert!(sink.is_empty());

        sink.update_target("10.0.0.2", 9001);
        sink.send_osc_message(&OutboundMessage::new("/a", 1.0));
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.target(), Some(("10.0.0.2".to_string(), 9001)));
    }
}
