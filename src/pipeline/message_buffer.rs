//! Reusable storage for the messages of one frame.
//!
//! Slots are overwritten in place, so once the buffer has grown to the
//! largest frame seen, building a frame allocates nothing.

use super::addressing::HandAddress;
use crate::transport::OutboundMessage;

#[derive(Debug, Default)]
pub struct MessageBuffer {
    slots: Vec<OutboundMessage>,
    len: usize,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets the current messages, keeping their storage.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn messages(&self) -> &[OutboundMessage] {
        &self.slots[..self.len]
    }

    pub fn push_field(&mut self, address: &HandAddress, category: &str, value: f32) {
        let slot = self.next_slot(value);
        address.write_field(&mut slot.address, category);
    }

    pub fn push_sub(&mut self, address: &HandAddress, category: &str, subtype: &str, value: f32) {
        let slot = self.next_slot(value);
        address.write_sub(&mut slot.address, category, subtype);
    }

    pub fn push_finger(&mut self, address: &HandAddress, name: &str, field: &str, value: f32) {
        let slot = self.next_slot(value);
        address.write_finger(&mut slot.address, name, field);
    }

    fn next_slot(&mut self, value: f32) -> &mut OutboundMessage {
        if self.len == self.slots.len() {
            self.slots.push(OutboundMessage::new(String::new(), value));
        }
        let slot = &mut self.slots[self.len];
        self.len += 1;

        slot.address.clear();
        slot.values.clear();
        slot.values.push(value);
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::alias_registry::DeviceAlias;
    use crate::tracking::frame::HandSide;
    use std::num::NonZeroU32;

    fn left() -> HandAddress {
        HandAddress::new(&DeviceAlias::from_index(NonZeroU32::MIN), HandSide::Left)
    }

    #[test]
    fn refill_overwrites_previous_frame() {
        let address = left();
        let mut buffer = MessageBuffer::new();
        buffer.push_sub(&address, "palm", "tx", 1.0);
        buffer.push_finger(&address, "thumb", "isExtended", 1.0);
        buffer.push_field(&address, "grabStrength", 0.5);
        assert_eq!(buffer.len(), 3);

        buffer.clear();
        assert!(buffer.is_empty());
        buffer.push_field(&address, "pinchStrength", 0.25);

        let messages = buffer.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].address, "/leap/dev1/left/pinchStrength");
        assert_eq!(messages[0].values, vec![0.25]);
    }

    #[test]
    fn steady_state_reuses_address_storage() {
        let address = left();
        let mut buffer = MessageBuffer::new();
        buffer.push_finger(&address, "middle", "tz", 3.0);
        let before = buffer.messages()[0].address.as_ptr();

        for frame in 0..10 {
            buffer.clear();
            buffer.push_sub(&address, "wrist", "ty", frame as f32);
        }

        let message = &buffer.messages()[0];
        assert_eq!(message.address.as_ptr(), before);
        assert_eq!(message.address, "/leap/dev1/left/wrist/ty");
        assert_eq!(message.values, vec![9.0]);
    }
}
