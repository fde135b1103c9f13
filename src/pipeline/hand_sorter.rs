use crate::tracking::frame::{Frame, HandSide};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use tracing::{debug, info};

/// Receives `(serial, filtered frame)` from the sorter.
pub type FrameSink = Box<dyn Fn(&str, Frame) + Send + Sync>;

/// Restricts each device's frames to its assigned hand.
///
/// Assignments are written from command threads and read on the consumer
/// thread; the map has its own mutex. The downstream stage is wired once
/// after construction with [`HandSorter::connect`].
#[derive(Default)]
pub struct HandSorter {
    assignments: Mutex<HashMap<String, HandSide>>,
    downstream: RwLock<Option<FrameSink>>,
}

impl HandSorter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, sink: FrameSink) {
        *self.downstream.write() = Some(sink);
    }

    /// Sets the hand for `serial`; `None` lets both hands through.
    pub fn set_device_hand(&self, serial: &str, hand: Option<HandSide>) {
        let mut assignments = self.assignments.lock();
        match hand {
            Some(side) => {
                assignments.insert(serial.to_string(), side);
                info!("Device {} restricted to {} hand", serial, side);
            }
            None => {
                if assignments.remove(serial).is_some() {
                    info!("Device {} reports both hands", serial);
                }
            }
        }
    }

    pub fn device_hand(&self, serial: &str) -> Option<HandSide> {
        self.assignments.lock().get(serial).copied()
    }

    /// Output keeps the device id, timestamp and the order of retained hands.
    pub fn filter_frame(&self, serial: &str, frame: Frame) -> Frame {
        let Some(side) = self.device_hand(serial) else {
            return frame;
        };
        Frame {
            hands: frame.hands.into_iter().filter(|h| h.side == side).collect(),
            ..frame
        }
    }

    pub fn process_frame(&self, serial: &str, frame: Frame) {
        let filtered = self.filter_frame(serial, frame);
        match &*self.downstream.read() {
            Some(sink) => sink(serial, filtered),
            None if !filtered.hands.is_empty() => {
                debug!(
                    "No downstream connected, dropping frame with {} hand(s) from {}",
                    filtered.hands.len(),
                    serial
                );
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::frame::Hand;
    use std::sync::Arc;

    fn two_hands() -> Frame {
        Frame::new("SN1", 42, vec![Hand::new(HandSide::Left), Hand::new(HandSide::Right)])
    }

    #[test]
    fn unassigned_device_passes_everything() {
        let sorter = HandSorter::new();
        assert_eq!(sorter.filter_frame("SN1", two_hands()), two_hands());
    }

    #[test]
    fn assignment_keeps_only_matching_side() {
        let sorter = HandSorter::new();
        sorter.set_device_hand("SN1", Some(HandSide::Left));

        let filtered = sorter.filter_frame("SN1", two_hands());
        assert_eq!(filtered.hands.len(), 1);
        assert_eq!(filtered.hands[0].side, HandSide::Left);
        assert_eq!(filtered.timestamp, 42);
        assert_eq!(filtered.device_id, "SN1");

        // other devices unaffected
        assert_eq!(sorter.filter_frame("SN2", two_hands()).hands.len(), 2);
    }

    #[test]
    fn clearing_restores_pass_through() {
        let sorter = HandSorter::new();
        sorter.set_device_hand("SN1", Some(HandSide::Right));
        sorter.set_device_hand("SN1", None);
        assert_eq!(sorter.device_hand("SN1"), None);
        assert_eq!(sorter.filter_frame("SN1", two_hands()), two_hands());
    }

    #[test]
    fn forwards_to_connected_sink() {
        let sorter = HandSorter::new();
        sorter.set_device_hand("SN1", Some(HandSide::Right));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        sorter.connect(Box::new(move |serial, frame| {
            sink_seen.lock().push((serial.to_string(), frame.hands.len()));
        }));

        sorter.process_frame("SN1", two_hands());
        sorter.process_frame("SN2", Frame::new("SN2", 1, Vec::new()));

        assert_eq!(
            *seen.lock(),
            vec![("SN1".to_string(), 1), ("SN2".to_string(), 0)]
        );
    }

    #[test]
    fn unconnected_sorter_drops_frames() {
        let sorter = HandSorter::new();
        sorter.process_frame("SN1", two_hands());
    }
}
