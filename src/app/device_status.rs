use crate::tracking::frame::HandSide;
use chrono::{DateTime, Local};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// What the UI shows for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub serial: String,
    pub alias: Option<String>,
    pub connected: bool,
    pub assigned_hand: Option<HandSide>,
    pub last_hand_count: usize,
    pub frame_count: u64,
    pub last_change: DateTime<Local>,
}

impl DeviceStatus {
    fn new(serial: &str) -> Self {
        Self {
            serial: serial.to_string(),
            alias: None,
            connected: false,
            assigned_hand: None,
            last_hand_count: 0,
            frame_count: 0,
            last_change: Local::now(),
        }
    }
}

/// Per-serial status, written from the polling and consumer threads.
///
/// Entries survive disconnects so the alias and counters stay visible.
#[derive(Debug, Default)]
pub struct DeviceStatusBoard {
    devices: RwLock<BTreeMap<String, DeviceStatus>>,
}

impl DeviceStatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, serial: &str, apply: impl FnOnce(&mut DeviceStatus)) {
        let mut devices = self.devices.write();
        let status = devices
            .entry(serial.to_string())
            .or_insert_with(|| DeviceStatus::new(serial));
        apply(status);
    }

    pub fn mark_connected(&self, serial: &str, alias: &str, assigned_hand: Option<HandSide>) {
        self.update(serial, |status| {
            status.alias = Some(alias.to_string());
            status.connected = true;
            status.assigned_hand = assigned_hand;
            status.last_change = Local::now();
        });
    }

    pub fn mark_lost(&self, serial: &str) {
        self.update(serial, |status| {
            status.connected = false;
            status.last_hand_count = 0;
            status.last_change = Local::now();
        });
    }

    pub fn set_assigned_hand(&self, serial: &str, hand: Option<HandSide>) {
        self.update(serial, |status| status.assigned_hand = hand);
    }

    pub fn record_frame(&self, serial: &str, alias: &str, hand_count: usize) {
        self.update(serial, |status| {
            if status.alias.is_none() {
                status.alias = Some(alias.to_string());
            }
            status.last_hand_count = hand_count;
            status.frame_count += 1;
        });
    }

    pub fn connected_serials(&self) -> Vec<String> {
        self.devices
            .read()
            .values()
            .filter(|s| s.connected)
            .map(|s| s.serial.clone())
            .collect()
    }

    pub fn device_status(&self, serial: &str) -> Option<DeviceStatus> {
        self.devices.read().get(serial).cloned()
    }

    pub fn all(&self) -> Vec<DeviceStatus> {
        self.devices.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_frame_lose_cycle() {
        let board = DeviceStatusBoard::new();
        board.mark_connected("SN1", "dev1", Some(HandSide::Left));
        board.mark_connected("SN2", "dev2", None);
        board.record_frame("SN1", "dev1", 1);
        board.record_frame("SN1", "dev1", 2);

        let status = board.device_status("SN1").unwrap();
        assert!(status.connected);
        assert_eq!(status.frame_count, 2);
        assert_eq!(status.last_hand_count, 2);
        assert_eq!(status.assigned_hand, Some(HandSide::Left));

        board.mark_lost("SN1");
        assert_eq!(board.connected_serials(), vec!["SN2".to_string()]);
        let status = board.device_status("SN1").unwrap();
        assert!(!status.connected);
        assert_eq!(status.alias.as_deref(), Some("dev1"));
        assert_eq!(status.frame_count, 2);
    }

    #[test]
    fn frames_from_unannounced_device_create_entry() {
        let board = DeviceStatusBoard::new();
        board.record_frame("SN9", "dev4", 0);
        let status = board.device_status("SN9").unwrap();
        assert!(!status.connected);
        assert_eq!(status.alias.as_deref(), Some("dev4"));
        assert!(board.device_status("missing").is_none());
    }
}
