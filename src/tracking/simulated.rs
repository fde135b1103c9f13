//! Event sources that run without tracking hardware.
//!
//! [`ScriptedSource`] replays injected events and records every handle call,
//! which is what the registry and poller tests drive. [`SyntheticSource`]
//! generates continuous hand motion for a configurable number of devices and
//! backs the binary when no vendor service is available.

use super::event_source::{
    DeviceHandle, DeviceId, DeviceRef, RawBone, RawDigit, RawHand, SourceError, SourceEvent,
    TrackingEventSource, TrackingSnapshot,
};
use super::frame::{HandSide, Palm, Quaternion, Vector3, BONES_PER_FINGER, FINGER_NAMES};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

const HANDLE_BASE: u64 = 0x1000;

fn handle_for(id: DeviceId) -> DeviceHandle {
    DeviceHandle(HANDLE_BASE + id as u64)
}

fn id_for(handle: DeviceHandle) -> DeviceId {
    handle.0.saturating_sub(HANDLE_BASE) as DeviceId
}

/// Behavior of one device known to a [`ScriptedSource`].
#[derive(Debug, Clone)]
pub struct ScriptedDevice {
    pub id: DeviceId,
    /// `None` makes serial retrieval fail, as for the service's fallback device.
    pub serial: Option<String>,
    pub fail_open: bool,
    pub fail_subscribe: bool,
}

impl ScriptedDevice {
    pub fn new(id: DeviceId, serial: &str) -> Self {
        Self {
            id,
            serial: Some(serial.to_string()),
            fail_open: false,
            fail_subscribe: false,
        }
    }

    pub fn unidentified(id: DeviceId) -> Self {
        Self {
            id,
            serial: None,
            fail_open: false,
            fail_subscribe: false,
        }
    }

    pub fn failing_subscribe(mut self) -> Self {
        self.fail_subscribe = true;
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }
}

/// Calls the scripted source received, in order.
#[derive(Debug, Default, Clone)]
pub struct SourceJournal {
    pub opened: Vec<DeviceHandle>,
    pub subscribed: Vec<DeviceHandle>,
    pub unsubscribed: Vec<DeviceHandle>,
    pub closed: Vec<DeviceHandle>,
    pub connection_closed: bool,
}

/// Shared handle for injecting events after the source moved to the poller.
#[derive(Debug, Clone, Default)]
pub struct ScriptFeed {
    events: Arc<Mutex<VecDeque<SourceEvent>>>,
}

impl ScriptFeed {
    pub fn push(&self, event: SourceEvent) {
        self.events.lock().push_back(event);
    }

    pub fn push_tracking(&self, device_id: DeviceId, timestamp: u64, hands: Vec<RawHand>) {
        self.push(SourceEvent::Tracking(TrackingSnapshot {
            device_id,
            timestamp,
            hands,
        }));
    }

    pub fn pending(&self) -> usize {
        self.events.lock().len()
    }
}

#[derive(Debug, Default)]
pub struct ScriptedSource {
    devices: HashMap<DeviceId, ScriptedDevice>,
    present_at_start: Vec<DeviceId>,
    feed: ScriptFeed,
    journal: Arc<Mutex<SourceJournal>>,
    fail_connection: bool,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device that is visible at startup enumeration.
    pub fn with_device(mut self, device: ScriptedDevice) -> Self {
        self.present_at_start.push(device.id);
        self.devices.insert(device.id, device);
        self
    }

    /// Device that only shows up through a later connect event.
    pub fn with_late_device(mut self, device: ScriptedDevice) -> Self {
        self.devices.insert(device.id, device);
        self
    }

    pub fn failing_connection(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    pub fn feed(&self) -> ScriptFeed {
        self.feed.clone()
    }

    pub fn journal(&self) -> Arc<Mutex<SourceJournal>> {
        self.journal.clone()
    }

    fn device(&self, handle: DeviceHandle) -> Option<&ScriptedDevice> {
        self.devices.get(&id_for(handle))
    }
}

impl TrackingEventSource for ScriptedSource {
    fn open_connection(&mut self) -> Result<(), SourceError> {
        if self.fail_connection {
            return Err(SourceError::ConnectionFailed(
                "scripted connection failure".to_string(),
            ));
        }
        Ok(())
    }

    fn device_list(&mut self) -> Result<Vec<DeviceRef>, SourceError> {
        Ok(self
            .present_at_start
            .iter()
            .map(|id| DeviceRef { id: *id })
            .collect())
    }

    fn open_device(&mut self, device: DeviceRef) -> Result<DeviceHandle, SourceError> {
        match self.devices.get(&device.id) {
            Some(d) if !d.fail_open => {
                let handle = handle_for(device.id);
                self.journal.lock().opened.push(handle);
                Ok(handle)
            }
            Some(_) => Err(SourceError::OpenFailed(
                device.id,
                "scripted open failure".to_string(),
            )),
            None => Err(SourceError::OpenFailed(
                device.id,
                "unknown device".to_string(),
            )),
        }
    }

    fn close_device(&mut self, handle: DeviceHandle) {
        self.journal.lock().closed.push(handle);
    }

    fn subscribe(&mut self, handle: DeviceHandle) -> Result<(), SourceError> {
        if self.device(handle).is_some_and(|d| d.fail_subscribe) {
            return Err(SourceError::SubscribeFailed(format!(
                "scripted subscribe failure for {:?}",
                handle
            )));
        }
        self.journal.lock().subscribed.push(handle);
        Ok(())
    }

    fn unsubscribe(&mut self, handle: DeviceHandle) -> Result<(), SourceError> {
        self.journal.lock().unsubscribed.push(handle);
        Ok(())
    }

    fn device_serial(&mut self, handle: DeviceHandle) -> Result<String, SourceError> {
        self.device(handle)
            .and_then(|d| d.serial.clone())
            .ok_or_else(|| SourceError::SerialUnavailable(format!("{:?}", handle)))
    }

    fn poll(&mut self, timeout: Duration) -> Result<SourceEvent, SourceError> {
        if let Some(event) = self.feed.events.lock().pop_front() {
            return Ok(event);
        }
        std::thread::sleep(timeout.min(Duration::from_millis(1)));
        Ok(SourceEvent::None)
    }

    fn close_connection(&mut self) {
        self.journal.lock().connection_closed = true;
    }
}

/// Generates smooth hand motion for `device_count` virtual devices.
///
/// Device `n` (1-based) reports serial `SIM-000n`. Odd devices show a left
/// hand, even devices a right hand, and every third device shows both.
pub struct SyntheticSource {
    device_count: u32,
    frame_interval: Duration,
    announced: bool,
    pending: VecDeque<SourceEvent>,
    started: Instant,
    next_frame: Instant,
    next_device: u32,
}

impl SyntheticSource {
    pub fn new(device_count: u32, frame_rate_hz: u32) -> Self {
        let now = Instant::now();
        Self {
            device_count,
            frame_interval: Duration::from_secs(1) / frame_rate_hz.max(1),
            announced: false,
            pending: VecDeque::new(),
            started: now,
            next_frame: now,
            next_device: 1,
        }
    }

    fn snapshot(&self, device: DeviceId, elapsed: f32) -> TrackingSnapshot {
        let sides: &[HandSide] = if device % 3 == 0 {
            &HandSide::ALL
        } else if device % 2 == 1 {
            &[HandSide::Left]
        } else {
            &[HandSide::Right]
        };

        TrackingSnapshot {
            device_id: device,
            timestamp: (elapsed * 1_000_000.0) as u64,
            hands: sides
                .iter()
                .map(|side| synthetic_hand(*side, elapsed, device as f32))
                .collect(),
        }
    }
}

fn synthetic_hand(side: HandSide, t: f32, phase: f32) -> RawHand {
    let offset = match side {
        HandSide::Left => -80.0,
        HandSide::Right => 80.0,
    };
    let angle = t * 1.5 + phase;
    let palm = Vector3::new(
        offset + 60.0 * angle.cos(),
        230.0 + 60.0 * angle.sin(),
        30.0 * (angle * 0.5).sin(),
    );
    let grip = 0.5 + 0.5 * (t * 0.8 + phase).sin();

    let digits = FINGER_NAMES
        .iter()
        .enumerate()
        .map(|(f, _)| {
            let spread = (f as f32 - 2.0) * 18.0;
            RawDigit {
                finger_id: f as i32,
                is_extended: grip < 0.6,
                bones: (0..BONES_PER_FINGER)
                    .map(|b| {
                        let reach = 20.0 * (b as f32 + 1.0) * (1.0 - 0.6 * grip);
                        RawBone {
                            prev_joint: Vector3::new(palm.x + spread, palm.y, palm.z - reach + 20.0),
                            next_joint: Vector3::new(palm.x + spread, palm.y, palm.z - reach),
                            width: 16.0,
                            rotation: Quaternion::default(),
                        }
                    })
                    .collect(),
            }
        })
        .collect();

    RawHand {
        side,
        palm: Palm {
            position: palm,
            velocity: Vector3::new(-90.0 * angle.sin(), 90.0 * angle.cos(), 0.0),
            normal: Vector3::new(0.0, -1.0, 0.0),
            direction: Vector3::new(0.0, 0.0, -1.0),
            orientation: Quaternion::default(),
            width: 85.0,
        },
        arm: RawBone {
            prev_joint: Vector3::new(palm.x, palm.y - 60.0, palm.z + 250.0),
            next_joint: Vector3::new(palm.x, palm.y - 10.0, palm.z + 60.0),
            width: 60.0,
            rotation: Quaternion::default(),
        },
        digits,
        pinch_strength: grip * 0.8,
        grab_strength: grip,
        confidence: 1.0,
        visible_time: (t * 1_000_000.0) as u64,
    }
}

/// A still open hand with its palm at `palm` and the wrist 10mm below and
/// 60mm behind it. Handy for scripting tracking events.
pub fn raw_hand_at(side: HandSide, palm: Vector3) -> RawHand {
    let mut hand = synthetic_hand(side, 0.0, 0.0);
    let shift = Vector3::new(
        palm.x - hand.palm.position.x,
        palm.y - hand.palm.position.y,
        palm.z - hand.palm.position.z,
    );
    let moved = |v: Vector3| Vector3::new(v.x + shift.x, v.y + shift.y, v.z + shift.z);

    for digit in &mut hand.digits {
        for bone in &mut digit.bones {
            bone.prev_joint = moved(bone.prev_joint);
            bone.next_joint = moved(bone.next_joint);
        }
    }
    hand.arm.prev_joint = moved(hand.arm.prev_joint);
    hand.arm.next_joint = moved(hand.arm.next_joint);
    hand.palm.position = palm;
    hand.palm.velocity = Vector3::ZERO;
    hand
}

impl TrackingEventSource for SyntheticSource {
    fn open_connection(&mut self) -> Result<(), SourceError> {
        debug!(
            "Synthetic source with {} device(s) at {:?} per frame",
            self.device_count, self.frame_interval
        );
        Ok(())
    }

    fn device_list(&mut self) -> Result<Vec<DeviceRef>, SourceError> {
        // devices announce themselves through connect events instead
        Ok(Vec::new())
    }

    fn open_device(&mut self, device: DeviceRef) -> Result<DeviceHandle, SourceError> {
        if device.id == 0 || device.id > self.device_count {
            return Err(SourceError::OpenFailed(
                device.id,
                "no such synthetic device".to_string(),
            ));
        }
        Ok(handle_for(device.id))
    }

    fn close_device(&mut self, _handle: DeviceHandle) {}

    fn subscribe(&mut self, _handle: DeviceHandle) -> Result<(), SourceError> {
        Ok(())
    }

    fn unsubscribe(&mut self, _handle: DeviceHandle) -> Result<(), SourceError> {
        Ok(())
    }

    fn device_serial(&mut self, handle: DeviceHandle) -> Result<String, SourceError> {
        Ok(format!("SIM-{:04}", id_for(handle)))
    }

    fn poll(&mut self, timeout: Duration) -> Result<SourceEvent, SourceError> {
        if !self.announced {
            self.announced = true;
            self.pending.push_back(SourceEvent::ServiceConnected);
            for id in 1..=self.device_count {
                self.pending
                    .push_back(SourceEvent::DeviceConnected(DeviceRef { id }));
            }
        }
        if let Some(event) = self.pending.pop_front() {
            return Ok(event);
        }
        if self.device_count == 0 {
            std::thread::sleep(timeout);
            return Ok(SourceEvent::None);
        }

        let now = Instant::now();
        if now < self.next_frame {
            let wait = self.next_frame - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return Ok(SourceEvent::None);
            }
            std::thread::sleep(wait);
        }

        let device = self.next_device;
        self.next_device = device % self.device_count + 1;
        if self.next_device == 1 {
            self.next_frame += self.frame_interval;
        }

        let elapsed = self.started.elapsed().as_secs_f32();
        Ok(SourceEvent::Tracking(self.snapshot(device, elapsed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_source_reports_configured_failures() {
        let mut source = ScriptedSource::new()
            .with_device(ScriptedDevice::new(1, "SN1").failing_subscribe())
            .with_device(ScriptedDevice::unidentified(2));

        let handle = source.open_device(DeviceRef { id: 1 }).unwrap();
        assert!(source.subscribe(handle).is_err());
        assert_eq!(source.device_serial(handle).unwrap(), "SN1");

        let fallback = source.open_device(DeviceRef { id: 2 }).unwrap();
        assert!(matches!(
            source.device_serial(fallback),
            Err(SourceError::SerialUnavailable(_))
        ));
        assert!(source.open_device(DeviceRef { id: 9 }).is_err());
    }

    #[test]
    fn synthetic_source_announces_devices_before_tracking() {
        let mut source = SyntheticSource::new(2, 1000);
        source.open_connection().unwrap();
        let timeout = Duration::from_millis(30);

        assert_eq!(source.poll(timeout).unwrap(), SourceEvent::ServiceConnected);
        assert_eq!(
            source.poll(timeout).unwrap(),
            SourceEvent::DeviceConnected(DeviceRef { id: 1 })
        );
        assert_eq!(
            source.poll(timeout).unwrap(),
            SourceEvent::DeviceConnected(DeviceRef { id: 2 })
        );

        match source.poll(timeout).unwrap() {
            SourceEvent::Tracking(snapshot) => {
                assert_eq!(snapshot.device_id, 1);
                assert_eq!(snapshot.hands.len(), 1);
                assert_eq!(snapshot.hands[0].side, HandSide::Left);
            }
            other => panic!("expected tracking, got {:?}", other),
        }

        let handle = source.open_device(DeviceRef { id: 2 }).unwrap();
        assert_eq!(source.device_serial(handle).unwrap(), "SIM-0002");
    }
}
