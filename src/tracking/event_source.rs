//! Boundary to the vendor tracking service.
//!
//! The service is modeled as an opaque, handle-based event source: devices are
//! enumerated, opened, subscribed and polled one event at a time. Tracking
//! snapshots arrive in their raw form and are decoded into [`Frame`] values
//! here, before they cross the queue.

use super::frame::{Arm, Bone, Finger, Frame, Hand, HandSide, Palm, Quaternion, Vector3};
use std::time::Duration;

/// Small integer the service uses to name a device across events.
pub type DeviceId = u32;

/// Opaque native handle for an opened device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u64);

/// Reference carried by connect/lost notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceRef {
    pub id: DeviceId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// Poll timed out without an event.
    None,
    ServiceConnected,
    ServiceLost,
    DeviceConnected(DeviceRef),
    DeviceLost(DeviceRef),
    Tracking(TrackingSnapshot),
    /// Policy, status-change and other notifications the pipeline ignores.
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Failed to create connection to tracking service: {0}")]
    ConnectionFailed(String),

    #[error("Failed to open device {0}: {1}")]
    OpenFailed(DeviceId, String),

    #[error("Failed to subscribe device: {0}")]
    SubscribeFailed(String),

    #[error("Device serial unavailable: {0}")]
    SerialUnavailable(String),

    #[error("Poll failed: {0}")]
    PollFailed(String),
}

/// Handle-based API of the tracking service.
///
/// Implementations are driven from the polling thread only.
pub trait TrackingEventSource: Send + 'static {
    /// Creates the connection to the service. Failure is fatal for the poller.
    fn open_connection(&mut self) -> Result<(), SourceError>;

    /// Devices visible right now.
    fn device_list(&mut self) -> Result<Vec<DeviceRef>, SourceError>;

    fn open_device(&mut self, device: DeviceRef) -> Result<DeviceHandle, SourceError>;

    fn close_device(&mut self, handle: DeviceHandle);

    fn subscribe(&mut self, handle: DeviceHandle) -> Result<(), SourceError>;

    fn unsubscribe(&mut self, handle: DeviceHandle) -> Result<(), SourceError>;

    /// Serial of an opened device. `SerialUnavailable` marks the fallback
    /// device the service reports when it cannot identify the hardware.
    fn device_serial(&mut self, handle: DeviceHandle) -> Result<String, SourceError>;

    /// Waits up to `timeout` for the next event.
    fn poll(&mut self, timeout: Duration) -> Result<SourceEvent, SourceError>;

    fn close_connection(&mut self) {}
}

/// Raw tracking snapshot as delivered by the service.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSnapshot {
    pub device_id: DeviceId,
    pub timestamp: u64,
    pub hands: Vec<RawHand>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawBone {
    pub prev_joint: Vector3,
    pub next_joint: Vector3,
    pub width: f32,
    pub rotation: Quaternion,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawDigit {
    pub finger_id: i32,
    pub is_extended: bool,
    pub bones: Vec<RawBone>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawHand {
    pub side: HandSide,
    pub palm: Palm,
    /// `prev_joint` is the elbow, `next_joint` the wrist.
    pub arm: RawBone,
    pub digits: Vec<RawDigit>,
    pub pinch_strength: f32,
    pub grab_strength: f32,
    pub confidence: f32,
    pub visible_time: u64,
}

impl RawBone {
    fn is_finite(&self) -> bool {
        self.prev_joint.is_finite()
            && self.next_joint.is_finite()
            && self.width.is_finite()
            && self.rotation.is_finite()
    }

    fn decode(&self) -> Bone {
        Bone {
            prev_joint: self.prev_joint,
            next_joint: self.next_joint,
            width: self.width,
            rotation: self.rotation,
            valid: self.is_finite(),
        }
    }
}

impl TrackingSnapshot {
    /// Converts the raw snapshot into a frame tagged with `serial`.
    ///
    /// Non-finite geometry marks the affected bone, arm, finger or hand as
    /// invalid instead of passing garbage downstream.
    pub fn decode(&self, serial: &str) -> Frame {
        Frame::new(
            serial,
            self.timestamp,
            self.hands.iter().map(decode_hand).collect(),
        )
    }
}

fn decode_hand(raw: &RawHand) -> Hand {
    let fingers = raw
        .digits
        .iter()
        .map(|digit| {
            let bones: Vec<Bone> = digit.bones.iter().map(RawBone::decode).collect();
            let valid = bones.iter().all(|b| b.valid);
            Finger {
                id: digit.finger_id,
                is_extended: digit.is_extended,
                confidence: raw.confidence,
                bones,
                valid,
            }
        })
        .collect();

    Hand {
        side: raw.side,
        palm: raw.palm.clone(),
        arm: Arm {
            wrist_position: raw.arm.next_joint,
            elbow_position: raw.arm.prev_joint,
            width: raw.arm.width,
            rotation: raw.arm.rotation,
            valid: raw.arm.is_finite(),
        },
        fingers,
        pinch_strength: raw.pinch_strength,
        grab_strength: raw.grab_strength,
        confidence: raw.confidence,
        visible_time: raw.visible_time,
        valid: raw.palm.position.is_finite(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::frame::{BONES_PER_FINGER, TIP_BONE_INDEX};

    fn raw_bone(next: Vector3) -> RawBone {
        RawBone {
            prev_joint: Vector3::ZERO,
            next_joint: next,
            width: 10.0,
            rotation: Quaternion::default(),
        }
    }

    fn raw_hand(side: HandSide) -> RawHand {
        RawHand {
            side,
            palm: Palm {
                position: Vector3::new(10.0, 200.0, -5.0),
                ..Palm::default()
            },
            arm: RawBone {
                prev_joint: Vector3::new(0.0, 100.0, 250.0),
                next_joint: Vector3::new(0.0, 180.0, 60.0),
                width: 55.0,
                rotation: Quaternion::default(),
            },
            digits: (0..5)
                .map(|id| RawDigit {
                    finger_id: id,
                    is_extended: id == 1,
                    bones: (0..BONES_PER_FINGER)
                        .map(|b| raw_bone(Vector3::new(id as f32, b as f32, 0.0)))
                        .collect(),
                })
                .collect(),
            pinch_strength: 0.25,
            grab_strength: 0.75,
            confidence: 0.9,
            visible_time: 1_500_000,
        }
    }

    #[test]
    fn decode_maps_arm_joints_and_tags_serial() {
        let snapshot = TrackingSnapshot {
            device_id: 7,
            timestamp: 42,
            hands: vec![raw_hand(HandSide::Right)],
        };
        let frame = snapshot.decode("SN7");

        assert_eq!(frame.device_id, "SN7");
        assert_eq!(frame.timestamp, 42);
        let hand = &frame.hands[0];
        assert_eq!(hand.side, HandSide::Right);
        assert_eq!(hand.arm.wrist_position, Vector3::new(0.0, 180.0, 60.0));
        assert_eq!(hand.arm.elbow_position, Vector3::new(0.0, 100.0, 250.0));
        assert!(hand.arm.valid);
        assert!(hand.fingers[1].is_extended);
        assert_eq!(
            hand.fingers[2].tip(),
            Some(Vector3::new(2.0, TIP_BONE_INDEX as f32, 0.0))
        );
    }

    #[test]
    fn decode_marks_non_finite_geometry_invalid() {
        let mut raw = raw_hand(HandSide::Left);
        raw.arm.next_joint.x = f32::NAN;
        raw.digits[0].bones[TIP_BONE_INDEX].next_joint.y = f32::INFINITY;

        let snapshot = TrackingSnapshot {
            device_id: 1,
            timestamp: 0,
            hands: vec![raw],
        };
        let hand = snapshot.decode("SN1").hands.remove(0);

        assert!(!hand.arm.valid);
        assert!(!hand.fingers[0].valid);
        assert_eq!(hand.fingers[0].tip(), None);
        assert!(hand.fingers[1].valid);
        assert!(hand.valid);
    }
}
