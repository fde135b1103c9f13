//! Decoded tracking data carried from the polling thread to the consumer.
//!
//! All positions are millimeters in the sensor-centered coordinate frame.
//! Every substructure carries its own `valid` flag; consumers check it before
//! reading positional data.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

/// Bones per finger in the tracking model.
pub const BONES_PER_FINGER: usize = 4;

/// Index of the distal bone whose `next_joint` is the finger tip.
pub const TIP_BONE_INDEX: usize = BONES_PER_FINGER - 1;

/// Finger names by fixed index 0-4.
pub const FINGER_NAMES: [&str; 5] = ["thumb", "index", "middle", "ring", "pinky"];

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        // identity rotation
        Self {
            w: 1.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }
}

impl Quaternion {
    pub fn is_finite(&self) -> bool {
        self.w.is_finite() && self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Left or right hand designation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandSide {
    Left,
    Right,
}

impl HandSide {
    pub const ALL: [HandSide; 2] = [HandSide::Left, HandSide::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            HandSide::Left => "left",
            HandSide::Right => "right",
        }
    }
}

impl Display for HandSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for hand side strings that are neither "left" nor "right".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown hand side: {0}")]
pub struct UnknownHandSide(pub String);

impl FromStr for HandSide {
    type Err = UnknownHandSide;

    /// Case-insensitive: "LEFT", "left" and "Left" all parse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("left") {
            Ok(HandSide::Left)
        } else if s.eq_ignore_ascii_case("right") {
            Ok(HandSide::Right)
        } else {
            Err(UnknownHandSide(s.to_string()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Palm {
    pub position: Vector3,
    pub velocity: Vector3,
    pub normal: Vector3,
    pub direction: Vector3,
    pub orientation: Quaternion,
    pub width: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arm {
    pub wrist_position: Vector3,
    pub elbow_position: Vector3,
    pub width: f32,
    pub rotation: Quaternion,
    pub valid: bool,
}

impl Default for Arm {
    fn default() -> Self {
        Self {
            wrist_position: Vector3::ZERO,
            elbow_position: Vector3::ZERO,
            width: 0.0,
            rotation: Quaternion::default(),
            valid: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bone {
    pub prev_joint: Vector3,
    pub next_joint: Vector3,
    pub width: f32,
    pub rotation: Quaternion,
    pub valid: bool,
}

impl Default for Bone {
    fn default() -> Self {
        Self {
            prev_joint: Vector3::ZERO,
            next_joint: Vector3::ZERO,
            width: 0.0,
            rotation: Quaternion::default(),
            valid: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finger {
    pub id: i32,
    pub is_extended: bool,
    pub confidence: f32,
    pub bones: Vec<Bone>,
    pub valid: bool,
}

impl Default for Finger {
    fn default() -> Self {
        Self {
            id: 0,
            is_extended: false,
            confidence: 0.0,
            bones: vec![Bone::default(); BONES_PER_FINGER],
            valid: true,
        }
    }
}

impl Finger {
    /// Tip position, if the finger and its distal bone are usable.
    pub fn tip(&self) -> Option<Vector3> {
        if !self.valid || self.bones.len() < BONES_PER_FINGER {
            return None;
        }
        let distal = &self.bones[TIP_BONE_INDEX];
        distal.valid.then_some(distal.next_joint)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hand {
    pub side: HandSide,
    pub palm: Palm,
    pub arm: Arm,
    pub fingers: Vec<Finger>,
    pub pinch_strength: f32,
    pub grab_strength: f32,
    pub confidence: f32,
    /// Microseconds the hand has been continuously visible.
    pub visible_time: u64,
    pub valid: bool,
}

impl Hand {
    /// A valid hand at rest with five default fingers.
    pub fn new(side: HandSide) -> Self {
        Self {
            side,
            palm: Palm::default(),
            arm: Arm::default(),
            fingers: (0..FINGER_NAMES.len())
                .map(|id| Finger {
                    id: id as i32,
                    ..Finger::default()
                })
                .collect(),
            pinch_strength: 0.0,
            grab_strength: 0.0,
            confidence: 0.0,
            visible_time: 0,
            valid: true,
        }
    }

    /// Wrist position, falling back to the palm when the arm is unusable.
    pub fn wrist_or_palm(&self) -> Vector3 {
        if self.arm.valid {
            self.arm.wrist_position
        } else {
            self.palm.position
        }
    }
}

/// One timestamped snapshot of the hands seen by one device.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Frame {
    /// Serial of the device that produced the frame.
    pub device_id: String,
    /// Device clock units.
    pub timestamp: u64,
    pub hands: Vec<Hand>,
}

impl Frame {
    pub fn new(device_id: impl Into<String>, timestamp: u64, hands: Vec<Hand>) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp,
            hands,
        }
    }
}
