//! The 14 output toggles of the data processor.
//!
//! Each toggle is its own `AtomicBool`. Readers on the processing thread take
//! a [`FilterSnapshot`] once per frame. A snapshot taken while a UI thread is
//! halfway through [`FilterSettings::apply`] may mix old and new values; no
//! lock-step update across all 14 flags is provided.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

/// Names one of the 14 toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterFlag {
    Palm,
    Wrist,
    Thumb,
    Index,
    Middle,
    Ring,
    Pinky,
    PalmOrientation,
    PalmVelocity,
    PalmNormal,
    VisibleTime,
    FingerIsExtended,
    PinchStrength,
    GrabStrength,
}

impl FilterFlag {
    pub const ALL: [FilterFlag; 14] = [
        FilterFlag::Palm,
        FilterFlag::Wrist,
        FilterFlag::Thumb,
        FilterFlag::Index,
        FilterFlag::Middle,
        FilterFlag::Ring,
        FilterFlag::Pinky,
        FilterFlag::PalmOrientation,
        FilterFlag::PalmVelocity,
        FilterFlag::PalmNormal,
        FilterFlag::VisibleTime,
        FilterFlag::FingerIsExtended,
        FilterFlag::PinchStrength,
        FilterFlag::GrabStrength,
    ];

    /// Finger toggles by finger index 0-4.
    pub const FINGERS: [FilterFlag; 5] = [
        FilterFlag::Thumb,
        FilterFlag::Index,
        FilterFlag::Middle,
        FilterFlag::Ring,
        FilterFlag::Pinky,
    ];

    /// Key used in the `booleanSettings` config object.
    pub fn setting_name(&self) -> &'static str {
        match self {
            FilterFlag::Palm => "sendPalm",
            FilterFlag::Wrist => "sendWrist",
            FilterFlag::Thumb => "sendThumb",
            FilterFlag::Index => "sendIndex",
            FilterFlag::Middle => "sendMiddle",
            FilterFlag::Ring => "sendRing",
            FilterFlag::Pinky => "sendPinky",
            FilterFlag::PalmOrientation => "sendPalmOrientation",
            FilterFlag::PalmVelocity => "sendPalmVelocity",
            FilterFlag::PalmNormal => "sendPalmNormal",
            FilterFlag::VisibleTime => "sendVisibleTime",
            FilterFlag::FingerIsExtended => "sendFingerIsExtended",
            FilterFlag::PinchStrength => "sendPinchStrength",
            FilterFlag::GrabStrength => "sendGrabStrength",
        }
    }

    fn slot(&self) -> usize {
        *self as usize
    }
}

impl Display for FilterFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.setting_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown filter flag: {0}")]
pub struct UnknownFilterFlag(pub String);

impl FromStr for FilterFlag {
    type Err = UnknownFilterFlag;

    /// Accepts the config key ("sendPalm") or the bare name ("palm"),
    /// ignoring ASCII case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilterFlag::ALL
            .into_iter()
            .find(|flag| {
                let key = flag.setting_name();
                key.eq_ignore_ascii_case(s) || key["send".len()..].eq_ignore_ascii_case(s)
            })
            .ok_or_else(|| UnknownFilterFlag(s.to_string()))
    }
}

/// Plain copy of all 14 toggles, as stored in `booleanSettings`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterSnapshot {
    pub send_palm: bool,
    pub send_wrist: bool,
    pub send_thumb: bool,
    pub send_index: bool,
    pub send_middle: bool,
    pub send_ring: bool,
    pub send_pinky: bool,
    pub send_palm_orientation: bool,
    pub send_palm_velocity: bool,
    pub send_palm_normal: bool,
    pub send_visible_time: bool,
    pub send_finger_is_extended: bool,
    pub send_pinch_strength: bool,
    pub send_grab_strength: bool,
}

impl Default for FilterSnapshot {
    fn default() -> Self {
        Self {
            send_palm: true,
            send_wrist: true,
            send_thumb: true,
            send_index: true,
            send_middle: true,
            send_ring: true,
            send_pinky: true,
            send_palm_orientation: false,
            send_palm_velocity: false,
            send_palm_normal: false,
            send_visible_time: false,
            send_finger_is_extended: false,
            send_pinch_strength: true,
            send_grab_strength: true,
        }
    }
}

impl FilterSnapshot {
    pub fn all(enabled: bool) -> Self {
        Self {
            send_palm: enabled,
            send_wrist: enabled,
            send_thumb: enabled,
            send_index: enabled,
            send_middle: enabled,
            send_ring: enabled,
            send_pinky: enabled,
            send_palm_orientation: enabled,
            send_palm_velocity: enabled,
            send_palm_normal: enabled,
            send_visible_time: enabled,
            send_finger_is_extended: enabled,
            send_pinch_strength: enabled,
            send_grab_strength: enabled,
        }
    }

    pub fn get(&self, flag: FilterFlag) -> bool {
        match flag {
            FilterFlag::Palm => self.send_palm,
            FilterFlag::Wrist => self.send_wrist,
            FilterFlag::Thumb => self.send_thumb,
            FilterFlag::Index => self.send_index,
            FilterFlag::Middle => self.send_middle,
            FilterFlag::Ring => self.send_ring,
            FilterFlag::Pinky => self.send_pinky,
            FilterFlag::PalmOrientation => self.send_palm_orientation,
            FilterFlag::PalmVelocity => self.send_palm_velocity,
            FilterFlag::PalmNormal => self.send_palm_normal,
            FilterFlag::VisibleTime => self.send_visible_time,
            FilterFlag::FingerIsExtended => self.send_finger_is_extended,
            FilterFlag::PinchStrength => self.send_pinch_strength,
            FilterFlag::GrabStrength => self.send_grab_strength,
        }
    }

    pub fn set(&mut self, flag: FilterFlag, enabled: bool) {
        let field = match flag {
            FilterFlag::Palm => &mut self.send_palm,
            FilterFlag::Wrist => &mut self.send_wrist,
            FilterFlag::Thumb => &mut self.send_thumb,
            FilterFlag::Index => &mut self.send_index,
            FilterFlag::Middle => &mut self.send_middle,
            FilterFlag::Ring => &mut self.send_ring,
            FilterFlag::Pinky => &mut self.send_pinky,
            FilterFlag::PalmOrientation => &mut self.send_palm_orientation,
            FilterFlag::PalmVelocity => &mut self.send_palm_velocity,
            FilterFlag::PalmNormal => &mut self.send_palm_normal,
            FilterFlag::VisibleTime => &mut self.send_visible_time,
            FilterFlag::FingerIsExtended => &mut self.send_finger_is_extended,
            FilterFlag::PinchStrength => &mut self.send_pinch_strength,
            FilterFlag::GrabStrength => &mut self.send_grab_strength,
        };
        *field = enabled;
    }

    /// Builder-style variant of [`set`](Self::set).
    pub fn with(mut self, flag: FilterFlag, enabled: bool) -> Self {
        self.set(flag, enabled);
        self
    }
}

/// Live toggles shared between the UI and the processing thread.
#[derive(Debug)]
pub struct FilterSettings {
    flags: [AtomicBool; 14],
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self::from_snapshot(&FilterSnapshot::default())
    }
}

impl FilterSettings {
    pub fn from_snapshot(snapshot: &FilterSnapshot) -> Self {
        Self {
            flags: FilterFlag::ALL.map(|flag| AtomicBool::new(snapshot.get(flag))),
        }
    }

    pub fn is_enabled(&self, flag: FilterFlag) -> bool {
        self.flags[flag.slot()].load(Ordering::Relaxed)
    }

    pub fn set(&self, flag: FilterFlag, enabled: bool) {
        self.flags[flag.slot()].store(enabled, Ordering::Relaxed);
    }

    /// Stores all 14 values, one flag at a time.
    pub fn apply(&self, snapshot: &FilterSnapshot) {
        for flag in FilterFlag::ALL {
            self.set(flag, snapshot.get(flag));
        }
    }

    pub fn snapshot(&self) -> FilterSnapshot {
        let mut snapshot = FilterSnapshot::all(false);
        for flag in FilterFlag::ALL {
            snapshot.set(flag, self.is_enabled(flag));
        }
        snapshot
    }
}
