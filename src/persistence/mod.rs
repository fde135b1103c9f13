//! # Persistence Module
//!
//! Holds the configuration the pipeline reads at startup and writes back while
//! running: OSC target, hand assignments, device aliases and the 14 output
//! filters.
//!
//! ## Layout
//! - [`config_file`]: JSON document on disk (load, save, autosave task)
//! - [`config_portal`]: shared in-memory sections with bounded lock retry
//! - [`alias_registry`]: serial to `devN` alias mapping
//!
//! Missing files and missing keys degrade to defaults so the application
//! always starts; a malformed document is reported as a startup error.

pub mod alias_registry;
pub mod config_file;
pub mod config_portal;

use crate::pipeline::filters::FilterSnapshot;
use crate::tracking::frame::HandSide;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

pub const DEFAULT_OSC_IP: &str = "127.0.0.1";
pub const DEFAULT_OSC_PORT: u16 = 9000;

/// Stored hand assignment for one serial.
///
/// Written as "LEFT", "RIGHT" or "NONE"; read case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandAssignment {
    Left,
    Right,
    #[default]
    None,
}

impl HandAssignment {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandAssignment::Left => "LEFT",
            HandAssignment::Right => "RIGHT",
            HandAssignment::None => "NONE",
        }
    }

    /// Empty and "NONE" both clear the assignment.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() || text.eq_ignore_ascii_case("none") {
            return Some(HandAssignment::None);
        }
        text.parse::<HandSide>().ok().map(HandAssignment::from)
    }

    pub fn side(&self) -> Option<HandSide> {
        match self {
            HandAssignment::Left => Some(HandSide::Left),
            HandAssignment::Right => Some(HandSide::Right),
            HandAssignment::None => None,
        }
    }
}

impl From<HandSide> for HandAssignment {
    fn from(side: HandSide) -> Self {
        match side {
            HandSide::Left => HandAssignment::Left,
            HandSide::Right => HandAssignment::Right,
        }
    }
}

impl From<Option<HandSide>> for HandAssignment {
    fn from(side: Option<HandSide>) -> Self {
        side.map(HandAssignment::from).unwrap_or_default()
    }
}

impl Serialize for HandAssignment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for HandAssignment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(HandAssignment::parse(&text).unwrap_or_else(|| {
            warn!("Unknown hand assignment {:?}, treating it as NONE", text);
            HandAssignment::None
        }))
    }
}

/// The on-disk configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigDocument {
    pub osc_ip: String,
    pub osc_port: u16,
    pub low_latency_mode: bool,
    /// serial -> "LEFT" / "RIGHT" / "NONE"
    pub hand_assignments: BTreeMap<String, HandAssignment>,
    /// serial -> alias; validated when loaded into the alias registry
    pub device_aliases: Map<String, Value>,
    #[serde(rename = "booleanSettings")]
    pub boolean_settings: FilterSnapshot,
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            osc_ip: DEFAULT_OSC_IP.to_string(),
            osc_port: DEFAULT_OSC_PORT,
            low_latency_mode: false,
            hand_assignments: BTreeMap::new(),
            device_aliases: Map::new(),
            boolean_settings: FilterSnapshot::default(),
        }
    }
}
