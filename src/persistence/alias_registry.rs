//! Stable short aliases ("dev1", "dev2", ...) for device serials.
//!
//! Aliases replace raw serials in outbound addresses. They are handed out in
//! first-seen order, never reused within a loaded mapping, and persisted with
//! the rest of the configuration.

use crate::tracking::frame::HandSide;
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::{self, Display};
use std::num::NonZeroU32;
use tracing::{debug, warn};

const ALIAS_PREFIX: &str = "dev";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AliasError {
    #[error("Invalid alias format: {0:?}")]
    InvalidFormat(String),

    #[error("Alias document must be an object, got {0}")]
    NotAnObject(String),
}

/// A validated `dev<positive integer>` alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAlias {
    text: String,
    index: NonZeroU32,
}

impl DeviceAlias {
    pub fn from_index(index: NonZeroU32) -> Self {
        Self {
            text: format!("{}{}", ALIAS_PREFIX, index),
            index,
        }
    }

    /// Accepts exactly `dev` followed by digits without a leading zero.
    pub fn parse(text: &str) -> Result<Self, AliasError> {
        let invalid = || AliasError::InvalidFormat(text.to_string());
        let digits = text.strip_prefix(ALIAS_PREFIX).ok_or_else(invalid)?;

        if digits.is_empty()
            || digits.starts_with('0')
            || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        let index = digits
            .parse::<u32>()
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(invalid)?;

        Ok(Self {
            text: text.to_string(),
            index,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn index(&self) -> u32 {
        self.index.get()
    }
}

impl Display for DeviceAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for DeviceAlias {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

/// Which hands a device alias reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssignedHand {
    Left,
    Right,
    #[default]
    Both,
}

impl AssignedHand {
    pub fn accepts(&self, side: HandSide) -> bool {
        matches!(
            (self, side),
            (AssignedHand::Both, _)
                | (AssignedHand::Left, HandSide::Left)
                | (AssignedHand::Right, HandSide::Right)
        )
    }
}

impl From<Option<HandSide>> for AssignedHand {
    fn from(side: Option<HandSide>) -> Self {
        match side {
            Some(HandSide::Left) => AssignedHand::Left,
            Some(HandSide::Right) => AssignedHand::Right,
            None => AssignedHand::Both,
        }
    }
}

#[derive(Debug)]
struct AliasState {
    by_serial: BTreeMap<String, DeviceAlias>,
    modes: HashMap<DeviceAlias, AssignedHand>,
    // None once the counter has passed u32::MAX
    next_index: Option<NonZeroU32>,
}

impl AliasState {
    fn take_next_index(&mut self) -> NonZeroU32 {
        if let Some(index) = self.next_index {
            self.next_index = index.checked_add(1);
            return index;
        }

        let used: HashSet<u32> = self.by_serial.values().map(DeviceAlias::index).collect();
        warn!("Alias counter exhausted, reusing the lowest free index");
        // fewer than u32::MAX aliases can be held, so a free index exists
        (1..=u32::MAX)
            .filter(|index| !used.contains(index))
            .find_map(NonZeroU32::new)
            .unwrap_or(NonZeroU32::MAX)
    }
}

impl Default for AliasState {
    fn default() -> Self {
        Self {
            by_serial: BTreeMap::new(),
            modes: HashMap::new(),
            next_index: Some(NonZeroU32::MIN),
        }
    }
}

#[derive(Debug, Default)]
pub struct AliasRegistry {
    state: Mutex<AliasState>,
}

impl AliasRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the alias for `serial`, assigning the next free one if needed.
    pub fn get_or_assign_alias(&self, serial: &str) -> DeviceAlias {
        let mut state = self.state.lock();
        if let Some(alias) = state.by_serial.get(serial) {
            return alias.clone();
        }

        let alias = DeviceAlias::from_index(state.take_next_index());
        state.by_serial.insert(serial.to_string(), alias.clone());
        debug!("Assigned alias {} to serial {}", alias, serial);
        alias
    }

    /// Current alias without assigning one.
    pub fn alias_for(&self, serial: &str) -> Option<DeviceAlias> {
        self.state.lock().by_serial.get(serial).cloned()
    }

    /// Replaces the mapping with the entries of a `serial -> alias` object.
    ///
    /// Invalid or duplicate aliases are skipped. The counter continues after
    /// the highest loaded index. Hand modes of the previous mapping are
    /// dropped. Returns the number of entries kept.
    pub fn load_from_json(&self, doc: &Value) -> Result<usize, AliasError> {
        let object = doc
            .as_object()
            .ok_or_else(|| AliasError::NotAnObject(doc.to_string()))?;

        let mut by_serial = BTreeMap::new();
        let mut seen = HashMap::new();
        for (serial, value) in object {
            let Some(text) = value.as_str() else {
                warn!("Skipping alias for {}: not a string ({})", serial, value);
                continue;
            };
            let alias = match DeviceAlias::parse(text) {
                Ok(alias) => alias,
                Err(e) => {
                    warn!("Skipping alias for {}: {}", serial, e);
                    continue;
                }
            };
            if let Some(owner) = seen.insert(alias.clone(), serial.clone()) {
                warn!(
                    "Skipping alias {} for {}: already used by {}",
                    alias, serial, owner
                );
                seen.insert(alias, owner);
                continue;
            }
            by_serial.insert(serial.clone(), alias);
        }

        let next_index = match by_serial.values().map(DeviceAlias::index).max() {
            Some(max) => max.checked_add(1).and_then(NonZeroU32::new),
            None => Some(NonZeroU32::MIN),
        };

        let loaded = by_serial.len();
        let mut state = self.state.lock();
        state.by_serial = by_serial;
        state.modes.clear();
        state.next_index = next_index;
        debug!("Loaded {} alias(es), next index {:?}", loaded, next_index);
        Ok(loaded)
    }

    pub fn to_json(&self) -> Value {
        let state = self.state.lock();
        let map: Map<String, Value> = state
            .by_serial
            .iter()
            .map(|(serial, alias)| (serial.clone(), Value::String(alias.to_string())))
            .collect();
        Value::Object(map)
    }

    /// Plain `serial -> alias` copy for persistence.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.state
            .lock()
            .by_serial
            .iter()
            .map(|(serial, alias)| (serial.clone(), alias.to_string()))
            .collect()
    }

    /// Resets the mapping and restarts numbering at 1.
    pub fn clear(&self) {
        *self.state.lock() = AliasState::default();
    }

    pub fn set_assigned_hand(&self, alias: &DeviceAlias, mode: AssignedHand) {
        let mut state = self.state.lock();
        if mode == AssignedHand::Both {
            state.modes.remove(alias);
        } else {
            state.modes.insert(alias.clone(), mode);
        }
    }

    pub fn assigned_hand(&self, alias: &DeviceAlias) -> AssignedHand {
        self.state
            .lock()
            .modes
            .get(alias)
            .copied()
            .unwrap_or_default()
    }
}
