//! Turns hand geometry into addressed scalar messages.
//!
//! For each frame the processor resolves the device alias, keeps the hands
//! the alias reports, emits one message per enabled field and, for every side
//! that was present last frame but is gone now, a single burst of zeros.
//! Positions go out in raw millimeters.

use super::addressing::{self as addr, HandAddress};
use super::filters::{FilterFlag, FilterSettings, FilterSnapshot};
use super::message_buffer::MessageBuffer;
use crate::persistence::alias_registry::{AliasRegistry, DeviceAlias};
use crate::tracking::frame::{Frame, Hand, HandSide, FINGER_NAMES};
use crate::transport::TransportSink;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

const MICROS_PER_SECOND: f32 = 1_000_000.0;

/// Side channel for display: `(serial, alias, hand-sorted frame)`.
pub type FrameObserver = Box<dyn Fn(&str, &DeviceAlias, &Frame) + Send + Sync>;

pub struct DataProcessor {
    aliases: Arc<AliasRegistry>,
    sink: Arc<dyn TransportSink>,
    filters: FilterSettings,
    /// Sides reported last frame, per alias
    prev_seen: Mutex<HashMap<DeviceAlias, BTreeSet<HandSide>>>,
    observer: RwLock<Option<FrameObserver>>,
    output_enabled: AtomicBool,
    scratch: Mutex<MessageBuffer>,
}

impl DataProcessor {
    pub fn new(
        aliases: Arc<AliasRegistry>,
        sink: Arc<dyn TransportSink>,
        filters: &FilterSnapshot,
    ) -> Self {
        Self {
            aliases,
            sink,
            filters: FilterSettings::from_snapshot(filters),
            prev_seen: Mutex::new(HashMap::new()),
            observer: RwLock::new(None),
            output_enabled: AtomicBool::new(true),
            scratch: Mutex::new(MessageBuffer::new()),
        }
    }

    pub fn set_observer(&self, observer: FrameObserver) {
        *self.observer.write() = Some(observer);
    }

    /// Replaces all 14 filters. Applies from the next frame on.
    pub fn set_filter_settings(&self, snapshot: &FilterSnapshot) {
        self.filters.apply(snapshot);
        debug!("Filter settings replaced");
    }

    pub fn set_filter_flag(&self, flag: FilterFlag, enabled: bool) {
        self.filters.set(flag, enabled);
        debug!("Filter {} set to {}", flag, enabled);
    }

    pub fn filter_settings(&self) -> FilterSnapshot {
        self.filters.snapshot()
    }

    /// Frames are still processed while disabled, only the sends are skipped.
    pub fn set_output_enabled(&self, enabled: bool) {
        self.output_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn output_enabled(&self) -> bool {
        self.output_enabled.load(Ordering::Relaxed)
    }

    /// Forgets which hands were seen, so no zero burst follows.
    pub fn reset_motion_state(&self) {
        self.prev_seen.lock().clear();
    }

    /// Processes one frame and returns the number of messages produced.
    pub fn process_data(&self, serial: &str, frame: &Frame) -> usize {
        let alias = self.aliases.get_or_assign_alias(serial);
        let mode = self.aliases.assigned_hand(&alias);
        let filters = self.filters.snapshot();

        let wanted = |hand: &&Hand| hand.valid && mode.accepts(hand.side);
        let current: BTreeSet<HandSide> = frame.hands.iter().filter(wanted).map(|h| h.side).collect();

        let gone: Vec<HandSide> = {
            let mut prev_seen = self.prev_seen.lock();
            let previous = prev_seen
                .insert(alias.clone(), current.clone())
                .unwrap_or_default();
            previous.difference(&current).copied().collect()
        };

        let produced = {
            let mut out = self.scratch.lock();
            out.clear();
            for side in gone {
                debug!("{} {} hand gone, sending zeros", alias, side);
                zero_burst(&HandAddress::new(&alias, side), &filters, &mut out);
            }
            for hand in frame.hands.iter().filter(wanted) {
                hand_messages(&HandAddress::new(&alias, hand.side), hand, &filters, &mut out);
            }

            if self.output_enabled() {
                for message in out.messages() {
                    self.sink.send_osc_message(message);
                }
            }
            out.len()
        };
        trace!("{} message(s) for {} ({})", produced, alias, serial);

        if let Some(observer) = &*self.observer.read() {
            observer(serial, &alias, frame);
        }
        produced
    }
}

fn push_components<const N: usize>(
    out: &mut MessageBuffer,
    address: &HandAddress,
    category: &str,
    axes: [&str; N],
    values: [f32; N],
) {
    for (axis, value) in axes.iter().zip(values) {
        out.push_sub(address, category, axis, value);
    }
}

fn hand_messages(
    address: &HandAddress,
    hand: &Hand,
    filters: &FilterSnapshot,
    out: &mut MessageBuffer,
) {
    if filters.get(FilterFlag::Palm) {
        let palm = addr::vector_components(&hand.palm.position);
        push_components(out, address, addr::PALM, addr::POSITION_AXES, palm);
    }
    if filters.get(FilterFlag::Wrist) {
        let wrist = addr::vector_components(&hand.wrist_or_palm());
        push_components(out, address, addr::WRIST, addr::POSITION_AXES, wrist);
    }
    if filters.get(FilterFlag::PinchStrength) {
        out.push_field(address, addr::PINCH_STRENGTH, hand.pinch_strength);
    }
    if filters.get(FilterFlag::GrabStrength) {
        out.push_field(address, addr::GRAB_STRENGTH, hand.grab_strength);
    }

    for (index, (name, flag)) in FINGER_NAMES.iter().zip(FilterFlag::FINGERS).enumerate() {
        let Some(finger) = hand.fingers.get(index) else {
            continue;
        };
        let Some(tip) = finger.tip() else {
            continue;
        };
        if filters.get(flag) {
            for (axis, value) in addr::POSITION_AXES.iter().zip(addr::vector_components(&tip)) {
                out.push_finger(address, name, axis, value);
            }
        }
        if filters.get(FilterFlag::FingerIsExtended) {
            let extended = if finger.is_extended { 1.0 } else { 0.0 };
            out.push_finger(address, name, addr::FINGER_IS_EXTENDED, extended);
        }
    }

    if filters.get(FilterFlag::PalmOrientation) {
        let q = addr::quaternion_components(&hand.palm.orientation);
        push_components(out, address, addr::PALM_ORIENTATION, addr::ORIENTATION_AXES, q);
    }
    if filters.get(FilterFlag::PalmVelocity) {
        let v = addr::vector_components(&hand.palm.velocity);
        push_components(out, address, addr::PALM_VELOCITY, addr::VELOCITY_AXES, v);
    }
    if filters.get(FilterFlag::PalmNormal) {
        let n = addr::vector_components(&hand.palm.normal);
        push_components(out, address, addr::PALM_NORMAL, addr::NORMAL_AXES, n);
    }
    if filters.get(FilterFlag::VisibleTime) {
        out.push_field(
            address,
            addr::VISIBLE_TIME,
            hand.visible_time as f32 / MICROS_PER_SECOND,
        );
    }
}

fn zero_burst(address: &HandAddress, filters: &FilterSnapshot, out: &mut MessageBuffer) {
    if filters.get(FilterFlag::Palm) {
        push_components(out, address, addr::PALM, addr::POSITION_AXES, [0.0; 3]);
    }
    if filters.get(FilterFlag::Wrist) {
        push_components(out, address, addr::WRIST, addr::POSITION_AXES, [0.0; 3]);
    }
    for (name, flag) in FINGER_NAMES.iter().zip(FilterFlag::FINGERS) {
        if !filters.get(flag) {
            continue;
        }
        for axis in addr::POSITION_AXES {
            out.push_finger(address, name, axis, 0.0);
        }
        out.push_finger(address, name, addr::FINGER_EXISTS, 0.0);
        if filters.get(FilterFlag::FingerIsExtended) {
            out.push_finger(address, name, addr::FINGER_IS_EXTENDED, 0.0);
        }
    }
    for (flag, category) in [
        (FilterFlag::PinchStrength, addr::PINCH_STRENGTH),
        (FilterFlag::GrabStrength, addr::GRAB_STRENGTH),
        (FilterFlag::VisibleTime, addr::VISIBLE_TIME),
    ] {
        if filters.get(flag) {
            out.push_field(address, category, 0.0);
        }
    }
}
