//! OSC address layout: `/leap/{alias}/{side}/{category}[/{subtype}]`.

use crate::persistence::alias_registry::DeviceAlias;
use crate::tracking::frame::{HandSide, Quaternion, Vector3};

pub const ADDRESS_ROOT: &str = "/leap";

pub const PALM: &str = "palm";
pub const WRIST: &str = "wrist";
pub const FINGER: &str = "finger";
pub const PINCH_STRENGTH: &str = "pinchStrength";
pub const GRAB_STRENGTH: &str = "grabStrength";
pub const VISIBLE_TIME: &str = "visibleTime";
pub const PALM_ORIENTATION: &str = "palm/orientation";
pub const PALM_VELOCITY: &str = "palm/velocity";
pub const PALM_NORMAL: &str = "palm/normal";
pub const FINGER_EXISTS: &str = "exists";
pub const FINGER_IS_EXTENDED: &str = "isExtended";

pub const POSITION_AXES: [&str; 3] = ["tx", "ty", "tz"];
pub const VELOCITY_AXES: [&str; 3] = ["vx", "vy", "vz"];
pub const NORMAL_AXES: [&str; 3] = ["nx", "ny", "nz"];
pub const ORIENTATION_AXES: [&str; 4] = ["qw", "qx", "qy", "qz"];

/// Address prefix for one hand of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandAddress {
    prefix: String,
}

impl HandAddress {
    pub fn new(alias: &DeviceAlias, side: HandSide) -> Self {
        Self {
            prefix: format!("{}/{}/{}", ADDRESS_ROOT, alias, side),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `{prefix}/{category}`
    pub fn field(&self, category: &str) -> String {
        let mut out = String::new();
        self.write_field(&mut out, category);
        out
    }

    /// `{prefix}/{category}/{subtype}`
    pub fn sub(&self, category: &str, subtype: &str) -> String {
        let mut out = String::new();
        self.write_sub(&mut out, category, subtype);
        out
    }

    /// `{prefix}/finger/{name}/{field}`
    pub fn finger(&self, name: &str, field: &str) -> String {
        let mut out = String::new();
        self.write_finger(&mut out, name, field);
        out
    }

    /// Appends the field address to `out`, reusing its capacity.
    pub fn write_field(&self, out: &mut String, category: &str) {
        self.write_parts(out, &[category]);
    }

    pub fn write_sub(&self, out: &mut String, category: &str, subtype: &str) {
        self.write_parts(out, &[category, subtype]);
    }

    pub fn write_finger(&self, out: &mut String, name: &str, field: &str) {
        self.write_parts(out, &[FINGER, name, field]);
    }

    fn write_parts(&self, out: &mut String, parts: &[&str]) {
        out.push_str(&self.prefix);
        for part in parts {
            out.push('/');
            out.push_str(part);
        }
    }
}

pub fn vector_components(v: &Vector3) -> [f32; 3] {
    [v.x, v.y, v.z]
}

/// w first, matching the `qw qx qy qz` address order.
pub fn quaternion_components(q: &Quaternion) -> [f32; 4] {
    [q.w, q.x, q.y, q.z]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    #[test]
    fn builds_documented_addresses() {
        let alias = DeviceAlias::from_index(NonZeroU32::MIN);
        let left = HandAddress::new(&alias, HandSide::Left);

        assert_eq!(left.prefix(), "/leap/dev1/left");
        assert_eq!(left.sub(PALM, "tx"), "/leap/dev1/left/palm/tx");
        assert_eq!(
            left.finger("thumb", FINGER_IS_EXTENDED),
            "/leap/dev1/left/finger/thumb/isExtended"
        );
        assert_eq!(left.field(VISIBLE_TIME), "/leap/dev1/left/visibleTime");
        assert_eq!(
            left.sub(PALM_ORIENTATION, "qw"),
            "/leap/dev1/left/palm/orientation/qw"
        );
    }

    #[test]
    fn write_variants_append_the_same_text() {
        let alias = DeviceAlias::from_index(NonZeroU32::MIN);
        let right = HandAddress::new(&alias, HandSide::Right);
        let mut out = String::from("stale");

        out.clear();
        right.write_finger(&mut out, "ring", "tz");
        assert_eq!(out, right.finger("ring", "tz"));

        out.clear();
        right.write_sub(&mut out, WRIST, "tx");
        assert_eq!(out, "/leap/dev1/right/wrist/tx");
    }

    #[test]
    fn quaternion_is_w_first() {
        let q = Quaternion {
            x: 1.0,
            y: 2.0,
            z: 3.0,
            w: 4.0,
        };
        assert_eq!(quaternion_components(&q), [4.0, 1.0, 2.0, 3.0]);
    }
}
