//! Fixed-point encodings used on the wire.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::rotator::Rotator;

/// Vector stored as integers of `1 / SCALE` units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NetQuantize<const SCALE: i32> {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// Tenth-of-a-unit precision, used for accelerations
pub type NetQuantize10 = NetQuantize<10>;

/// Hundredth-of-a-unit precision, used for locations
pub type NetQuantize100 = NetQuantize<100>;

impl<const SCALE: i32> NetQuantize<SCALE> {
    /// Rounds to the nearest step. Out of range components saturate and NaN becomes 0.
    pub fn from_vec3(v: Vec3) -> Self {
        let scale = SCALE as f32;
        Self {
            x: (v.x * scale).round() as i32,
            y: (v.y * scale).round() as i32,
            z: (v.z * scale).round() as i32,
        }
    }

    pub fn to_vec3(self) -> Vec3 {
        let scale = SCALE as f32;
        Vec3::new(self.x as f32 / scale, self.y as f32 / scale, self.z as f32 / scale)
    }
}

impl<const SCALE: i32> From<Vec3> for NetQuantize<SCALE> {
    fn from(v: Vec3) -> Self {
        Self::from_vec3(v)
    }
}

impl<const SCALE: i32> From<NetQuantize<SCALE>> for Vec3 {
    fn from(q: NetQuantize<SCALE>) -> Self {
        q.to_vec3()
    }
}

/// Acceleration exactly as the server will decode it.
///
/// Clients simulate with the rounded value so both sides integrate the same input.
pub fn round_acceleration(acceleration: Vec3) -> Vec3 {
    NetQuantize10::from_vec3(acceleration).to_vec3()
}

pub fn compress_axis_to_short(angle: f32) -> u16 {
    ((angle * 65536.0 / 360.0).round() as i64 & 0xFFFF) as u16
}

pub fn decompress_axis_from_short(value: u16) -> f32 {
    value as f32 * 360.0 / 65536.0
}

pub fn compress_axis_to_byte(angle: f32) -> u8 {
    ((angle * 256.0 / 360.0).round() as i64 & 0xFF) as u8
}

pub fn decompress_axis_from_byte(value: u8) -> f32 {
    value as f32 * 360.0 / 256.0
}

/// Yaw in the high 16 bits, pitch in the low 16
pub fn pack_view(rotation: Rotator) -> u32 {
    (u32::from(compress_axis_to_short(rotation.yaw)) << 16) | u32::from(compress_axis_to_short(rotation.pitch))
}

/// Inverse of [`pack_view`] plus the roll byte. Angles come back in `[0, 360)`.
pub fn unpack_view(view: u32, roll: u8) -> Rotator {
    Rotator::new(
        decompress_axis_from_short((view & 0xFFFF) as u16),
        decompress_axis_from_short((view >> 16) as u16),
        decompress_axis_from_byte(roll),
    )
}
