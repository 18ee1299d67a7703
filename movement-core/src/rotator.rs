//! Euler rotation in degrees (pitch about Y, yaw about Z, roll about X).
//!
//! Characters only ever yaw while walking or falling, but control rotations
//! carry pitch and roll across the wire so the full triple is kept.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rotator {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

impl Rotator {
    pub const ZERO: Rotator = Rotator {
        pitch: 0.0,
        yaw: 0.0,
        roll: 0.0,
    };

    pub fn new(pitch: f32, yaw: f32, roll: f32) -> Self {
        Self { pitch, yaw, roll }
    }

    pub fn from_yaw(yaw: f32) -> Self {
        Self::new(0.0, yaw, 0.0)
    }

    /// Rotation that points the X axis along `dir`. Zero rotation for a zero vector.
    pub fn from_direction(dir: Vec3) -> Self {
        if dir.length_squared() < 1.0e-12 {
            return Self::ZERO;
        }
        let yaw = dir.y.atan2(dir.x).to_degrees();
        let pitch = dir.z.atan2((dir.x * dir.x + dir.y * dir.y).sqrt()).to_degrees();
        Self::new(pitch, yaw, 0.0)
    }

    /// Clamp an angle to [0, 360)
    pub fn clamp_axis(angle: f32) -> f32 {
        let a = angle % 360.0;
        if a < 0.0 {
            a + 360.0
        } else {
            a
        }
    }

    /// Clamp an angle to (-180, 180]
    pub fn normalize_axis(angle: f32) -> f32 {
        let a = Self::clamp_axis(angle);
        if a > 180.0 {
            a - 360.0
        } else {
            a
        }
    }

    pub fn normalized(self) -> Self {
        Self::new(
            Self::normalize_axis(self.pitch),
            Self::normalize_axis(self.yaw),
            Self::normalize_axis(self.roll),
        )
    }

    pub fn denormalized(self) -> Self {
        Self::new(
            Self::clamp_axis(self.pitch),
            Self::clamp_axis(self.yaw),
            Self::clamp_axis(self.roll),
        )
    }

    pub fn equals(&self, other: &Rotator, tolerance: f32) -> bool {
        Self::normalize_axis(self.pitch - other.pitch).abs() <= tolerance
            && Self::normalize_axis(self.yaw - other.yaw).abs() <= tolerance
            && Self::normalize_axis(self.roll - other.roll).abs() <= tolerance
    }

    pub fn scaled(self, s: f32) -> Self {
        Self::new(self.pitch * s, self.yaw * s, self.roll * s)
    }

    pub fn to_quat(self) -> Quat {
        Quat::from_euler(
            EulerRot::ZYX,
            self.yaw.to_radians(),
            -self.pitch.to_radians(),
            self.roll.to_radians(),
        )
    }

    /// Unit vector the rotation faces along
    pub fn direction(self) -> Vec3 {
        self.to_quat() * Vec3::X
    }

    pub fn is_finite(&self) -> bool {
        self.pitch.is_finite() && self.yaw.is_finite() && self.roll.is_finite()
    }
}

/// Turn `current` toward `desired` by at most `delta_rate` degrees, taking the short way round.
pub fn fixed_turn(current: f32, desired: f32, delta_rate: f32) -> f32 {
    if delta_rate == 0.0 {
        return Rotator::clamp_axis(current);
    }
    let mut result = Rotator::clamp_axis(current);
    let desired = Rotator::clamp_axis(desired);

    if result > desired {
        if result - desired < 180.0 {
            result -= (result - desired).min(delta_rate.abs());
        } else {
            result += (desired + 360.0 - result).min(delta_rate.abs());
        }
    } else if desired - result < 180.0 {
        result += (desired - result).min(delta_rate.abs());
    } else {
        result -= (result + 360.0 - desired).min(delta_rate.abs());
    }
    Rotator::clamp_axis(result)
}
