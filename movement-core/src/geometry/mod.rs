//! Collision queries consumed by the movement core.
//!
//! The movement code only ever talks to [`GeometryQuery`]. Hosts plug in
//! their physics scene; [`world::CollisionWorld`] is the analytic reference
//! scene used by tests, benches and the server host.

use bevy::prelude::*;

use crate::base::{BaseArena, BaseHandle};

pub mod world;

pub use world::{CollisionWorld, MovementScene};

/// Vertical capsule: a segment of length `2 * (half_height - radius)` swept by a sphere
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capsule {
    pub radius: f32,
    pub half_height: f32,
}

impl Capsule {
    pub fn new(radius: f32, half_height: f32) -> Self {
        Self {
            radius,
            half_height: half_height.max(radius),
        }
    }

    /// Half length of the inner segment
    pub fn segment_half_length(&self) -> f32 {
        (self.half_height - self.radius).max(0.0)
    }

    /// Shrinks radius and height, never below a small positive extent
    pub fn shrunk(&self, radius_epsilon: f32, height_epsilon: f32) -> Self {
        const MIN_EXTENT: f32 = crate::constants::KINDA_SMALL_NUMBER * 10.0;
        let radius = (self.radius - radius_epsilon).max(MIN_EXTENT);
        let half_height = (self.half_height - height_epsilon).max(MIN_EXTENT).max(radius);
        Self {
            radius,
            half_height,
        }
    }

    pub fn with_half_height(&self, half_height: f32) -> Self {
        Self::new(self.radius, half_height)
    }
}

/// Result of a sweep or trace
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitResult {
    pub blocking_hit: bool,
    /// The shape already overlapped geometry at the start of the sweep
    pub start_penetrating: bool,
    /// Fraction of the query segment travelled, in [0, 1]
    pub time: f32,
    /// Shape center at `time`
    pub location: Vec3,
    pub impact_point: Vec3,
    /// Normal of the swept shape at the contact
    pub normal: Vec3,
    /// Normal of the surface that was hit
    pub impact_normal: Vec3,
    pub trace_start: Vec3,
    pub trace_end: Vec3,
    pub penetration_depth: f32,
    pub component: Option<BaseHandle>,
}

impl HitResult {
    /// An empty result whose `time` is `time` (1 means "nothing hit")
    pub fn new(time: f32) -> Self {
        Self {
            blocking_hit: false,
            start_penetrating: false,
            time,
            location: Vec3::ZERO,
            impact_point: Vec3::ZERO,
            normal: Vec3::ZERO,
            impact_normal: Vec3::ZERO,
            trace_start: Vec3::ZERO,
            trace_end: Vec3::ZERO,
            penetration_depth: 0.0,
            component: None,
        }
    }

    /// Unblocked result for a query from `start` to `end`
    pub fn miss(start: Vec3, end: Vec3) -> Self {
        Self {
            location: end,
            trace_start: start,
            trace_end: end,
            ..Self::new(1.0)
        }
    }

    pub fn is_valid_blocking_hit(&self) -> bool {
        self.blocking_hit && !self.start_penetrating
    }

    pub fn reset(&mut self, time: f32) {
        *self = Self::new(time);
    }

    /// Distance travelled along the query
    pub fn distance(&self) -> f32 {
        (self.trace_end - self.trace_start).length() * self.time
    }
}

impl Default for HitResult {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Fluid/air properties at a location
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsVolume {
    pub water: bool,
    pub fluid_friction: f32,
    pub terminal_velocity: f32,
    /// Height of the water surface, if `water`
    pub surface_z: f32,
}

impl Default for PhysicsVolume {
    fn default() -> Self {
        Self {
            water: false,
            fluid_friction: 0.3,
            terminal_velocity: 4000.0,
            surface_z: f32::MAX,
        }
    }
}

/// World collision as seen by a moving capsule.
///
/// Normals are outward facing. `time` is in `[0, 1]` along the query.
/// A sweep that starts overlapping geometry reports `start_penetrating`
/// unless the move leads out of that geometry, in which case the overlap
/// is ignored. Identical queries must give identical hits.
pub trait GeometryQuery: Send + Sync {
    fn sweep(&self, shape: &Capsule, start: Vec3, end: Vec3) -> HitResult;

    fn line_trace(&self, start: Vec3, end: Vec3) -> HitResult;

    /// Whether `shape` at `location` overlaps any blocking geometry
    fn overlap_test(&self, shape: &Capsule, location: Vec3) -> bool;

    fn physics_volume(&self, _location: Vec3) -> PhysicsVolume {
        PhysicsVolume::default()
    }
}

/// Everything a movement update may read besides the character itself
#[derive(Clone, Copy)]
pub struct MoveContext<'a> {
    pub geometry: &'a dyn GeometryQuery,
    pub bases: &'a BaseArena,
    pub avoidance: Option<&'a dyn crate::avoidance::AvoidanceProvider>,
    pub custom: Option<&'a dyn crate::movement::CustomMovement>,
}

impl<'a> MoveContext<'a> {
    pub fn new(geometry: &'a dyn GeometryQuery, bases: &'a BaseArena) -> Self {
        Self {
            geometry,
            bases,
            avoidance: None,
            custom: None,
        }
    }

    pub fn with_avoidance(mut self, avoidance: &'a dyn crate::avoidance::AvoidanceProvider) -> Self {
        self.avoidance = Some(avoidance);
        self
    }

    pub fn with_custom(mut self, custom: &'a dyn crate::movement::CustomMovement) -> Self {
        self.custom = Some(custom);
        self
    }
}
