//! ECS components and resources shared by the client and server halves of the host.
//!
//! Every agent exists twice: a `Predicted` entity the local client drives
//! and an `Authority` entity the server simulates from received moves.
//! The two are paired by `AgentId` and talk only through their link ends.

use bevy::prelude::*;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use movement_core::base::BaseHandle;
use movement_core::movement::MovementInput;

use crate::link::{ClientLink, ServerLink};

/// Pairs a predicted entity with its authoritative twin
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId(pub u32);

/// Client-side copy, driven by local input and corrected by the server
#[derive(Component, Debug, Default)]
pub struct Predicted;

/// Server-side copy, the source of truth
#[derive(Component, Debug, Default)]
pub struct Authority;

#[derive(Component, Clone)]
pub struct ClientConnection(pub ClientLink);

#[derive(Component, Clone)]
pub struct ServerConnection(pub ServerLink);

/// Deterministic stand-in for a player: heading changes every segment,
/// with the occasional jump or crouch.
#[derive(Component, Debug, Clone, Copy)]
pub struct ScriptedInput {
    pub seed: u64,
    pub segment_frames: u64,
    /// Input goes idle from this frame on
    pub idle_after: Option<u64>,
}

impl ScriptedInput {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            segment_frames: 45,
            idle_after: None,
        }
    }

    pub fn input_at(&self, frame: u64) -> MovementInput {
        if self.idle_after.is_some_and(|idle| frame >= idle) {
            return MovementInput::default();
        }
        let segment = frame / self.segment_frames.max(1);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.seed ^ segment.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let yaw: f32 = rng.gen_range(0.0..std::f32::consts::TAU);
        let throttle: f32 = if rng.gen_bool(0.15) { 0.0 } else { rng.gen_range(0.5..=1.0) };
        let jump_frame = rng.gen_range(0..self.segment_frames.max(1));
        let crouch = rng.gen_bool(0.1);
        MovementInput {
            direction: Vec3::new(yaw.cos(), yaw.sin(), 0.0) * throttle,
            jump: !crouch && rng.gen_bool(0.3) && frame % self.segment_frames.max(1) == jump_frame,
            crouch,
        }
    }
}

/// A platform sliding along `axis` as `amplitude * sin(2π t / period)`
#[derive(Debug, Clone, Copy)]
pub struct MovingPlatform {
    pub handle: BaseHandle,
    pub axis: Vec3,
    pub amplitude: f32,
    pub period: f32,
    /// Current displacement from the rest position
    pub offset: Vec3,
}

impl MovingPlatform {
    pub fn displacement_at(&self, time: f32) -> Vec3 {
        self.axis * self.amplitude * (std::f32::consts::TAU * time / self.period).sin()
    }
}

#[derive(Resource, Debug, Default, Clone)]
pub struct MovingPlatforms(pub Vec<MovingPlatform>);

/// Fixed-step clock shared by both halves
#[derive(Resource, Debug, Clone, Copy)]
pub struct SimClock {
    pub frame: u64,
    pub delta_time: f32,
}

impl SimClock {
    pub fn new(delta_time: f32) -> Self {
        Self { frame: 0, delta_time }
    }

    pub fn now(&self) -> f32 {
        self.frame as f32 * self.delta_time
    }

    /// Link time; kept in f64 so long runs don't lose delivery precision
    pub fn link_time(&self) -> f64 {
        self.frame as f64 * f64::from(self.delta_time)
    }
}
