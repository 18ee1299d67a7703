//! One recorded client move: the input that drove it and the state around it.

use bevy::prelude::*;

use crate::base::{BaseArena, BaseHandle};
use crate::constants::{ACCEL_DOT_THRESHOLD, ACCEL_MAG_THRESHOLD, COMBINE_ACCEL_DOT_THRESHOLD};
use crate::geometry::MoveContext;
use crate::movement::{CharacterMovement, FindFloorResult, MovementMode};
use crate::net::{FLAG_JUMP_PRESSED, FLAG_WANTS_TO_CROUCH};
use crate::rotator::Rotator;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SavedMove {
    pub timestamp: f32,
    pub delta_time: f32,
    /// Rounded acceleration, exactly what the server will receive
    pub acceleration: Vec3,
    pub accel_mag: f32,
    pub accel_normal: Vec3,
    pub pressed_jump: bool,
    pub wants_to_crouch: bool,
    /// Recorded before the last timestamp reset; never resent or combined
    pub old_time_stamp_before_reset: bool,
    /// Replay moved this move's start, so it must not absorb the next one
    pub force_no_combine: bool,

    pub start_location: Vec3,
    pub start_relative_location: Option<Vec3>,
    pub start_velocity: Vec3,
    pub start_floor: FindFloorResult,
    pub start_rotation: Rotator,
    pub start_base: Option<BaseHandle>,
    pub start_mode: MovementMode,
    pub start_crouched: bool,

    pub saved_location: Vec3,
    pub saved_rotation: Rotator,
    pub saved_relative_location: Option<Vec3>,
    pub end_base: Option<BaseHandle>,
    pub end_mode: MovementMode,
}

impl SavedMove {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Records the input of a move about to be simulated from the current state
    pub fn set_move_for(
        &mut self,
        movement: &CharacterMovement,
        timestamp: f32,
        delta_time: f32,
        acceleration: Vec3,
        ctx: &MoveContext,
    ) {
        self.timestamp = timestamp;
        self.delta_time = delta_time;
        self.acceleration = acceleration;
        self.accel_mag = acceleration.length();
        self.accel_normal = if self.accel_mag > 0.0 {
            acceleration / self.accel_mag
        } else {
            Vec3::ZERO
        };
        self.pressed_jump = movement.jump_pressed;
        self.wants_to_crouch = movement.wants_to_crouch;
        self.set_initial_position(movement, ctx);
    }

    pub fn set_initial_position(&mut self, movement: &CharacterMovement, ctx: &MoveContext) {
        self.start_location = movement.location;
        self.start_relative_location = relative_location(movement, ctx.bases);
        self.start_velocity = movement.velocity;
        self.start_floor = movement.current_floor;
        self.start_rotation = movement.rotation;
        self.start_base = movement.base();
        self.start_mode = movement.mode();
        self.start_crouched = movement.is_crouched();
    }

    /// Captures where the move ended
    pub fn post_update(&mut self, movement: &CharacterMovement, ctx: &MoveContext) {
        self.saved_location = movement.location;
        self.saved_rotation = movement.rotation;
        self.saved_relative_location = relative_location(movement, ctx.bases);
        self.end_base = movement.base();
        self.end_mode = movement.mode();
    }

    /// Where this move started, following the start base if it has moved since
    pub fn reverted_location(&self, bases: &BaseArena) -> Vec3 {
        match (self.start_relative_location, self.start_base.and_then(|b| bases.resolve(b))) {
            (Some(relative), Some(surface)) if surface.is_movable() => surface.location + relative,
            _ => self.start_location,
        }
    }

    pub fn compressed_flags(&self) -> u8 {
        let mut flags = 0;
        if self.pressed_jump {
            flags |= FLAG_JUMP_PRESSED;
        }
        if self.wants_to_crouch {
            flags |= FLAG_WANTS_TO_CROUCH;
        }
        flags
    }

    /// Whether losing this move would leave the server meaningfully behind
    /// `last_acked`: discrete input or mode changed, or acceleration swung.
    pub fn is_important_move(&self, last_acked: &SavedMove) -> bool {
        if self.compressed_flags() != last_acked.compressed_flags() {
            return true;
        }
        if self.start_mode != last_acked.end_mode || self.end_mode != last_acked.end_mode {
            return true;
        }
        if self.acceleration != last_acked.acceleration {
            if (self.accel_mag - last_acked.accel_mag).abs() > ACCEL_MAG_THRESHOLD {
                return true;
            }
            if self.accel_normal.dot(last_acked.accel_normal) < ACCEL_DOT_THRESHOLD {
                return true;
            }
        }
        false
    }

    /// Whether `new_move` can be folded into this (pending) move and sent as one
    pub fn can_combine_with(&self, new_move: &SavedMove, max_delta: f32, bases: &BaseArena) -> bool {
        if self.force_no_combine || new_move.force_no_combine || self.old_time_stamp_before_reset {
            return false;
        }
        if self.delta_time + new_move.delta_time >= max_delta {
            return false;
        }
        if self.acceleration == Vec3::ZERO {
            if new_move.acceleration != Vec3::ZERO {
                return false;
            }
        } else if new_move.acceleration == Vec3::ZERO
            || self.accel_normal.dot(new_move.accel_normal) <= COMBINE_ACCEL_DOT_THRESHOLD
        {
            return false;
        }
        // Starting or stopping is a state change the server should see
        if (self.start_velocity == Vec3::ZERO) != (new_move.start_velocity == Vec3::ZERO) {
            return false;
        }
        if self.pressed_jump || new_move.pressed_jump || self.compressed_flags() != new_move.compressed_flags() {
            return false;
        }
        let dynamic = bases.is_dynamic(self.start_base) || bases.is_dynamic(new_move.start_base);
        if dynamic && self.start_base != new_move.start_base {
            return false;
        }
        if self.start_mode != new_move.start_mode || self.end_mode != new_move.start_mode {
            return false;
        }
        self.start_crouched == new_move.start_crouched
    }
}

fn relative_location(movement: &CharacterMovement, bases: &BaseArena) -> Option<Vec3> {
    movement
        .base()
        .and_then(|handle| bases.resolve(handle))
        .filter(|surface| surface.is_movable())
        .map(|surface| movement.location - surface.location)
}
