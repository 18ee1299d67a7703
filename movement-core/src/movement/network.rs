//! Entry points used by client replay and the authoritative server.

use bevy::prelude::*;

use super::{CharacterMovement, FindFloorResult, MovementMode};
use crate::base::BaseHandle;
use crate::error::MovementResult;
use crate::geometry::MoveContext;
use crate::net::{FLAG_JUMP_PRESSED, FLAG_WANTS_TO_CROUCH};
use crate::rotator::Rotator;

impl CharacterMovement {
    pub fn compressed_flags(&self) -> u8 {
        let mut flags = 0;
        if self.jump_pressed {
            flags |= FLAG_JUMP_PRESSED;
        }
        if self.wants_to_crouch {
            flags |= FLAG_WANTS_TO_CROUCH;
        }
        flags
    }

    pub fn apply_compressed_flags(&mut self, flags: u8) {
        self.jump_pressed = flags & FLAG_JUMP_PRESSED != 0;
        self.wants_to_crouch = flags & FLAG_WANTS_TO_CROUCH != 0;
    }

    /// Simulates one move from its wire form.
    ///
    /// This is the only path through which saved moves are executed, on the
    /// server and in client replay alike, so both integrate identical input.
    pub fn move_autonomous(
        &mut self,
        delta_time: f32,
        flags: u8,
        acceleration: Vec3,
        ctx: &MoveContext,
    ) -> MovementResult<()> {
        self.apply_compressed_flags(flags);
        self.check_jump_input(ctx);
        self.acceleration = self
            .constrain_input_acceleration(acceleration)
            .clamp_length_max(self.config.max_acceleration);
        let result = self.perform_movement(delta_time, ctx);
        self.jump_pressed = false;
        result
    }

    /// Mode implied by the state a correction left us in
    pub fn determine_simulated_movement_mode(&self) -> MovementMode {
        if self.base.is_some() {
            MovementMode::Walking
        } else if self.in_water && self.config.can_swim {
            MovementMode::Swimming
        } else if matches!(self.mode, MovementMode::Flying | MovementMode::Custom(_)) {
            self.mode
        } else if self.config.gravity() == 0.0 {
            MovementMode::Flying
        } else {
            MovementMode::Falling
        }
    }

    pub fn update_movement_mode_from_adjustment(&mut self, ctx: &MoveContext) {
        if self.mode == MovementMode::None {
            return;
        }
        let mode = self.determine_simulated_movement_mode();
        self.set_movement_mode(mode, ctx);
    }

    /// Snaps to an authoritative state. A base that no longer resolves is
    /// replaced by whatever walkable floor is under the new location.
    pub(crate) fn apply_server_correction(
        &mut self,
        location: Vec3,
        velocity: Vec3,
        base: Option<BaseHandle>,
        ctx: &MoveContext,
    ) {
        let previous_base = self.base;
        self.set_location_unswept(location, ctx);

        let mut final_base = base;
        if let Some(handle) = base {
            if !ctx.bases.is_alive(handle) {
                final_base = None;
                if previous_base.is_some() {
                    self.current_floor = self.find_floor(self.location, false, None, ctx);
                    if self.current_floor.is_walkable_floor() {
                        final_base = self.current_floor.hit.component;
                    }
                }
            }
        }
        self.set_base(final_base, ctx);
        self.update_movement_mode_from_adjustment(ctx);
        self.velocity = velocity;
        self.update_floor_from_adjustment(ctx);

        self.just_teleported = true;
        self.save_base_location(ctx);
        self.last_update_location = self.location;
    }

    /// Trusts a client-reported location on a client-authoritative server
    pub(crate) fn accept_client_location(&mut self, location: Vec3, ctx: &MoveContext) {
        self.set_location_unswept(location, ctx);
        if self.is_moving_on_ground() {
            self.current_floor = self.find_floor(self.location, false, None, ctx);
            self.set_base_from_floor(ctx);
        }
        self.update_movement_mode_from_adjustment(ctx);
        self.save_base_location(ctx);
        self.last_update_location = self.location;
    }

    fn update_floor_from_adjustment(&mut self, ctx: &MoveContext) {
        if self.is_moving_on_ground() {
            self.current_floor = self.find_floor(self.location, false, None, ctx);
        }
        self.force_next_floor_check = true;
    }

    /// Puts the character back where an earlier move started, so that move
    /// can be re-simulated together with a newer one
    pub(crate) fn revert_to(
        &mut self,
        location: Vec3,
        rotation: Rotator,
        velocity: Vec3,
        base: Option<BaseHandle>,
        floor: FindFloorResult,
        ctx: &MoveContext,
    ) {
        self.set_location_unswept(location, ctx);
        self.rotation = rotation;
        self.velocity = velocity;
        self.set_base(base, ctx);
        self.current_floor = floor;
        self.last_update_location = self.location;
    }
}
