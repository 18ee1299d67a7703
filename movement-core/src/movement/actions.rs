//! Discrete actions: jumping, launching, crouching and turning.

use bevy::prelude::*;

use super::{CharacterMovement, MovementEvent, MovementMode};
use crate::geometry::{Capsule, MoveContext};
use crate::rotator::{fixed_turn, Rotator};

/// Height inflation of the standing capsule when testing whether we can uncrouch
const UNCROUCH_SWEEP_INFLATION: f32 = 0.001;

/// Closest we get to the floor when ducking under something overhead
const UNCROUCH_MIN_FLOOR_DIST: f32 = 0.001;

impl CharacterMovement {
    pub fn can_jump(&self) -> bool {
        self.is_moving_on_ground()
            && !self.crouched
            && !self.wants_to_crouch
            && self.config.jump_z_velocity > 0.0
    }

    /// Jumps if the jump input is held and a jump is allowed
    pub(crate) fn check_jump_input(&mut self, ctx: &MoveContext) {
        if self.jump_pressed {
            self.do_jump(ctx);
        }
    }

    pub fn do_jump(&mut self, ctx: &MoveContext) -> bool {
        if !self.can_jump() {
            return false;
        }
        self.velocity.z = self.velocity.z.max(self.config.jump_z_velocity);
        self.set_movement_mode(MovementMode::Falling, ctx);
        self.notify(MovementEvent::Jumped);
        true
    }

    /// Queues a velocity override applied at the start of the next update
    pub fn launch(&mut self, velocity: Vec3) {
        if self.mode != MovementMode::None {
            self.pending_launch_velocity = velocity;
        }
    }

    pub(crate) fn handle_pending_launch(&mut self, ctx: &MoveContext) -> bool {
        if self.pending_launch_velocity == Vec3::ZERO {
            return false;
        }
        tracing::debug!(velocity = ?self.pending_launch_velocity, "launched");
        self.velocity = self.pending_launch_velocity;
        self.set_movement_mode(MovementMode::Falling, ctx);
        self.pending_launch_velocity = Vec3::ZERO;
        self.force_next_floor_check = true;
        true
    }

    /// Hops off the current base, away from its origin
    pub fn jump_off(&mut self, ctx: &MoveContext) {
        let max_speed = self.max_speed() * 0.85;
        self.velocity += self.best_direction_off_base(ctx) * max_speed;
        if self.velocity.truncate().length() > max_speed {
            self.velocity = self.velocity.normalize_or_zero() * max_speed;
        }
        self.velocity.z = self.config.jump_off_jump_z_factor * self.config.jump_z_velocity;
        self.set_movement_mode(MovementMode::Falling, ctx);
    }

    fn best_direction_off_base(&self, ctx: &MoveContext) -> Vec3 {
        let away = self
            .base
            .and_then(|handle| ctx.bases.resolve(handle))
            .map(|surface| self.location - surface.location)
            .unwrap_or(Vec3::ZERO);
        let away = Vec3::new(away.x, away.y, 0.0).normalize_or_zero();
        if away != Vec3::ZERO {
            return away;
        }
        let facing = self.rotation.direction();
        Vec3::new(facing.x, facing.y, 0.0).normalize_or_zero()
    }

    pub fn can_crouch_in_current_state(&self) -> bool {
        self.config.can_crouch && (self.is_falling() || self.is_moving_on_ground())
    }

    pub(crate) fn update_crouch_state(&mut self, ctx: &MoveContext) {
        let wants = self.wants_to_crouch && self.can_crouch_in_current_state();
        if self.crouched && !wants {
            self.uncrouch(ctx);
        } else if !self.crouched && wants {
            self.crouch(ctx);
        }
    }

    /// Shrinks to the crouched capsule. On the ground the feet stay put.
    pub fn crouch(&mut self, ctx: &MoveContext) {
        if self.crouched || !self.can_crouch_in_current_state() {
            return;
        }
        let crouched_half_height = self.config.crouched_half_height;
        let adjust = self.half_height - crouched_half_height;
        self.half_height = crouched_half_height;
        if self.crouch_maintains_base_location && adjust != 0.0 {
            let location = self.location - Vec3::Z * adjust;
            self.set_location_unswept(location, ctx);
        }
        self.crouched = true;
        self.force_next_floor_check = true;
        self.notify(MovementEvent::StartCrouch);
    }

    /// Grows back to the standing capsule if there is room; otherwise stays crouched
    pub fn uncrouch(&mut self, ctx: &MoveContext) {
        if !self.crouched {
            return;
        }
        let standing_half_height = self.config.capsule_half_height;
        let adjust = standing_half_height - self.half_height;
        let standing = Capsule::new(self.radius(), standing_half_height).shrunk(0.0, -UNCROUCH_SWEEP_INFLATION);

        let mut standing_location = self.location;
        if self.crouch_maintains_base_location {
            standing_location.z += adjust;
        }
        let mut encroached = ctx.geometry.overlap_test(&standing, standing_location);
        if encroached && self.is_moving_on_ground() && self.crouch_maintains_base_location {
            // Something may be just overhead; try standing up closer to the floor
            let floor = &self.current_floor;
            if floor.blocking_hit && floor.floor_dist > UNCROUCH_MIN_FLOOR_DIST {
                let lowered = standing_location - Vec3::Z * (floor.floor_dist - UNCROUCH_MIN_FLOOR_DIST);
                if !ctx.geometry.overlap_test(&standing, lowered) {
                    standing_location = lowered;
                    encroached = false;
                }
            }
        }
        if encroached {
            tracing::trace!(location = ?self.location, "no room to stand up");
            return;
        }

        self.half_height = standing_half_height;
        self.set_location_unswept(standing_location, ctx);
        self.crouched = false;
        self.force_next_floor_check = true;
        self.notify(MovementEvent::EndCrouch);
    }

    /// Turns toward the acceleration direction at the configured rate
    pub(crate) fn physics_rotation(&mut self, delta_time: f32) {
        if !self.config.orient_rotation_to_movement || self.mode == MovementMode::None {
            return;
        }
        if self.acceleration.length_squared() < 1.0e-8 {
            return;
        }
        let current = self.rotation;
        let rate = self.config.rotation_rate.scaled(delta_time);
        let mut desired = Rotator::from_direction(self.acceleration);
        if self.is_moving_on_ground() || self.is_falling() {
            desired.pitch = 0.0;
            desired.roll = 0.0;
        }
        if current.equals(&desired, 1.0e-3) {
            return;
        }
        self.rotation = Rotator::new(
            fixed_turn(current.pitch, desired.pitch, rate.pitch),
            fixed_turn(current.yaw, desired.yaw, rate.yaw),
            fixed_turn(current.roll, desired.roll, rate.roll),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    const DT: f32 = 1.0 / 60.0;

    #[test]
    fn test_jump_from_floor() {
        let scene = flat_scene();
        let ctx = scene.context();
        let mut movement = standing(&scene, 0.0, 0.0);
        movement.drain_events();
        movement.jump_pressed = true;
        movement.tick(Vec3::ZERO, DT, &ctx).unwrap();

        assert_eq!(movement.mode(), MovementMode::Falling);
        assert!(movement.velocity.z > 400.0 && movement.velocity.z < 420.0);
        assert!(movement.drain_events().contains(&MovementEvent::Jumped));
        assert!(!movement.jump_pressed);
    }

    #[test]
    fn test_cannot_jump_while_falling_or_crouched() {
        let scene = flat_scene();
        let ctx = scene.context();
        let mut movement = standing(&scene, 0.0, 0.0);
        movement.wants_to_crouch = true;
        movement.tick(Vec3::ZERO, DT, &ctx).unwrap();
        assert!(movement.is_crouched());
        assert!(!movement.can_jump());
        movement.jump_pressed = true;
        movement.tick(Vec3::ZERO, DT, &ctx).unwrap();
        assert_eq!(movement.mode(), MovementMode::Walking);

        movement.set_movement_mode(MovementMode::Falling, &ctx);
        movement.wants_to_crouch = false;
        assert!(!movement.can_jump());
    }

    #[test]
    fn test_crouch_keeps_feet_on_floor() {
        let scene = flat_scene();
        let ctx = scene.context();
        let mut movement = standing(&scene, 0.0, 0.0);
        let bottom = movement.location.z - movement.half_height();
        movement.drain_events();

        movement.wants_to_crouch = true;
        movement.tick(Vec3::ZERO, DT, &ctx).unwrap();
        assert!(movement.is_crouched());
        assert_eq!(movement.half_height(), 40.0);
        assert!((movement.location.z - movement.half_height() - bottom).abs() < 0.3);
        assert!(movement.drain_events().contains(&MovementEvent::StartCrouch));

        movement.wants_to_crouch = false;
        movement.tick(Vec3::ZERO, DT, &ctx).unwrap();
        assert!(!movement.is_crouched());
        assert_eq!(movement.half_height(), 88.0);
        assert!((movement.location.z - movement.half_height() - bottom).abs() < 0.3);
        assert!(movement.drain_events().contains(&MovementEvent::EndCrouch));
    }

    #[test]
    fn test_crouched_walk_is_slower() {
        let scene = flat_scene();
        let ctx = scene.context();
        let mut movement = standing(&scene, 0.0, 0.0);
        movement.wants_to_crouch = true;
        for _ in 0..60 {
            movement.tick(Vec3::X, DT, &ctx).unwrap();
        }
        assert!(movement.velocity.length() <= 300.0 + 1e-2);
        assert!(movement.velocity.x > 250.0);
    }

    #[test]
    fn test_low_ceiling_blocks_uncrouch() {
        let mut scene = flat_scene();
        scene.add_box(Vec3::new(0.0, 0.0, 150.0), Vec3::new(300.0, 300.0, 30.0));
        let ctx = scene.context();
        let mut movement = standing(&scene, 0.0, 0.0);
        movement.crouch(&ctx);
        assert!(movement.is_crouched());

        movement.uncrouch(&ctx);
        assert!(movement.is_crouched());
        assert_eq!(movement.half_height(), 40.0);
    }

    #[test]
    fn test_crouch_disabled_by_config() {
        let scene = flat_scene();
        let ctx = scene.context();
        let mut movement = standing(&scene, 0.0, 0.0);
        movement.config.can_crouch = false;
        movement.crouch(&ctx);
        assert!(!movement.is_crouched());
    }

    #[test]
    fn test_launch_applies_on_next_update() {
        let scene = flat_scene();
        let ctx = scene.context();
        let mut movement = standing(&scene, 0.0, 0.0);
        let start_z = movement.location.z;
        movement.launch(Vec3::new(300.0, 0.0, 500.0));
        assert_eq!(movement.mode(), MovementMode::Walking);

        movement.tick(Vec3::ZERO, DT, &ctx).unwrap();
        assert_eq!(movement.mode(), MovementMode::Falling);
        assert!(movement.velocity.z > 480.0);
        assert!((movement.velocity.x - 300.0).abs() < 1.0);
        assert!(movement.location.z > start_z);
    }

    #[test]
    fn test_launch_ignored_when_disabled() {
        let mut movement = CharacterMovement::default();
        movement.launch(Vec3::Z * 100.0);
        assert_eq!(movement.pending_launch_velocity, Vec3::ZERO);
    }

    #[test]
    fn test_jump_off_pushes_away_from_base() {
        let scene = flat_scene();
        let ctx = scene.context();
        let mut movement = standing(&scene, 50.0, 0.0);
        movement.jump_off(&ctx);
        assert_eq!(movement.mode(), MovementMode::Falling);
        assert!((movement.velocity.x - 510.0).abs() < 1e-2);
        assert!((movement.velocity.z - 210.0).abs() < 1e-3);
    }

    #[test]
    fn test_orient_rotation_to_movement() {
        let scene = flat_scene();
        let ctx = scene.context();
        let mut movement = standing(&scene, 0.0, 0.0);
        movement.config.orient_rotation_to_movement = true;

        movement.tick(Vec3::Y, DT, &ctx).unwrap();
        assert!((movement.rotation.yaw - 6.0).abs() < 1e-3);
        for _ in 0..30 {
            movement.tick(Vec3::Y, DT, &ctx).unwrap();
        }
        assert!((movement.rotation.yaw - 90.0).abs() < 1e-3);
        assert_eq!(movement.rotation.pitch, 0.0);
    }
}
