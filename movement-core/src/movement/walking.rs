//! Walking: moving along a floor, ledges and walking off them.

use bevy::prelude::*;

use super::{CharacterMovement, FindFloorResult, MovementEvent, MovementMode, StepDownResult};
use crate::base::BaseHandle;
use crate::constants::{KINDA_SMALL_NUMBER, MAX_FLOOR_DIST, MIN_TICK_TIME};
use crate::geometry::{Capsule, HitResult, MoveContext};

impl CharacterMovement {
    pub fn can_walk_off_ledges(&self) -> bool {
        if !self.config.can_walk_off_ledges_when_crouching && self.crouched {
            return false;
        }
        self.config.can_walk_off_ledges
    }

    pub(crate) fn phys_walking(&mut self, delta_time: f32, mut iterations: u32, ctx: &MoveContext) {
        if delta_time < MIN_TICK_TIME {
            return;
        }
        self.just_teleported = false;
        let mut checked_fall = false;
        let mut tried_ledge_move = false;
        let mut remaining_time = delta_time;

        while remaining_time >= MIN_TICK_TIME && iterations < self.config.substep.max_simulation_iterations {
            iterations += 1;
            self.just_teleported = false;
            let time_tick = self.simulation_time_step(remaining_time, iterations);
            remaining_time -= time_tick;

            let old_base = self.base;
            let previous_base_location = old_base
                .and_then(|b| ctx.bases.resolve(b))
                .map(|s| s.location)
                .unwrap_or(Vec3::ZERO);
            let old_location = self.location;
            let old_floor = self.current_floor;

            self.maintain_horizontal_ground_velocity();
            let old_velocity = self.velocity;
            self.acceleration.z = 0.0;

            let braking = self.max_braking_deceleration();
            self.calc_velocity(time_tick, self.config.ground_friction, false, braking, ctx);

            let move_velocity = self.velocity;
            let delta = move_velocity * time_tick;
            let zero_delta = delta.abs_diff_eq(Vec3::ZERO, KINDA_SMALL_NUMBER);
            let mut step_down = StepDownResult::default();

            if zero_delta {
                remaining_time = 0.0;
            } else {
                self.move_along_floor(move_velocity, time_tick, &mut step_down, ctx);

                if self.is_falling() {
                    // Something launched us off the floor; hand over the unused time
                    let desired = delta.length();
                    if desired > KINDA_SMALL_NUMBER {
                        let actual = (self.location - old_location).truncate().length();
                        remaining_time += time_tick * (1.0 - (actual / desired).min(1.0));
                    }
                    self.start_new_physics(remaining_time, iterations, ctx);
                    return;
                } else if self.is_swimming() {
                    self.start_swimming(old_location, old_velocity, time_tick, remaining_time, iterations, ctx);
                    return;
                }
            }

            // Step up may already have found the floor
            if step_down.computed_floor {
                self.current_floor = step_down.floor;
            } else {
                let location = self.location;
                self.current_floor = self.find_floor(location, zero_delta, None, ctx);
            }

            let old_base_gone = old_base.map(|b| !ctx.bases.is_alive(b)).unwrap_or(true);
            let check_ledges = !self.can_walk_off_ledges();
            if check_ledges && !self.current_floor.is_walkable_floor() {
                let new_delta = if tried_ledge_move {
                    Vec3::ZERO
                } else {
                    self.ledge_move(old_location, delta, ctx)
                };
                if new_delta != Vec3::ZERO {
                    // Undo this move and try walking along the ledge instead
                    self.revert_move(old_location, old_base, previous_base_location, &old_floor, false, ctx);
                    tried_ledge_move = true;
                    self.velocity = new_delta / time_tick;
                    remaining_time += time_tick;
                    continue;
                }

                let must_jump = zero_delta || old_base_gone;
                if (must_jump || !checked_fall)
                    && self.check_fall(delta, old_location, remaining_time, time_tick, iterations, must_jump, ctx)
                {
                    return;
                }

                tracing::trace!(location = ?self.location, "stopped at ledge");
                self.revert_move(old_location, old_base, previous_base_location, &old_floor, true, ctx);
                break;
            }

            if self.current_floor.is_walkable_floor() {
                self.adjust_floor_height(ctx);
                self.set_base_from_floor(ctx);
            } else if self.current_floor.hit.start_penetrating && remaining_time <= 0.0 {
                // Pop out of the floor rather than sweeping down into it
                let mut hit = self.current_floor.hit;
                hit.trace_end = hit.trace_start + Vec3::Z * MAX_FLOOR_DIST;
                let adjustment = self.penetration_adjustment(&hit);
                let rotation = self.rotation;
                self.resolve_penetration(adjustment, &hit, rotation, ctx);
                self.force_next_floor_check = true;
            }

            if self.is_swimming() {
                let velocity = self.velocity;
                self.start_swimming(old_location, velocity, time_tick, remaining_time, iterations, ctx);
                return;
            }

            if !self.current_floor.is_walkable_floor() && !self.current_floor.hit.start_penetrating {
                let must_jump = self.just_teleported || zero_delta || old_base_gone;
                if (must_jump || !checked_fall)
                    && self.check_fall(delta, old_location, remaining_time, time_tick, iterations, must_jump, ctx)
                {
                    return;
                }
                checked_fall = true;
            }

            // Velocity reflects the actual move
            if self.is_moving_on_ground() && !self.just_teleported && time_tick >= MIN_TICK_TIME {
                self.velocity = (self.location - old_location) / time_tick;
                self.maintain_horizontal_ground_velocity();
            }

            // Stuck: further iterations won't get anywhere either
            if self.location == old_location {
                break;
            }
        }

        if self.is_moving_on_ground() {
            self.maintain_horizontal_ground_velocity();
        }
    }

    /// Horizontal `delta` bent to follow the slope of a walkable ramp
    pub fn compute_ground_movement_delta(&self, delta: Vec3, ramp_hit: &HitResult, hit_from_line_trace: bool, ctx: &MoveContext) -> Vec3 {
        let floor_normal = ramp_hit.impact_normal;
        let contact_normal = ramp_hit.normal;
        if floor_normal.z < 1.0 - KINDA_SMALL_NUMBER
            && floor_normal.z > KINDA_SMALL_NUMBER
            && contact_normal.z > KINDA_SMALL_NUMBER
            && !hit_from_line_trace
            && self.is_walkable(ramp_hit, ctx)
        {
            let ramp = Vec3::new(delta.x, delta.y, -floor_normal.dot(delta) / floor_normal.z);
            if self.config.maintain_horizontal_ground_velocity {
                ramp
            } else {
                ramp.normalize_or_zero() * delta.length()
            }
        } else {
            delta
        }
    }

    /// Moves horizontally along the current floor, stepping up or sliding on impact
    pub(crate) fn move_along_floor(
        &mut self,
        velocity: Vec3,
        delta_seconds: f32,
        step_down: &mut StepDownResult,
        ctx: &MoveContext,
    ) {
        if !self.current_floor.is_walkable_floor() {
            return;
        }
        let delta = Vec3::new(velocity.x, velocity.y, 0.0) * delta_seconds;
        let floor_hit = self.current_floor.hit;
        let ramp = self.compute_ground_movement_delta(delta, &floor_hit, self.current_floor.line_trace, ctx);
        let rotation = self.rotation;
        let mut hit = self.safe_move_updated_component(ramp, rotation, ctx);

        if hit.start_penetrating {
            // Deflect off whatever we're stuck in rather than hitching
            let normal = hit.normal;
            self.slide_along_surface(delta, 1.0, normal, &mut hit, ctx);
            if hit.start_penetrating {
                tracing::warn!(location = ?self.location, "character stuck in geometry");
                self.notify(MovementEvent::StuckInGeometry);
                self.just_teleported = true;
            }
            return;
        }

        if !hit.is_valid_blocking_hit() {
            return;
        }

        let mut percent_applied = hit.time;
        if hit.time > 0.0 && hit.normal.z > KINDA_SMALL_NUMBER && self.is_walkable(&hit, ctx) {
            // Another walkable ramp
            let initial_remaining = 1.0 - percent_applied;
            let ramp = self.compute_ground_movement_delta(delta * initial_remaining, &hit, false, ctx);
            hit = self.safe_move_updated_component(ramp, rotation, ctx);
            let second = hit.time * initial_remaining;
            percent_applied = (percent_applied + second).clamp(0.0, 1.0);
        }

        if hit.is_valid_blocking_hit() {
            let hit_our_base = self.base.is_some() && hit.component == self.base;
            if self.can_step_up(&hit, ctx) || hit_our_base {
                match self.step_up(delta * (1.0 - percent_applied), &hit, ctx) {
                    Some(result) => {
                        *step_down = result;
                        self.just_teleported |= !self.config.maintain_horizontal_ground_velocity;
                    }
                    None => {
                        let normal = hit.normal;
                        self.slide_along_surface(delta, 1.0 - percent_applied, normal, &mut hit, ctx);
                    }
                }
            } else {
                // Not steppable; slide along it
                let normal = hit.normal;
                self.slide_along_surface(delta, 1.0 - percent_applied, normal, &mut hit, ctx);
            }
        }
    }

    /// A sideways alternative to walking off a ledge, or zero if there is none
    pub(crate) fn ledge_move(&self, old_location: Vec3, delta: Vec3, ctx: &MoveContext) -> Vec3 {
        if delta == Vec3::ZERO {
            return Vec3::ZERO;
        }
        let side = Vec3::new(delta.y, -delta.x, 0.0);
        if self.check_ledge_direction(old_location, side, ctx) {
            return side;
        }
        if self.check_ledge_direction(old_location, -side, ctx) {
            return -side;
        }
        Vec3::ZERO
    }

    /// Whether stepping sideways by `side_step` keeps us on walkable ground
    fn check_ledge_direction(&self, old_location: Vec3, side_step: Vec3, ctx: &MoveContext) -> bool {
        let side_dest = old_location + side_step;
        let shape = Capsule::new(self.radius(), self.half_height);
        let mut result = ctx.geometry.sweep(&shape, old_location, side_dest);
        if result.blocking_hit && !self.is_walkable(&result, ctx) {
            return false;
        }
        if !result.blocking_hit {
            let drop = self.config.max_step_height + self.config.ledge_check_threshold;
            result = ctx.geometry.sweep(&shape, side_dest, side_dest + Vec3::NEG_Z * drop);
        }
        result.time < 1.0 && self.is_walkable(&result, ctx)
    }

    /// Restores the state from before a walking iteration
    pub(crate) fn revert_move(
        &mut self,
        old_location: Vec3,
        old_base: Option<BaseHandle>,
        previous_base_location: Vec3,
        old_floor: &FindFloorResult,
        fail_move: bool,
        ctx: &MoveContext,
    ) {
        self.set_location_unswept(old_location, ctx);
        self.just_teleported = false;

        // Only restore a base that cannot have moved meanwhile
        let base_unchanged = old_base.and_then(|b| ctx.bases.resolve(b)).map(|surface| {
            !surface.is_movable() || surface.location == previous_base_location
        });
        if base_unchanged == Some(true) {
            self.current_floor = *old_floor;
            self.set_base(old_base, ctx);
        } else {
            self.set_base(None, ctx);
        }

        if fail_move {
            self.velocity = Vec3::ZERO;
            self.acceleration = Vec3::ZERO;
        }
    }

    /// Starts falling if allowed; returns whether the character left the ground
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn check_fall(
        &mut self,
        delta: Vec3,
        old_location: Vec3,
        remaining_time: f32,
        time_tick: f32,
        iterations: u32,
        must_jump: bool,
        ctx: &MoveContext,
    ) -> bool {
        if !must_jump && !self.can_walk_off_ledges() {
            return false;
        }
        tracing::debug!(location = ?self.location, "walked off ledge");
        if self.is_moving_on_ground() {
            self.start_falling(iterations, remaining_time, time_tick, delta, old_location, ctx);
        }
        true
    }

    /// Switches to falling and spends the time the walk could not use
    pub(crate) fn start_falling(
        &mut self,
        iterations: u32,
        remaining_time: f32,
        time_tick: f32,
        delta: Vec3,
        sub_location: Vec3,
        ctx: &MoveContext,
    ) {
        let desired = delta.length();
        let actual = (self.location - sub_location).truncate().length();
        let remaining_time = if desired < KINDA_SMALL_NUMBER {
            0.0
        } else {
            remaining_time + time_tick * (1.0 - (actual / desired).min(1.0))
        };
        if self.is_moving_on_ground() {
            self.set_movement_mode(MovementMode::Falling, ctx);
        }
        self.start_new_physics(remaining_time, iterations, ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::MovementConfig;
    use crate::constants::MIN_FLOOR_DIST;
    use crate::geometry::MovementScene;

    const DT: f32 = 1.0 / 60.0;

    fn run(movement: &mut CharacterMovement, input: Vec3, seconds: f32, ctx: &MoveContext) {
        let ticks = (seconds / DT).round() as usize;
        for _ in 0..ticks {
            movement.tick(input, DT, ctx).unwrap();
        }
    }

    #[test]
    fn test_walk_reaches_max_speed_on_flat_ground() {
        let scene = flat_scene();
        let ctx = scene.context();
        let mut movement = standing(&scene, 0.0, 0.0);
        run(&mut movement, Vec3::X, 1.0, &ctx);
        assert_eq!(movement.mode(), MovementMode::Walking);
        assert!((movement.velocity.x - 600.0).abs() < 1.0, "velocity {:?}", movement.velocity);
        assert!(movement.location.x > 450.0);
        let floor_dist = movement.location.z - 88.0;
        assert!((MIN_FLOOR_DIST - 0.01..=MAX_FLOOR_DIST + 0.01).contains(&floor_dist));
    }

    #[test]
    fn test_releasing_input_brakes_to_rest() {
        let scene = flat_scene();
        let ctx = scene.context();
        let mut movement = standing(&scene, 0.0, 0.0);
        run(&mut movement, Vec3::X, 1.0, &ctx);
        run(&mut movement, Vec3::ZERO, 1.0, &ctx);
        assert_eq!(movement.velocity, Vec3::ZERO);
        let rest = movement.location;
        run(&mut movement, Vec3::ZERO, 0.5, &ctx);
        assert_eq!(movement.location, rest);
    }

    #[test]
    fn test_walks_up_small_step() {
        let mut scene = flat_scene();
        scene.add_box(Vec3::new(300.0, 0.0, 5.0), Vec3::new(150.0, 500.0, 5.0));
        let ctx = scene.context();
        let mut movement = standing(&scene, 0.0, 0.0);
        run(&mut movement, Vec3::X, 0.8, &ctx);
        assert_eq!(movement.mode(), MovementMode::Walking);
        assert!(movement.location.x > 200.0);
        let floor_dist = movement.location.z - 88.0 - 10.0;
        assert!((MIN_FLOOR_DIST - 0.01..=MAX_FLOOR_DIST + 0.01).contains(&floor_dist), "z {}", movement.location.z);
    }

    #[test]
    fn test_wall_blocks_walking() {
        let mut scene = flat_scene();
        scene.add_box(Vec3::new(200.0, 0.0, 150.0), Vec3::new(20.0, 500.0, 150.0));
        let ctx = scene.context();
        let mut movement = standing(&scene, 0.0, 0.0);
        run(&mut movement, Vec3::X, 1.0, &ctx);
        assert_eq!(movement.mode(), MovementMode::Walking);
        assert!(movement.location.x < 180.0 - 34.0 + 0.01);
        assert!(movement.location.x > 140.0);
        assert!(movement.velocity.x.abs() < 1.0);
    }

    #[test]
    fn test_ramp_is_climbed() {
        let mut scene = flat_scene();
        // 20 degree ramp rising out of the floor at x = 190
        scene.add_ramp(Vec3::new(400.0, 0.0, -30.0), Vec3::new(300.0, 500.0, 100.0), 20.0);
        let ctx = scene.context();
        let mut movement = standing(&scene, -200.0, 0.0);
        run(&mut movement, Vec3::X, 1.0, &ctx);
        assert_eq!(movement.mode(), MovementMode::Walking);
        assert!(movement.location.z > 100.0);
        assert!(movement.current_floor.hit.impact_normal.z < 0.99);
    }

    fn ledge_scene() -> MovementScene {
        let mut scene = MovementScene::new();
        scene.add_box(Vec3::new(0.0, 0.0, -50.0), Vec3::new(100.0, 2000.0, 50.0));
        scene
    }

    #[test]
    fn test_walking_off_ledge_starts_falling() {
        let scene = ledge_scene();
        let ctx = scene.context();
        let mut movement = standing(&scene, 50.0, 0.0);
        assert_eq!(movement.mode(), MovementMode::Walking);
        run(&mut movement, Vec3::X, 0.5, &ctx);
        assert_eq!(movement.mode(), MovementMode::Falling);
        assert!(movement.location.x > 100.0);
    }

    #[test]
    fn test_ledge_holds_when_walking_off_is_disabled() {
        let scene = ledge_scene();
        let ctx = scene.context();
        let config = MovementConfig {
            can_walk_off_ledges: false,
            ..MovementConfig::default()
        };
        let mut movement = CharacterMovement::new(config, Vec3::new(50.0, 0.0, 90.15));
        movement.set_default_movement_mode(&ctx);
        run(&mut movement, Vec3::X, 0.5, &ctx);
        assert_eq!(movement.mode(), MovementMode::Walking);
        assert!(movement.location.x < 100.0 + 34.0);
        // May settle slightly down the rim, never off it
        assert!(movement.location.z > 75.0);
    }

    #[test]
    fn test_revert_restores_static_floor() {
        let scene = flat_scene();
        let ctx = scene.context();
        let mut movement = standing(&scene, 0.0, 0.0);
        let old_floor = movement.current_floor;
        let old_base = movement.base();
        let old_location = movement.location;
        movement.location.x += 50.0;
        movement.current_floor.clear();
        movement.velocity = Vec3::X * 100.0;
        movement.revert_move(old_location, old_base, Vec3::ZERO, &old_floor, true, &ctx);
        assert_eq!(movement.location, old_location);
        assert_eq!(movement.current_floor, old_floor);
        assert_eq!(movement.base(), old_base);
        assert_eq!(movement.velocity, Vec3::ZERO);
    }

    #[test]
    fn test_ground_delta_follows_ramp() {
        let scene = flat_scene();
        let ctx = scene.context();
        let movement = standing(&scene, 0.0, 0.0);
        let normal = Vec3::new(-0.3, 0.0, 1.0).normalize();
        let ramp = movement.compute_ground_movement_delta(Vec3::X * 10.0, &hit_with_normal(normal), false, &ctx);
        assert!(ramp.z > 0.0);
        assert!(ramp.dot(normal).abs() < 1e-4);
        let flat = movement.compute_ground_movement_delta(Vec3::X * 10.0, &hit_with_normal(normal), true, &ctx);
        assert_eq!(flat, Vec3::X * 10.0);
    }
}
