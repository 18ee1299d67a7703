//! Swimming: buoyancy, water friction and leaving or entering water.

use bevy::prelude::*;

use super::{CharacterMovement, MovementMode};
use crate::constants::{KINDA_SMALL_NUMBER, MIN_TICK_TIME, SWIM_BOB_SPEED};
use crate::geometry::{HitResult, MoveContext};

/// Bisection steps used to locate the water surface along a segment
const WATER_LINE_ITERATIONS: usize = 20;

/// The water line is placed this far to the appropriate side of the surface
const WATER_LINE_OFFSET: f32 = 0.1;

impl CharacterMovement {
    /// Fraction of the capsule under the water surface, in [0, 1]
    pub fn immersion_depth(&self, ctx: &MoveContext) -> f32 {
        let volume = ctx.geometry.physics_volume(self.location);
        if !volume.water {
            return 0.0;
        }
        if self.half_height == 0.0 || self.config.buoyancy == 0.0 {
            return 1.0;
        }
        let bottom = self.location.z - self.half_height;
        ((volume.surface_z - bottom) / (2.0 * self.half_height)).clamp(0.0, 1.0)
    }

    pub(crate) fn phys_swimming(&mut self, delta_time: f32, mut iterations: u32, ctx: &MoveContext) {
        if delta_time < MIN_TICK_TIME {
            return;
        }
        let depth = self.immersion_depth(ctx);
        let net_buoyancy = self.config.buoyancy * depth;
        let original_accel_z = self.acceleration.z;
        let mut limited_up_accel = false;

        let max_swim = self.config.max_swim_speed;
        if self.velocity.z > 0.33 * max_swim && net_buoyancy != 0.0 {
            // Damp upward speed near the surface
            self.velocity.z = (0.33 * max_swim).max(self.velocity.z * depth * depth);
        } else if depth < 0.65 {
            limited_up_accel = self.acceleration.z > 0.0;
            self.acceleration.z = self.acceleration.z.min(0.1);
        }

        iterations += 1;
        let mut old_location = self.location;
        self.just_teleported = false;

        let friction = 0.5 * ctx.geometry.physics_volume(self.location).fluid_friction * depth;
        let braking = self.max_braking_deceleration();
        self.calc_velocity(delta_time, friction, true, braking, ctx);
        self.velocity.z += self.config.gravity() * delta_time * (1.0 - net_buoyancy);

        let mut adjusted = self.velocity * delta_time;
        let (air_time, mut hit) = self.swim(adjusted, ctx);
        let remaining_time = delta_time * air_time;

        if !self.is_swimming() {
            self.start_new_physics(remaining_time, iterations, ctx);
            return;
        }

        if hit.time < 1.0 {
            if limited_up_accel && self.velocity.z >= 0.0 {
                // Let the swimmer climb out against an obstacle at the surface
                self.velocity.z += original_accel_z * delta_time;
                adjusted = self.velocity * (1.0 - hit.time) * delta_time;
                let (_, retry) = self.swim(adjusted, ctx);
                hit = retry;
                if !self.is_swimming() {
                    self.start_new_physics(remaining_time, iterations, ctx);
                    return;
                }
            }

            let real_velocity = self.velocity;
            // Stepping moves up, which may take us out of the water
            self.velocity.z = 1.0;
            let stepped = self.step_or_slide(adjusted, &mut hit, &mut old_location, ctx);
            self.velocity = real_velocity;
            if stepped && !self.is_swimming() {
                self.start_new_physics(remaining_time, iterations, ctx);
                return;
            }
        }

        let moved_time = delta_time - remaining_time;
        if !self.just_teleported && moved_time > KINDA_SMALL_NUMBER {
            let water_jump = !ctx.geometry.physics_volume(self.location).water;
            let velocity_z = self.velocity.z;
            self.velocity = (self.location - old_location) / moved_time;
            if water_jump {
                self.velocity.z = velocity_z;
            }
        }

        if !ctx.geometry.physics_volume(self.location).water && self.is_swimming() {
            self.set_movement_mode(MovementMode::Falling, ctx);
        }
        if !self.is_swimming() {
            self.start_new_physics(remaining_time, iterations, ctx);
        }
    }

    /// Moves by `delta`; if that leaves the water, backs up to the water line.
    /// Returns the fraction of the move that would have been spent out of water.
    fn swim(&mut self, delta: Vec3, ctx: &MoveContext) -> (f32, HitResult) {
        let start = self.location;
        let rotation = self.rotation;
        let mut hit = self.safe_move_updated_component(delta, rotation, ctx);
        let mut air_time = 0.0;

        if !ctx.geometry.physics_volume(self.location).water {
            let end = self.find_water_line(start, self.location, ctx);
            let desired = delta.length();
            if end != self.location && desired > KINDA_SMALL_NUMBER {
                air_time = (end - self.location).length() / desired;
                if (self.location - start).dot(end - self.location) > 0.0 {
                    air_time = 0.0;
                }
                let back = end - self.location;
                hit = self.safe_move_updated_component(back, rotation, ctx);
            }
        }
        (air_time, hit)
    }

    /// Point where the segment from `in_water` to `out_of_water` crosses the surface,
    /// nudged into the water while swimming and out of it otherwise
    pub fn find_water_line(&self, in_water: Vec3, out_of_water: Vec3, ctx: &MoveContext) -> Vec3 {
        let is_water = |p: Vec3| ctx.geometry.physics_volume(p).water;
        if !is_water(in_water) || is_water(out_of_water) {
            return out_of_water;
        }
        let (mut wet, mut dry) = (in_water, out_of_water);
        for _ in 0..WATER_LINE_ITERATIONS {
            let mid = (wet + dry) * 0.5;
            if is_water(mid) {
                wet = mid;
            } else {
                dry = mid;
            }
        }
        let dir = (in_water - out_of_water).normalize_or_zero();
        if self.in_water {
            wet + dir * WATER_LINE_OFFSET
        } else {
            dry - dir * WATER_LINE_OFFSET
        }
    }

    /// Entry into water mid-tick: rebuild the end velocity, back up to the
    /// water line and continue swimming with the remaining time
    pub(crate) fn start_swimming(
        &mut self,
        old_location: Vec3,
        old_velocity: Vec3,
        time_tick: f32,
        mut remaining_time: f32,
        iterations: u32,
        ctx: &MoveContext,
    ) {
        if remaining_time < MIN_TICK_TIME || time_tick < MIN_TICK_TIME {
            return;
        }
        if !self.just_teleported {
            // End velocity has twice the acceleration of the average
            let average = (self.location - old_location) / time_tick;
            let terminal = ctx.geometry.physics_volume(self.location).terminal_velocity;
            self.velocity = (2.0 * average - old_velocity).clamp_length_max(terminal);
        }

        let end = self.find_water_line(self.location, old_location, ctx);
        if end != self.location {
            let actual = (self.location - old_location).length();
            if actual > KINDA_SMALL_NUMBER {
                remaining_time += time_tick * (end - self.location).length() / actual;
            }
            let rotation = self.rotation;
            let back = end - self.location;
            self.move_updated_component(back, rotation, ctx);
        }

        // Smooth bobbing, unless diving in fast
        if self.velocity.z > 2.0 * SWIM_BOB_SPEED && self.velocity.z < 0.0 {
            self.velocity.z = SWIM_BOB_SPEED - self.velocity.truncate().length() * 0.7;
        }

        if remaining_time >= MIN_TICK_TIME && iterations < self.config.substep.max_simulation_iterations {
            self.phys_swimming(remaining_time, iterations, ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::MovementConfig;
    use crate::geometry::MovementScene;

    const DT: f32 = 1.0 / 60.0;

    /// Pool with its surface at z = 400 over a floor at z = 0
    fn pool() -> MovementScene {
        let mut scene = flat_scene();
        scene.add_water(Vec3::new(-1000.0, -1000.0, 0.0), Vec3::new(1000.0, 1000.0, 400.0), 0.3);
        scene
    }

    fn swimmer(scene: &MovementScene, location: Vec3) -> CharacterMovement {
        let mut movement = CharacterMovement::new(MovementConfig::default(), location);
        movement.set_default_movement_mode(&scene.context());
        movement
    }

    #[test]
    fn test_default_mode_in_water_is_swimming() {
        let scene = pool();
        let movement = swimmer(&scene, Vec3::new(0.0, 0.0, 200.0));
        assert_eq!(movement.mode(), MovementMode::Swimming);
        assert!(movement.is_in_water());
    }

    #[test]
    fn test_immersion_depth() {
        let scene = pool();
        let ctx = scene.context();
        let mut movement = swimmer(&scene, Vec3::new(0.0, 0.0, 200.0));
        assert_eq!(movement.immersion_depth(&ctx), 1.0);
        // Center just under the surface: about half submerged
        movement.location.z = 399.0;
        assert!((movement.immersion_depth(&ctx) - (400.0 - 311.0) / 176.0).abs() < 1e-4);
        movement.config.buoyancy = 0.0;
        assert_eq!(movement.immersion_depth(&ctx), 1.0);
    }

    #[test]
    fn test_neutral_buoyancy_hovers_submerged() {
        let scene = pool();
        let ctx = scene.context();
        let mut movement = swimmer(&scene, Vec3::new(0.0, 0.0, 200.0));
        for _ in 0..60 {
            movement.tick(Vec3::ZERO, DT, &ctx).unwrap();
        }
        assert_eq!(movement.mode(), MovementMode::Swimming);
        assert!((movement.location.z - 200.0).abs() < 1e-3);
    }

    #[test]
    fn test_swim_speed_capped() {
        let scene = pool();
        let ctx = scene.context();
        let mut movement = swimmer(&scene, Vec3::new(0.0, 0.0, 200.0));
        for _ in 0..60 {
            movement.tick(Vec3::X, DT, &ctx).unwrap();
        }
        assert!(movement.velocity.x > 250.0);
        assert!(movement.velocity.length() <= 300.0 + 1e-2);
    }

    #[test]
    fn test_swimming_up_stops_at_surface() {
        let scene = pool();
        let ctx = scene.context();
        let mut movement = swimmer(&scene, Vec3::new(0.0, 0.0, 300.0));
        for _ in 0..180 {
            movement.tick(Vec3::Z, DT, &ctx).unwrap();
        }
        // Never climbs meaningfully past the surface on its own
        assert!(movement.location.z < 400.0 + 60.0);
        assert!(movement.location.z > 300.0);
    }

    #[test]
    fn test_falling_into_water_starts_swimming() {
        let scene = pool();
        let ctx = scene.context();
        let mut movement = CharacterMovement::new(MovementConfig::default(), Vec3::new(0.0, 0.0, 600.0));
        movement.set_default_movement_mode(&ctx);
        assert_eq!(movement.mode(), MovementMode::Falling);
        for _ in 0..60 {
            movement.tick(Vec3::ZERO, DT, &ctx).unwrap();
        }
        assert_eq!(movement.mode(), MovementMode::Swimming);
        // Water friction and buoyancy slow the dive well below free fall
        assert!(movement.velocity.z > -800.0);
        assert!(movement.location.z > 100.0);
    }

    #[test]
    fn test_water_line_between_points() {
        let scene = pool();
        let ctx = scene.context();
        let movement = swimmer(&scene, Vec3::new(0.0, 0.0, 200.0));
        let line = movement.find_water_line(Vec3::new(0.0, 0.0, 300.0), Vec3::new(0.0, 0.0, 500.0), &ctx);
        // Swimming, so nudged just under the surface
        assert!((line.z - 399.9).abs() < 0.01);
        let dry = movement.find_water_line(Vec3::new(0.0, 0.0, 500.0), Vec3::new(0.0, 0.0, 600.0), &ctx);
        assert_eq!(dry, Vec3::new(0.0, 0.0, 600.0));
    }
}
