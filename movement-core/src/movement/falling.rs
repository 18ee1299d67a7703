//! Falling: gravity, air control, deflection and landing.

use bevy::prelude::*;

use super::{CharacterMovement, MovementEvent, MovementMode};
use crate::constants::{KINDA_SMALL_NUMBER, MIN_TICK_TIME, VERTICAL_SLOPE_NORMAL_Z};
use crate::geometry::{HitResult, MoveContext};

impl CharacterMovement {
    pub(crate) fn phys_falling(&mut self, delta_time: f32, mut iterations: u32, ctx: &MoveContext) {
        if delta_time < MIN_TICK_TIME {
            return;
        }
        let fall_acceleration = self.falling_lateral_acceleration(delta_time);
        let limited_air_control = fall_acceleration.truncate().length_squared() > 0.0;
        let gravity = self.gravity_vector();

        let mut remaining_time = delta_time;
        while remaining_time >= MIN_TICK_TIME && iterations < self.config.substep.max_simulation_iterations {
            iterations += 1;
            let time_tick = self.simulation_time_step(remaining_time, iterations);
            remaining_time -= time_tick;

            let old_location = self.location;
            let rotation = self.rotation;
            self.just_teleported = false;
            let old_velocity = self.velocity;
            let max_decel = self.max_braking_deceleration();

            // Lateral velocity from air control only
            let saved_acceleration = self.acceleration;
            self.acceleration = fall_acceleration;
            self.velocity.z = 0.0;
            self.calc_velocity(time_tick, self.config.falling_lateral_friction, false, max_decel, ctx);
            self.velocity.z = old_velocity.z;
            self.acceleration = saved_acceleration;

            self.velocity = self.new_fall_velocity(self.velocity, gravity, time_tick, ctx);

            // Midpoint integration
            let mut adjusted = (old_velocity + self.velocity) * 0.5 * time_tick;
            let mut hit = self.safe_move_updated_component(adjusted, rotation, ctx);

            let mut last_move_time_slice = time_tick;
            let mut sub_time_remaining = time_tick * (1.0 - hit.time);

            if self.is_swimming() {
                remaining_time += sub_time_remaining;
                self.start_swimming(old_location, old_velocity, time_tick, remaining_time, iterations, ctx);
                return;
            }
            if !hit.blocking_hit {
                self.zero_tiny_lateral_velocity();
                continue;
            }

            let location = self.location;
            if self.is_valid_landing_spot(location, &hit, ctx) {
                remaining_time += sub_time_remaining;
                self.process_landed(&hit, remaining_time, iterations, ctx);
                return;
            }

            // Deflect with the full end-of-step velocity so all of gravity shows up in the slide
            adjusted = self.velocity * time_tick;

            // An edge under the lower hemisphere may still have walkable ground on top
            if !hit.start_penetrating && self.should_check_for_valid_landing_spot(&hit) {
                let floor = self.find_floor(location, false, None, ctx);
                if floor.is_walkable_floor() && self.is_valid_landing_spot(location, &floor.hit, ctx) {
                    remaining_time += sub_time_remaining;
                    self.process_landed(&floor.hit, remaining_time, iterations, ctx);
                    return;
                }
            }
            if !self.is_falling() {
                return;
            }

            // Deflect as if air control had been limited by what we hit
            let mut velocity_no_air_control = old_velocity;
            let mut air_control_accel = self.acceleration;
            if limited_air_control {
                let saved_velocity = self.velocity;
                let saved_acceleration = self.acceleration;
                self.acceleration = Vec3::ZERO;
                self.velocity = Vec3::new(old_velocity.x, old_velocity.y, 0.0);
                self.calc_velocity(time_tick, self.config.falling_lateral_friction, false, max_decel, ctx);
                let lateral = Vec3::new(self.velocity.x, self.velocity.y, old_velocity.z);
                self.velocity = saved_velocity;
                self.acceleration = saved_acceleration;
                velocity_no_air_control = self.new_fall_velocity(lateral, gravity, time_tick, ctx);

                air_control_accel = (self.velocity - velocity_no_air_control) / time_tick;
                let delta_v = self.limit_air_control(air_control_accel, &hit) * last_move_time_slice;
                adjusted = (velocity_no_air_control + delta_v) * last_move_time_slice;
            }

            let old_hit_normal = hit.normal;
            let old_hit_impact_normal = hit.impact_normal;
            let mut delta = self.compute_slide_vector(adjusted, 1.0 - hit.time, old_hit_normal);

            if sub_time_remaining > KINDA_SMALL_NUMBER && !self.just_teleported {
                self.velocity = delta / sub_time_remaining;
            }

            if sub_time_remaining > KINDA_SMALL_NUMBER && delta.dot(adjusted) > 0.0 {
                hit = self.safe_move_updated_component(delta, rotation, ctx);
                if hit.blocking_hit {
                    // Second wall
                    last_move_time_slice = sub_time_remaining;
                    sub_time_remaining *= 1.0 - hit.time;

                    let location = self.location;
                    if self.is_valid_landing_spot(location, &hit, ctx) {
                        remaining_time += sub_time_remaining;
                        self.process_landed(&hit, remaining_time, iterations, ctx);
                        return;
                    }
                    if !self.is_falling() {
                        return;
                    }

                    if limited_air_control && hit.normal.z > VERTICAL_SLOPE_NORMAL_Z {
                        let last_move_no_air_control = velocity_no_air_control * last_move_time_slice;
                        delta = self.compute_slide_vector(last_move_no_air_control, 1.0, old_hit_normal);
                    }

                    self.two_wall_adjust(&mut delta, &hit, old_hit_normal, ctx);

                    // Air control may still slide along the second wall, but not back into the first
                    if limited_air_control {
                        let delta_v = self.limit_air_control(air_control_accel, &hit) * sub_time_remaining;
                        if delta_v.dot(old_hit_normal) > 0.0 {
                            delta += delta_v * sub_time_remaining;
                        }
                    }

                    if sub_time_remaining > KINDA_SMALL_NUMBER && !self.just_teleported {
                        self.velocity = delta / sub_time_remaining;
                    }

                    // Straddling two slopes, neither standable
                    let ditch = old_hit_impact_normal.z > 0.0
                        && hit.impact_normal.z > 0.0
                        && delta.z.abs() <= KINDA_SMALL_NUMBER
                        && hit.impact_normal.dot(old_hit_impact_normal) < 0.0;
                    hit = self.safe_move_updated_component(delta, rotation, ctx);
                    if hit.time == 0.0 {
                        // Stuck; try to side step
                        let mut side = Vec3::new(
                            old_hit_normal.x + hit.impact_normal.x,
                            old_hit_normal.y + hit.impact_normal.y,
                            0.0,
                        )
                        .normalize_or_zero();
                        if side.abs_diff_eq(Vec3::ZERO, KINDA_SMALL_NUMBER) {
                            side = Vec3::new(old_hit_normal.y, -old_hit_normal.x, 0.0).normalize_or_zero();
                        }
                        hit = self.safe_move_updated_component(side, rotation, ctx);
                    }

                    let location = self.location;
                    if ditch || self.is_valid_landing_spot(location, &hit, ctx) || hit.time == 0.0 {
                        self.process_landed(&hit, 0.0, iterations, ctx);
                        return;
                    } else if self.perch_radius_threshold() > 0.0
                        && hit.time == 1.0
                        && old_hit_impact_normal.z >= self.config.walkable_floor_z
                    {
                        // A virtual ditch inside the perch radius: hop out of it
                        let z_moved = (self.location.z - old_location.z).abs();
                        let moved_2d_sq = (self.location - old_location).truncate().length_squared();
                        if z_moved <= 0.2 * time_tick && moved_2d_sq <= 4.0 * time_tick {
                            self.velocity.z = (self.config.jump_z_velocity * 0.25).max(1.0);
                            let hop = self.velocity * time_tick;
                            self.safe_move_updated_component(hop, rotation, ctx);
                        }
                    }
                }
            }

            self.zero_tiny_lateral_velocity();
        }
    }

    fn zero_tiny_lateral_velocity(&mut self) {
        if self.velocity.truncate().length_squared() <= KINDA_SMALL_NUMBER * 10.0 {
            self.velocity.x = 0.0;
            self.velocity.y = 0.0;
        }
    }

    /// Horizontal input acceleration scaled by air control
    pub fn falling_lateral_acceleration(&self, _delta_time: f32) -> Vec3 {
        let mut fall_acceleration = Vec3::new(self.acceleration.x, self.acceleration.y, 0.0);
        if fall_acceleration.truncate().length_squared() > 0.0 {
            fall_acceleration *= self.boosted_air_control();
            fall_acceleration = fall_acceleration.clamp_length_max(self.config.max_acceleration);
        }
        fall_acceleration
    }

    /// Air control, boosted while nearly stationary so small hops stay steerable
    fn boosted_air_control(&self) -> f32 {
        let air_control = self.config.air_control;
        let threshold = self.config.air_control_boost_velocity_threshold;
        let multiplier = self.config.air_control_boost_multiplier;
        if air_control != 0.0 && multiplier > 0.0 && self.velocity.truncate().length_squared() < threshold * threshold {
            (multiplier * air_control).min(1.0)
        } else {
            air_control
        }
    }

    /// Stops air control pushing into a surface we just hit
    pub fn limit_air_control(&self, fall_acceleration: Vec3, hit: &HitResult) -> Vec3 {
        if hit.is_valid_blocking_hit() && hit.normal.z > VERTICAL_SLOPE_NORMAL_Z {
            if fall_acceleration.dot(hit.normal) < 0.0 {
                // Parallel to the wall only; pushing into it could lift us
                let normal_2d = Vec3::new(hit.normal.x, hit.normal.y, 0.0).normalize_or_zero();
                return fall_acceleration - normal_2d * fall_acceleration.dot(normal_2d);
            }
        } else if hit.start_penetrating {
            return if fall_acceleration.dot(hit.normal) > 0.0 {
                fall_acceleration
            } else {
                Vec3::ZERO
            };
        }
        fall_acceleration
    }

    /// An edge under the lower hemisphere may hide walkable ground on top of it
    fn should_check_for_valid_landing_spot(&self, hit: &HitResult) -> bool {
        hit.normal.z > KINDA_SMALL_NUMBER
            && !hit.normal.abs_diff_eq(hit.impact_normal, KINDA_SMALL_NUMBER)
            && self.is_within_edge_tolerance(self.location, hit.impact_point, self.radius())
    }

    /// Whether `hit` is something the capsule at `capsule_location` can land on
    pub fn is_valid_landing_spot(&mut self, capsule_location: Vec3, hit: &HitResult, ctx: &MoveContext) -> bool {
        if !hit.blocking_hit {
            return false;
        }
        if !hit.start_penetrating {
            if !self.is_walkable(hit, ctx) {
                return false;
            }
            // Hits above the lower hemisphere come from sliding down a wall
            let lower_hemisphere_z = hit.location.z - self.half_height + self.radius();
            if hit.impact_point.z >= lower_hemisphere_z {
                return false;
            }
            if !self.is_within_edge_tolerance(hit.location, hit.impact_point, self.radius()) {
                return false;
            }
        } else if hit.normal.z < KINDA_SMALL_NUMBER {
            // Pushed sideways out of a wall; don't pop onto the floor
            return false;
        }
        self.find_floor(capsule_location, false, Some(hit), ctx).is_walkable_floor()
    }

    /// Lands: the ground mode takes over and spends the remaining time
    pub(crate) fn process_landed(&mut self, hit: &HitResult, remaining_time: f32, iterations: u32, ctx: &MoveContext) {
        tracing::debug!(impact = ?hit.impact_point, velocity = ?self.velocity, "landed");
        self.notify(MovementEvent::Landed {
            impact_point: hit.impact_point,
            impact_normal: hit.impact_normal,
        });
        if self.is_falling() {
            if self.config.can_swim && self.in_water {
                self.set_movement_mode(MovementMode::Swimming, ctx);
            } else {
                self.set_movement_mode(MovementMode::Walking, ctx);
            }
        }
        self.start_new_physics(remaining_time, iterations, ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::MovementConfig;
    use crate::geometry::MovementScene;

    const DT: f32 = 1.0 / 60.0;

    fn airborne(scene: &MovementScene, z: f32) -> CharacterMovement {
        let mut movement = CharacterMovement::new(MovementConfig::default(), Vec3::new(0.0, 0.0, z));
        movement.set_default_movement_mode(&scene.context());
        assert_eq!(movement.mode(), MovementMode::Falling);
        movement
    }

    #[test]
    fn test_free_fall_follows_gravity() {
        let scene = MovementScene::new();
        let ctx = scene.context();
        let mut movement = airborne(&scene, 2000.0);
        for _ in 0..30 {
            movement.tick(Vec3::ZERO, DT, &ctx).unwrap();
        }
        // Midpoint integration is exact under constant gravity
        assert!((movement.velocity.z + 490.0).abs() < 0.1);
        assert!((movement.location.z - (2000.0 - 122.5)).abs() < 0.1);
        assert_eq!(movement.velocity.x, 0.0);
    }

    #[test]
    fn test_fall_lands_on_floor() {
        let scene = flat_scene();
        let ctx = scene.context();
        let mut movement = airborne(&scene, 300.0);
        let mut landed = false;
        for _ in 0..60 {
            movement.tick(Vec3::ZERO, DT, &ctx).unwrap();
            landed |= movement
                .drain_events()
                .iter()
                .any(|e| matches!(e, MovementEvent::Landed { .. }));
        }
        assert!(landed);
        assert_eq!(movement.mode(), MovementMode::Walking);
        assert_eq!(movement.velocity.z, 0.0);
        assert!((movement.location.z - 90.15).abs() < 0.3);
    }

    #[test]
    fn test_air_control_is_limited() {
        let scene = MovementScene::new();
        let ctx = scene.context();
        let mut movement = airborne(&scene, 5000.0);
        for _ in 0..30 {
            movement.tick(Vec3::X, DT, &ctx).unwrap();
        }
        // Air control 0.05 of 2048, boosted to 0.1 only while nearly still
        assert!(movement.velocity.x > 40.0);
        assert!(movement.velocity.x < 0.1 * 2048.0 * 0.5);
        assert_eq!(movement.velocity.y, 0.0);
    }

    #[test]
    fn test_boost_applies_only_when_slow() {
        let mut movement = CharacterMovement::default();
        movement.acceleration = Vec3::X * 2048.0;
        assert!((movement.falling_lateral_acceleration(DT).x - 204.8).abs() < 1e-2);
        movement.velocity = Vec3::X * 100.0;
        assert!((movement.falling_lateral_acceleration(DT).x - 102.4).abs() < 1e-2);
    }

    #[test]
    fn test_long_fall_caps_at_terminal_velocity() {
        let scene = MovementScene::new();
        let ctx = scene.context();
        let mut movement = airborne(&scene, 1.0e6);
        for _ in 0..600 {
            movement.tick(Vec3::ZERO, DT, &ctx).unwrap();
        }
        assert!((movement.velocity.z + 4000.0).abs() < 1.0);
    }

    #[test]
    fn test_air_control_not_into_wall() {
        let movement = CharacterMovement::default();
        let normal = Vec3::new(-1.0, 0.0, 0.5).normalize();
        let mut hit = hit_with_normal(normal);
        hit.start_penetrating = false;
        let limited = movement.limit_air_control(Vec3::X * 100.0, &hit);
        assert!(limited.length() < 1e-3);
        let along = movement.limit_air_control(Vec3::Y * 100.0, &hit);
        assert_eq!(along, Vec3::Y * 100.0);
    }

    #[test]
    fn test_falling_beside_wall_slides_down() {
        let mut scene = flat_scene();
        scene.add_box(Vec3::new(60.0, 0.0, 500.0), Vec3::new(20.0, 500.0, 500.0));
        let ctx = scene.context();
        let mut movement = airborne(&scene, 400.0);
        movement.velocity = Vec3::new(200.0, 0.0, 0.0);
        for _ in 0..90 {
            movement.tick(Vec3::X, DT, &ctx).unwrap();
        }
        assert_eq!(movement.mode(), MovementMode::Walking);
        assert!(movement.location.x <= 40.0 - 34.0 + 0.01);
        assert!((movement.location.z - 90.15).abs() < 0.3);
    }
}
