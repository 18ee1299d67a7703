//! Swept moves, penetration resolution and sliding along surfaces.

use bevy::prelude::*;

use super::{CharacterMovement, MovementMode};
use crate::constants::{
    KINDA_SMALL_NUMBER, MIN_FLOOR_DIST, PENETRATION_PULLBACK_DISTANCE, SAME_WALL_NUDGE,
    SWEEP_PULLBACK_DISTANCE,
};
use crate::geometry::{HitResult, MoveContext};
use crate::rotator::Rotator;

/// Overlap tests on resolution targets use a slightly fatter capsule
const OVERLAP_INFLATION: f32 = 0.1;

impl CharacterMovement {
    /// Moves by `delta`, stopping short of the first blocking hit.
    ///
    /// The hit time is pulled back from the contact so the capsule never
    /// rests exactly on a surface; the hit location stays at the contact.
    pub fn move_updated_component(&mut self, delta: Vec3, rotation: Rotator, ctx: &MoveContext) -> (bool, HitResult) {
        self.rotation = rotation;
        let start = self.location;
        let end = start + delta;
        if delta.length_squared() <= KINDA_SMALL_NUMBER * KINDA_SMALL_NUMBER {
            return (true, HitResult::miss(start, end));
        }

        let mut hit = ctx.geometry.sweep(&self.capsule(), start, end);
        if hit.blocking_hit && hit.start_penetrating {
            return (false, hit);
        }
        if hit.blocking_hit {
            let dist = delta.length();
            let time_back = SWEEP_PULLBACK_DISTANCE.clamp(SWEEP_PULLBACK_DISTANCE / dist, 1.0 / dist) + 0.001;
            hit.time = (hit.time - time_back).clamp(0.0, 1.0);
        }
        self.location = start + delta * hit.time;
        self.refresh_physics_volume(ctx);
        (hit.time > 0.0, hit)
    }

    /// Places the capsule without sweeping
    pub(crate) fn set_location_unswept(&mut self, location: Vec3, ctx: &MoveContext) {
        self.location = location;
        self.refresh_physics_volume(ctx);
    }

    /// [`Self::move_updated_component`] that first tries to escape a starting penetration
    pub fn safe_move_updated_component(&mut self, delta: Vec3, rotation: Rotator, ctx: &MoveContext) -> HitResult {
        let (_, mut hit) = self.move_updated_component(delta, rotation, ctx);
        if hit.start_penetrating {
            let adjustment = self.penetration_adjustment(&hit);
            if self.resolve_penetration(adjustment, &hit, rotation, ctx) {
                let (_, retry) = self.move_updated_component(delta, rotation, ctx);
                hit = retry;
            }
        }
        hit
    }

    /// Minimal push out of the geometry in `hit`, capped at `max_depenetration`
    pub fn penetration_adjustment(&self, hit: &HitResult) -> Vec3 {
        if !hit.start_penetrating {
            return Vec3::ZERO;
        }
        let push = hit.normal * (hit.penetration_depth + PENETRATION_PULLBACK_DISTANCE);
        push.clamp_length_max(self.config.max_depenetration)
    }

    /// Tries to move out of penetration; returns whether the capsule moved
    pub fn resolve_penetration(
        &mut self,
        adjustment: Vec3,
        hit: &HitResult,
        rotation: Rotator,
        ctx: &MoveContext,
    ) -> bool {
        if adjustment.length_squared() <= f32::EPSILON {
            return false;
        }
        tracing::debug!(?adjustment, depth = hit.penetration_depth, "resolving penetration");

        // Teleport straight there if the spot is clear
        let inflated = self.capsule().shrunk(-OVERLAP_INFLATION, -OVERLAP_INFLATION);
        let target = hit.trace_start + adjustment;
        if !ctx.geometry.overlap_test(&inflated, target) {
            self.rotation = rotation;
            self.set_location_unswept(self.location + adjustment, ctx);
            self.just_teleported = true;
            return true;
        }

        // Otherwise sweep as far out as we can
        let (mut moved, sweep_out) = self.move_updated_component(adjustment, rotation, ctx);
        if !moved && sweep_out.start_penetrating {
            // Combine both push directions to escape two surfaces at once
            let second = self.penetration_adjustment(&sweep_out);
            let combined = adjustment + second;
            if second != adjustment && combined.length_squared() > f32::EPSILON {
                moved = self.move_updated_component(combined, rotation, ctx).0;
            }
        }
        if !moved {
            let move_delta = hit.trace_end - hit.trace_start;
            if move_delta.length_squared() > f32::EPSILON {
                moved = self.move_updated_component(adjustment + move_delta, rotation, ctx).0;
            }
        }
        self.just_teleported |= moved;
        moved
    }

    /// Slides `delta` along the plane of `normal`, preventing slope boosting while falling
    pub fn compute_slide_vector(&self, delta: Vec3, time: f32, normal: Vec3) -> Vec3 {
        let result = plane_slide(delta, time, normal);
        if self.is_falling() {
            self.handle_slope_boosting(result, delta, time, normal)
        } else {
            result
        }
    }

    /// Limits a slide so it never climbs higher than the original move intended
    fn handle_slope_boosting(&self, slide: Vec3, delta: Vec3, time: f32, normal: Vec3) -> Vec3 {
        let mut result = slide;
        if result.z > 0.0 {
            let z_limit = delta.z * time;
            if result.z - z_limit > KINDA_SMALL_NUMBER {
                if z_limit > 0.0 {
                    // Rescale the whole vector so the direction is kept
                    result *= z_limit / result.z;
                } else {
                    // Heading down but deflecting up: drop the deflection
                    result = Vec3::ZERO;
                }
                // Keep the rest of the slide horizontal along the wall
                let remainder = (slide - result) * Vec3::new(1.0, 1.0, 0.0);
                result += plane_slide(remainder, 1.0, normal_2d(normal));
            }
        }
        result
    }

    /// Adjusts `delta` after hitting a second wall, given the first wall's normal
    pub fn two_wall_adjust(&self, delta: &mut Vec3, hit: &HitResult, old_hit_normal: Vec3, ctx: &MoveContext) {
        let in_delta = *delta;
        let normal = hit.normal;

        if old_hit_normal.dot(normal) <= 0.0 {
            // 90 degrees or tighter: travel along the crease
            let desired = *delta;
            let dir = normal.cross(old_hit_normal).normalize_or_zero();
            *delta = dir * delta.dot(dir) * (1.0 - hit.time);
            if desired.dot(*delta) < 0.0 {
                *delta = -*delta;
            }
        } else {
            let desired = *delta;
            *delta = self.compute_slide_vector(*delta, 1.0 - hit.time, normal);
            if delta.dot(desired) <= 0.0 {
                *delta = Vec3::ZERO;
            } else if (normal.dot(old_hit_normal) - 1.0).abs() < KINDA_SMALL_NUMBER {
                // Same wall again after sliding along it; nudge away
                *delta += normal * SAME_WALL_NUDGE;
            }
        }

        if self.is_moving_on_ground() {
            if delta.z > 0.0 {
                // Slide up walkable surfaces only; unwalkable ones act as vertical barriers
                if (hit.normal.z >= self.config.walkable_floor_z || self.is_walkable(hit, ctx))
                    && hit.normal.z > KINDA_SMALL_NUMBER
                {
                    let time = 1.0 - hit.time;
                    let scaled = delta.normalize_or_zero() * in_delta.length();
                    *delta = Vec3::new(in_delta.x, in_delta.y, scaled.z / hit.normal.z) * time;
                    // Never rise more than a step; lose horizontal speed instead
                    if delta.z > self.config.max_step_height {
                        *delta *= self.config.max_step_height / delta.z;
                    }
                } else {
                    delta.z = 0.0;
                }
            } else if delta.z < 0.0
                && self.current_floor.floor_dist < MIN_FLOOR_DIST
                && self.current_floor.blocking_hit
            {
                // Don't push down into the floor
                delta.z = 0.0;
            }
        }
    }

    /// Moves along the surface in `hit` for the rest of `delta`; returns the fraction of `time` used
    pub fn slide_along_surface(
        &mut self,
        delta: Vec3,
        time: f32,
        in_normal: Vec3,
        hit: &mut HitResult,
        ctx: &MoveContext,
    ) -> f32 {
        if !hit.blocking_hit {
            return 0.0;
        }
        let mut normal = in_normal;
        if self.is_moving_on_ground() {
            if normal.z > 0.0 {
                // Don't get pushed up unwalkable surfaces
                if !self.is_walkable(hit, ctx) {
                    normal = normal_2d(normal);
                }
            } else if normal.z < -KINDA_SMALL_NUMBER
                && self.current_floor.floor_dist < MIN_FLOOR_DIST
                && self.current_floor.blocking_hit
            {
                // Upper-capsule impact: don't push down into the floor
                let floor_normal = self.current_floor.hit.normal;
                let floor_opposed = delta.dot(floor_normal) < 0.0 && floor_normal.z < 1.0 - 1.0e-5;
                if floor_opposed {
                    normal = floor_normal;
                }
                normal = normal_2d(normal);
            }
        }

        let old_hit_normal = normal;
        let mut slide = self.compute_slide_vector(delta, time, normal);
        if slide.dot(delta) <= 0.0 {
            return 0.0;
        }

        let rotation = self.rotation;
        *hit = self.safe_move_updated_component(slide, rotation, ctx);
        let first_hit_percent = hit.time;
        let mut percent_applied = first_hit_percent;

        if hit.is_valid_blocking_hit() {
            self.two_wall_adjust(&mut slide, hit, old_hit_normal, ctx);
            // Only continue if the adjusted slide still goes our way
            if !slide.abs_diff_eq(Vec3::ZERO, 1.0e-3) && slide.dot(delta) > 0.0 {
                *hit = self.safe_move_updated_component(slide, rotation, ctx);
                percent_applied += hit.time * (1.0 - first_hit_percent);
            }
        }
        percent_applied.clamp(0.0, 1.0)
    }

    /// Recomputes the water flag; crossing a water boundary switches between swimming and falling
    pub(crate) fn refresh_physics_volume(&mut self, ctx: &MoveContext) {
        let water = ctx.geometry.physics_volume(self.location).water;
        if water == self.in_water {
            return;
        }
        self.in_water = water;
        if water {
            if self.config.can_swim && !self.is_swimming() && self.mode != MovementMode::None {
                tracing::debug!(location = ?self.location, "entered water");
                self.set_movement_mode(MovementMode::Swimming, ctx);
            }
        } else if self.is_swimming() {
            tracing::debug!(location = ?self.location, "left water");
            self.set_movement_mode(MovementMode::Falling, ctx);
        }
    }
}

/// `delta` with its component along `normal` removed, scaled by `time`
pub(crate) fn plane_slide(delta: Vec3, time: f32, normal: Vec3) -> Vec3 {
    (delta - normal * delta.dot(normal)) * time
}

/// Horizontal part of `v`, normalized
pub(crate) fn normal_2d(v: Vec3) -> Vec3 {
    Vec3::new(v.x, v.y, 0.0).normalize_or_zero()
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::geometry::MovementScene;

    #[test]
    fn test_plane_slide() {
        let slide = plane_slide(Vec3::new(10.0, 0.0, -10.0), 1.0, Vec3::Z);
        assert_eq!(slide, Vec3::new(10.0, 0.0, 0.0));
        let half = plane_slide(Vec3::new(10.0, 5.0, 0.0), 0.5, Vec3::NEG_X);
        assert!((half - Vec3::new(0.0, 2.5, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_move_stops_short_of_wall() {
        let mut scene = flat_scene();
        scene.add_box(Vec3::new(100.0, 0.0, 100.0), Vec3::new(10.0, 200.0, 100.0));
        let ctx = scene.context();
        let mut movement = standing(&scene, 0.0, 0.0);
        let rotation = movement.rotation;
        let (moved, hit) = movement.move_updated_component(Vec3::X * 100.0, rotation, &ctx);
        assert!(moved);
        assert!(hit.is_valid_blocking_hit());
        // Wall face at 90, capsule radius 34
        assert!(movement.location.x < 56.0);
        assert!(movement.location.x > 54.5);
        assert!((hit.location.x - 56.0).abs() < 0.01);
    }

    #[test]
    fn test_safe_move_escapes_penetration() {
        let scene = flat_scene();
        let ctx = scene.context();
        let mut movement = standing(&scene, 0.0, 0.0);
        movement.location.z = 80.0;
        let rotation = movement.rotation;
        let hit = movement.safe_move_updated_component(Vec3::X * 10.0, rotation, &ctx);
        assert!(!hit.start_penetrating);
        assert!(movement.location.z >= 88.0);
        assert!((movement.location.x - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_penetration_adjustment_is_capped() {
        let movement = CharacterMovement::default();
        let hit = HitResult {
            blocking_hit: true,
            start_penetrating: true,
            normal: Vec3::Z,
            penetration_depth: 500.0,
            ..HitResult::default()
        };
        let adjust = movement.penetration_adjustment(&hit);
        assert!((adjust.length() - movement.config.max_depenetration).abs() < 1e-3);
    }

    #[test]
    fn test_slide_along_wall_keeps_tangent_motion() {
        let mut scene = flat_scene();
        scene.add_box(Vec3::new(60.0, 0.0, 100.0), Vec3::new(10.0, 500.0, 100.0));
        let ctx = scene.context();
        let mut movement = standing(&scene, 0.0, 0.0);
        let start = movement.location;
        let delta = Vec3::new(50.0, 50.0, 0.0);
        let rotation = movement.rotation;
        let (_, mut hit) = movement.move_updated_component(delta, rotation, &ctx);
        assert!(hit.is_valid_blocking_hit());
        let normal = hit.normal;
        let remaining = 1.0 - hit.time;
        let applied = movement.slide_along_surface(delta, remaining, normal, &mut hit, &ctx);
        assert!(applied > 0.0);
        assert!(movement.location.y > start.y + 40.0);
        assert!(movement.location.x < 16.0);
    }

    #[test]
    fn test_two_wall_corner_stops_motion_into_corner() {
        let scene = MovementScene::new();
        let ctx = scene.context();
        let movement = CharacterMovement::default();
        let mut delta = Vec3::new(10.0, 10.0, 0.0);
        let hit = hit_with_normal(Vec3::NEG_Y);
        movement.two_wall_adjust(&mut delta, &hit, Vec3::NEG_X, &ctx);
        // Corner crease runs vertically, so nothing horizontal survives
        assert!(delta.truncate().length() < 1e-4);
    }

    #[test]
    fn test_slope_boosting_limited_while_falling() {
        let scene = flat_scene();
        let ctx = scene.context();
        let mut movement = standing(&scene, 0.0, 0.0);
        movement.set_movement_mode(MovementMode::Falling, &ctx);
        // Falling straight down onto a 45 degree slope would deflect upward
        let normal = Vec3::new(-1.0, 0.0, 1.0).normalize();
        let slide = movement.compute_slide_vector(Vec3::new(10.0, 0.0, -1.0), 1.0, normal);
        assert!(slide.z <= 1.0e-4);
    }

    #[test]
    fn test_entering_water_switches_to_swimming() {
        let mut scene = flat_scene();
        scene.add_water(Vec3::new(100.0, -500.0, 0.0), Vec3::new(1000.0, 500.0, 300.0), 0.3);
        let ctx = scene.context();
        let mut movement = standing(&scene, 0.0, 0.0);
        let rotation = movement.rotation;
        movement.move_updated_component(Vec3::X * 150.0, rotation, &ctx);
        assert_eq!(movement.mode(), MovementMode::Swimming);
    }
}
