//! Climbing over low obstacles.

use bevy::prelude::*;

use super::{CharacterMovement, FindFloorResult};
use crate::constants::{MAX_FLOOR_DIST, MAX_STEP_SIDE_Z};
use crate::geometry::{HitResult, MoveContext};

/// Floor found at the end of a successful step up
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepDownResult {
    /// `floor` is valid and need not be recomputed
    pub computed_floor: bool,
    pub floor: FindFloorResult,
}

impl CharacterMovement {
    /// Whether the surface in `hit` may be stepped onto
    pub fn can_step_up(&self, hit: &HitResult, ctx: &MoveContext) -> bool {
        if !hit.is_valid_blocking_hit() || self.is_falling() {
            return false;
        }
        // Hits without a surface, or on one that is gone, are allowed
        hit.component
            .and_then(|h| ctx.bases.resolve(h))
            .map(|surface| surface.can_step_up_on)
            .unwrap_or(true)
    }

    /// Attempts to climb the obstacle in `hit` while moving by `delta`:
    /// up by the step height, forward, then back down onto a floor.
    ///
    /// On failure the character is restored to where it started and `None`
    /// is returned.
    pub fn step_up(&mut self, delta: Vec3, hit: &HitResult, ctx: &MoveContext) -> Option<StepDownResult> {
        let max_step = self.config.max_step_height;
        if max_step <= 0.0 || !self.can_step_up(hit, ctx) {
            return None;
        }
        let old_location = self.location;
        let radius = self.radius();
        let half_height = self.half_height;

        // Don't step up if the top of the capsule is what hit
        let initial_impact_z = hit.impact_point.z;
        if initial_impact_z > old_location.z + (half_height - radius) {
            return None;
        }

        let mut step_travel_up = max_step;
        let mut step_travel_down = max_step;
        let step_side_z = hit.impact_normal.z;
        let mut initial_floor_base_z = old_location.z - half_height;
        let mut floor_point_z = initial_floor_base_z;

        if self.is_moving_on_ground() && self.current_floor.is_walkable_floor() {
            // We float above the floor, so measure the step from the real contact
            let floor_dist = self.current_floor.distance_to_floor().max(0.0);
            initial_floor_base_z -= floor_dist;
            step_travel_up = (step_travel_up - floor_dist).max(0.0);
            step_travel_down = max_step + MAX_FLOOR_DIST * 2.0;

            let hit_vertical_face = !self.is_within_edge_tolerance(hit.location, hit.impact_point, radius);
            if !self.current_floor.line_trace && !hit_vertical_face {
                floor_point_z = self.current_floor.hit.impact_point.z;
            } else {
                floor_point_z -= self.current_floor.floor_dist;
            }
        }

        // Impact below our feet is not a step
        if initial_impact_z <= initial_floor_base_z {
            return None;
        }

        let rotation = self.rotation;
        let revert = |movement: &mut CharacterMovement, reason: &str| {
            tracing::trace!(reason, "step up rejected");
            movement.set_location_unswept(old_location, ctx);
            None
        };

        // Up, treating the obstacle as a vertical wall
        let (_, up_hit) = self.move_updated_component(Vec3::Z * step_travel_up, rotation, ctx);
        if up_hit.start_penetrating {
            return revert(self, "penetrating on the way up");
        }

        // Forward
        let (_, mut forward_hit) = self.move_updated_component(delta, rotation, ctx);
        if forward_hit.blocking_hit {
            if forward_hit.start_penetrating {
                return revert(self, "penetrating on the way forward");
            }
            if self.is_falling() {
                return Some(StepDownResult::default());
            }
            let forward_time = forward_hit.time;
            let normal = forward_hit.normal;
            let slide = self.slide_along_surface(delta, 1.0 - forward_time, normal, &mut forward_hit, ctx);
            if self.is_falling() {
                return revert(self, "fell while sliding");
            }
            // Neither the move nor the deflection got anywhere
            if forward_time == 0.0 && slide == 0.0 {
                return revert(self, "blocked above the step");
            }
        }

        // Down onto whatever is there
        let (_, down_hit) = self.move_updated_component(Vec3::NEG_Z * step_travel_down, rotation, ctx);
        if down_hit.start_penetrating {
            return revert(self, "penetrating on the way down");
        }

        let mut result = StepDownResult::default();
        if down_hit.is_valid_blocking_hit() {
            let delta_z = down_hit.impact_point.z - floor_point_z;
            if delta_z > max_step {
                return revert(self, "step too high");
            }

            if !self.is_walkable(&down_hit, ctx) {
                // Unwalkable ground facing us, or higher than where we started
                if delta.dot(down_hit.impact_normal) < 0.0 {
                    return revert(self, "unwalkable surface faces the move");
                }
                if down_hit.location.z > old_location.z {
                    return revert(self, "unwalkable surface above start");
                }
            }

            // Consistent with the floor query's edge rejection
            if !self.is_within_edge_tolerance(down_hit.location, down_hit.impact_point, radius) {
                return revert(self, "landed on the capsule rim");
            }

            if delta_z > 0.0 && !self.can_step_up(&down_hit, ctx) {
                return revert(self, "surface can't be stepped on");
            }

            let location = self.location;
            result.floor = self.find_floor(location, false, Some(&down_hit), ctx);
            // A real stair we cannot perch on: slide along it instead
            if down_hit.location.z > old_location.z
                && !result.floor.blocking_hit
                && step_side_z < MAX_STEP_SIDE_Z
            {
                return revert(self, "no floor on top of the step");
            }
            result.computed_floor = true;
        }

        // The height change must not feed into velocity
        self.just_teleported |= !self.config.maintain_horizontal_ground_velocity;
        tracing::trace!(from = ?old_location, to = ?self.location, "stepped up");
        Some(result)
    }
}
