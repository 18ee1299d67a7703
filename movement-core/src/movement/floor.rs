//! Floor detection: what the capsule stands on and how far above it.

use bevy::prelude::*;

use super::CharacterMovement;
use crate::constants::{
    AVG_FLOOR_DIST, FLOOR_SWEEP_RETRY_SHRINK, FLOOR_SWEEP_SHRINK, KINDA_SMALL_NUMBER, MAX_FLOOR_DIST,
    MIN_FLOOR_DIST, MIN_PERCH_RADIUS, SWEEP_EDGE_REJECT_DISTANCE,
};
use crate::geometry::{Capsule, HitResult, MoveContext};

/// Outcome of a floor query under the capsule
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FindFloorResult {
    /// A valid blocking hit was found (never set for start-penetrating sweeps)
    pub blocking_hit: bool,
    pub walkable_floor: bool,
    /// The floor came from the line trace fallback
    pub line_trace: bool,
    /// Distance from the capsule bottom to the swept floor; negative when penetrating
    pub floor_dist: f32,
    /// Distance from the capsule bottom to the line-traced floor
    pub line_dist: f32,
    pub hit: HitResult,
}

impl FindFloorResult {
    pub fn is_walkable_floor(&self) -> bool {
        self.blocking_hit && self.walkable_floor
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn set_from_sweep(&mut self, hit: &HitResult, sweep_floor_dist: f32, walkable: bool) {
        self.blocking_hit = hit.is_valid_blocking_hit();
        self.walkable_floor = walkable;
        self.line_trace = false;
        self.floor_dist = sweep_floor_dist;
        self.line_dist = 0.0;
        self.hit = *hit;
    }

    /// Takes normal and surface from the line hit, keeping the sweep's placement
    pub fn set_from_line_trace(&mut self, hit: &HitResult, sweep_floor_dist: f32, line_dist: f32, walkable: bool) {
        if self.blocking_hit && hit.blocking_hit {
            let old = self.hit;
            self.hit = HitResult {
                time: old.time,
                impact_point: old.impact_point,
                location: old.location,
                trace_start: old.trace_start,
                trace_end: old.trace_end,
                ..*hit
            };
            self.line_trace = true;
            self.floor_dist = sweep_floor_dist;
            self.line_dist = line_dist;
            self.walkable_floor = walkable;
        }
    }

    pub fn distance_to_floor(&self) -> f32 {
        if self.line_trace {
            self.line_dist
        } else {
            self.floor_dist
        }
    }
}

impl CharacterMovement {
    /// Walkable iff a genuine blocking hit whose impact normal z reaches the walkable threshold
    pub fn is_walkable(&self, hit: &HitResult, ctx: &MoveContext) -> bool {
        if !hit.is_valid_blocking_hit() {
            return false;
        }
        // Never walk up vertical surfaces
        if hit.impact_normal.z < KINDA_SMALL_NUMBER {
            return false;
        }
        let walkable_z = hit
            .component
            .and_then(|h| ctx.bases.resolve(h))
            .and_then(|surface| surface.walkable_floor_z)
            .unwrap_or(self.config.walkable_floor_z);
        hit.impact_normal.z >= walkable_z
    }

    /// Whether `impact_point` lies inside the capsule footprint, away from its rim
    pub fn is_within_edge_tolerance(&self, capsule_location: Vec3, impact_point: Vec3, radius: f32) -> bool {
        let dist_sq = (impact_point - capsule_location).truncate().length_squared();
        let reduced =
            (SWEEP_EDGE_REJECT_DISTANCE + KINDA_SMALL_NUMBER).max(radius - SWEEP_EDGE_REJECT_DISTANCE);
        dist_sq < reduced * reduced
    }

    pub(crate) fn perch_radius_threshold(&self) -> f32 {
        self.config.perch_radius_threshold.max(0.0)
    }

    /// Radius of the narrower capsule used to test standing on a ledge
    pub(crate) fn valid_perch_radius(&self) -> f32 {
        let radius = self.radius();
        (radius - self.perch_radius_threshold()).clamp(MIN_PERCH_RADIUS + 0.01, radius)
    }

    /// Sweeps (then line traces) below `capsule_location` for a floor.
    ///
    /// `downward_sweep` may carry a vertical sweep the caller already made;
    /// if it is usable no new sweep is issued.
    pub fn compute_floor_dist(
        &self,
        capsule_location: Vec3,
        line_distance: f32,
        sweep_distance: f32,
        sweep_radius: f32,
        downward_sweep: Option<&HitResult>,
        ctx: &MoveContext,
    ) -> FindFloorResult {
        let mut out = FindFloorResult::default();
        let pawn_radius = self.radius();
        let pawn_half_height = self.half_height;

        let mut skip_sweep = false;
        if let Some(down) = downward_sweep.filter(|h| h.is_valid_blocking_hit()) {
            let vertical = down.trace_start.z > down.trace_end.z
                && (down.trace_start - down.trace_end).truncate().length_squared() <= KINDA_SMALL_NUMBER;
            if vertical && self.is_within_edge_tolerance(down.location, down.impact_point, pawn_radius) {
                skip_sweep = true;
                let walkable = self.is_walkable(down, ctx);
                let floor_dist = capsule_location.z - down.location.z;
                out.set_from_sweep(down, floor_dist, walkable);
                if walkable {
                    return out;
                }
            }
        }

        // The sweep must reach at least as far as the line trace
        if sweep_distance < line_distance {
            tracing::warn!(sweep_distance, line_distance, "floor sweep shorter than line trace");
            return out;
        }

        let max_penetration_adjust = MAX_FLOOR_DIST.max(pawn_radius);
        if !skip_sweep && sweep_distance > 0.0 && sweep_radius > 0.0 {
            // A shorter capsule avoids odd results when starting on a surface and lets us pull out of penetrations
            let mut shrink_height = (pawn_half_height - pawn_radius) * FLOOR_SWEEP_SHRINK;
            let mut trace_dist = sweep_distance + shrink_height;
            let mut shape = Capsule::new(sweep_radius, pawn_half_height - shrink_height);
            let mut hit = ctx
                .geometry
                .sweep(&shape, capsule_location, capsule_location - Vec3::Z * trace_dist);

            if hit.blocking_hit {
                // Only hits on the bottom of the capsule count; retry narrower if we grazed the side
                if hit.start_penetrating
                    || !self.is_within_edge_tolerance(capsule_location, hit.impact_point, shape.radius)
                {
                    let radius = (shape.radius - SWEEP_EDGE_REJECT_DISTANCE - KINDA_SMALL_NUMBER).max(0.0);
                    if radius > KINDA_SMALL_NUMBER {
                        shrink_height = (pawn_half_height - pawn_radius) * FLOOR_SWEEP_RETRY_SHRINK;
                        trace_dist = sweep_distance + shrink_height;
                        shape = Capsule::new(radius, (pawn_half_height - shrink_height).max(radius));
                        hit = ctx
                            .geometry
                            .sweep(&shape, capsule_location, capsule_location - Vec3::Z * trace_dist);
                    }
                }

                // Negative distances are allowed so the caller can pop out of penetration
                let sweep_result = (hit.time * trace_dist - shrink_height).max(-max_penetration_adjust);
                out.set_from_sweep(&hit, sweep_result, false);
                if hit.is_valid_blocking_hit() && self.is_walkable(&hit, ctx) && sweep_result <= sweep_distance {
                    out.walkable_floor = true;
                    return out;
                }
            }
        }

        // No line trace if the sweep missed everything, unless it was stuck in penetration
        if !out.blocking_hit && !out.hit.start_penetrating {
            out.floor_dist = sweep_distance;
            return out;
        }

        if line_distance > 0.0 {
            let shrink_height = pawn_half_height;
            let trace_dist = line_distance + shrink_height;
            let hit = ctx
                .geometry
                .line_trace(capsule_location, capsule_location - Vec3::Z * trace_dist);
            if hit.blocking_hit && hit.time > 0.0 {
                let line_result = (hit.time * trace_dist - shrink_height).max(-max_penetration_adjust);
                out.blocking_hit = true;
                if line_result <= line_distance && self.is_walkable(&hit, ctx) {
                    let sweep_dist = out.floor_dist;
                    out.set_from_line_trace(&hit, sweep_dist, line_result, true);
                    return out;
                }
            }
        }

        out.walkable_floor = false;
        out.floor_dist = sweep_distance;
        out
    }

    /// Floor under `capsule_location`, with ledge perching.
    ///
    /// With `zero_delta` set on a static base the previous floor is reused
    /// unless `always_check_floor`, a forced check or a teleport says otherwise.
    pub fn find_floor(
        &mut self,
        capsule_location: Vec3,
        zero_delta: bool,
        downward_sweep: Option<&HitResult>,
        ctx: &MoveContext,
    ) -> FindFloorResult {
        let height_check_adjust = if self.is_moving_on_ground() {
            MAX_FLOOR_DIST + KINDA_SMALL_NUMBER
        } else {
            -MAX_FLOOR_DIST
        };
        let sweep_dist = MAX_FLOOR_DIST.max(self.config.max_step_height + height_check_adjust);
        let line_dist = sweep_dist;

        let mut need_to_validate = true;
        let can_use_cached = zero_delta
            && !self.config.always_check_floor
            && !self.force_next_floor_check
            && !self.just_teleported;
        let cached_base_valid = self
            .base
            .map(|b| ctx.bases.is_alive(b) && !ctx.bases.is_dynamic(Some(b)))
            .unwrap_or(false);

        let mut out = if can_use_cached && cached_base_valid {
            need_to_validate = false;
            self.current_floor
        } else {
            self.force_next_floor_check = false;
            self.compute_floor_dist(capsule_location, line_dist, sweep_dist, self.radius(), downward_sweep, ctx)
        };

        if need_to_validate && out.blocking_hit && !out.line_trace && self.should_compute_perch_result(&out.hit, true) {
            let mut max_perch_floor_dist = MAX_FLOOR_DIST.max(self.config.max_step_height + height_check_adjust);
            if self.is_moving_on_ground() {
                max_perch_floor_dist += self.config.perch_additional_height.max(0.0);
            }
            match self.compute_perch_result(self.valid_perch_radius(), &out.hit, max_perch_floor_dist, ctx) {
                Some(perch) => {
                    // Don't let the height adjustment push us past the perch distance
                    let move_up_dist = AVG_FLOOR_DIST - out.floor_dist;
                    if move_up_dist + perch.floor_dist >= max_perch_floor_dist {
                        out.floor_dist = AVG_FLOOR_DIST;
                    }
                    // Unwalkable under the full capsule, but the narrow one can stand
                    if !out.walkable_floor {
                        let floor_dist = out.floor_dist;
                        out.set_from_line_trace(&perch.hit, floor_dist, floor_dist.max(MIN_FLOOR_DIST), true);
                    }
                }
                None => {
                    out.walkable_floor = false;
                }
            }
        }
        out
    }

    pub(crate) fn should_compute_perch_result(&self, hit: &HitResult, check_radius: bool) -> bool {
        if !hit.is_valid_blocking_hit() {
            return false;
        }
        // Tiny perch radii are within the edge tolerance anyway
        if self.perch_radius_threshold() <= SWEEP_EDGE_REJECT_DISTANCE {
            return false;
        }
        if check_radius {
            let dist_sq = (hit.impact_point - hit.location).truncate().length_squared();
            let standing = self.valid_perch_radius();
            if dist_sq <= standing * standing {
                return false;
            }
        }
        true
    }

    /// Floor under a narrower capsule at the hit location, if it is walkable within `max_floor_dist`
    pub(crate) fn compute_perch_result(
        &self,
        test_radius: f32,
        hit: &HitResult,
        max_floor_dist: f32,
        ctx: &MoveContext,
    ) -> Option<FindFloorResult> {
        if max_floor_dist <= 0.0 {
            return None;
        }
        // Sweep further: a narrower capsule can miss what the full one touched
        let hit_above_base = (hit.impact_point.z - (hit.location.z - self.half_height)).max(0.0);
        let perch_line_dist = (max_floor_dist - hit_above_base).max(0.0);
        let perch_sweep_dist = max_floor_dist.max(0.0) + self.radius();

        let perch = self.compute_floor_dist(hit.location, perch_line_dist, perch_sweep_dist, test_radius, None, ctx);
        if !perch.is_walkable_floor() || hit_above_base + perch.floor_dist > max_floor_dist {
            return None;
        }
        Some(perch)
    }

    /// Re-seats the capsule so it floats inside the floor distance band
    pub fn adjust_floor_height(&mut self, ctx: &MoveContext) {
        if !self.current_floor.is_walkable_floor() {
            return;
        }
        let mut old_floor_dist = self.current_floor.floor_dist;
        if self.current_floor.line_trace {
            if old_floor_dist < MIN_FLOOR_DIST && self.current_floor.line_dist >= MIN_FLOOR_DIST {
                // Adjusting here would let us climb unwalkable walls
                return;
            }
            old_floor_dist = self.current_floor.line_dist;
        }

        if (MIN_FLOOR_DIST..=MAX_FLOOR_DIST).contains(&old_floor_dist) {
            return;
        }
        let initial_z = self.location.z;
        let move_dist = AVG_FLOOR_DIST - old_floor_dist;
        let rotation = self.rotation;
        let hit = self.safe_move_updated_component(Vec3::Z * move_dist, rotation, ctx);

        if !hit.is_valid_blocking_hit() {
            self.current_floor.floor_dist += move_dist;
        } else if move_dist > 0.0 {
            self.current_floor.floor_dist += self.location.z - initial_z;
        } else {
            self.current_floor.floor_dist = self.location.z - hit.location.z;
            if self.is_walkable(&hit, ctx) {
                let dist = self.current_floor.floor_dist;
                self.current_floor.set_from_sweep(&hit, dist, true);
            }
        }
        if self.current_floor.line_trace {
            self.current_floor.line_dist = self.current_floor.floor_dist;
        }

        // Height changes (and depenetration) must not feed into velocity
        self.just_teleported |= !self.config.maintain_horizontal_ground_velocity || old_floor_dist < 0.0;
        tracing::trace!(old_floor_dist, new_floor_dist = self.current_floor.floor_dist, "adjusted floor height");
    }
}
