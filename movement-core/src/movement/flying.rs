//! Flying: free 3D movement with fluid friction and no gravity.

use bevy::prelude::*;

use super::CharacterMovement;
use crate::constants::MIN_TICK_TIME;
use crate::geometry::{HitResult, MoveContext};

impl CharacterMovement {
    pub(crate) fn phys_flying(&mut self, delta_time: f32, _iterations: u32, ctx: &MoveContext) {
        if delta_time < MIN_TICK_TIME {
            return;
        }
        let friction = 0.5 * ctx.geometry.physics_volume(self.location).fluid_friction;
        let braking = self.max_braking_deceleration();
        self.calc_velocity(delta_time, friction, true, braking, ctx);

        self.just_teleported = false;
        let mut old_location = self.location;
        let adjusted = self.velocity * delta_time;
        let rotation = self.rotation;
        let mut hit = self.safe_move_updated_component(adjusted, rotation, ctx);

        if hit.time < 1.0 {
            self.step_or_slide(adjusted, &mut hit, &mut old_location, ctx);
        }

        if !self.just_teleported {
            self.velocity = (self.location - old_location) / delta_time;
        }
    }

    /// Shared obstacle response of the 3D modes: step over low, near-vertical
    /// obstacles when moving roughly horizontally, otherwise slide.
    ///
    /// A successful step shifts `old_location` up by the step so the derived
    /// velocity stays horizontal.
    pub(crate) fn step_or_slide(
        &mut self,
        adjusted: Vec3,
        hit: &mut HitResult,
        old_location: &mut Vec3,
        ctx: &MoveContext,
    ) -> bool {
        let up_down = Vec3::NEG_Z.dot(self.velocity.normalize_or_zero());
        let mut stepped_up = false;
        if hit.impact_normal.z.abs() < 0.2 && up_down < 0.5 && up_down > -0.2 && self.can_step_up(hit, ctx) {
            let step_z = self.location.z;
            stepped_up = self.step_up(adjusted * (1.0 - hit.time), hit, ctx).is_some();
            if stepped_up {
                old_location.z = self.location.z + (old_location.z - step_z);
            }
        }
        if !stepped_up {
            let normal = hit.normal;
            let time = 1.0 - hit.time;
            self.slide_along_surface(adjusted, time, normal, hit, ctx);
        }
        stepped_up
    }
}
