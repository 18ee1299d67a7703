//! Visual offset that hides correction snaps.
//!
//! Corrections move the simulated capsule instantly. The mesh keeps an
//! offset back toward where it was drawn and bleeds it off over
//! `smooth_net_update_time`.

use bevy::prelude::*;

use super::ClientPredictionData;

impl ClientPredictionData {
    /// Records a jump of the simulated location from `old_location` to `new_location`
    pub fn smooth_correction(&mut self, old_location: Vec3, new_location: Vec3) {
        if !self.config.smooth_net_updates {
            return;
        }
        let delta = old_location - new_location;
        let dist_sq = delta.length_squared();
        let max_smooth = self.config.max_smooth_net_update_dist;
        let no_smooth = self.config.no_smooth_net_update_dist;
        if dist_sq > max_smooth * max_smooth {
            self.mesh_translation_offset = if dist_sq > no_smooth * no_smooth {
                Vec3::ZERO
            } else {
                self.mesh_translation_offset + delta.normalize_or_zero() * max_smooth
            };
        } else {
            self.mesh_translation_offset += delta;
        }
    }

    /// Decays the offset; vertical smoothing is skipped while walking
    pub fn smooth_client_position(&mut self, delta_time: f32, walking: bool) {
        let smooth_time = self.config.smooth_net_update_time;
        if delta_time < smooth_time {
            self.mesh_translation_offset *= 1.0 - delta_time / smooth_time;
        } else {
            self.mesh_translation_offset = Vec3::ZERO;
        }
        if walking {
            self.mesh_translation_offset.z = 0.0;
        }
    }

    /// Where the mesh should be drawn for a capsule at `location`
    pub fn visual_location(&self, location: Vec3) -> Vec3 {
        location + self.mesh_translation_offset
    }
}
