//! Following the surface the character stands on.

use bevy::prelude::*;

use super::CharacterMovement;
use crate::base::BaseHandle;
use crate::geometry::MoveContext;
use crate::rotator::Rotator;

impl CharacterMovement {
    /// Sets the movement base and snapshots its transform
    pub(crate) fn set_base(&mut self, base: Option<BaseHandle>, ctx: &MoveContext) {
        if self.base != base {
            tracing::trace!(from = ?self.base, to = ?base, "movement base changed");
        }
        self.base = base;
        self.save_base_location(ctx);
    }

    /// Bases the character on the current floor's surface when it is walkable
    pub(crate) fn set_base_from_floor(&mut self, ctx: &MoveContext) {
        let base = if self.current_floor.is_walkable_floor() {
            self.current_floor.hit.component
        } else {
            None
        };
        self.set_base(base, ctx);
    }

    /// Remembers where the base is now, and where we are relative to it
    pub(crate) fn save_base_location(&mut self, ctx: &MoveContext) {
        match self.base.and_then(|handle| ctx.bases.resolve(handle)) {
            Some(surface) => {
                self.old_base_location = surface.location;
                self.old_base_rotation = surface.rotation;
                self.base_relative_location = surface
                    .is_movable()
                    .then(|| self.location - surface.location);
            }
            None => self.base_relative_location = None,
        }
    }

    /// Velocity inherited from a movable base, per the impart flags
    pub fn imparted_movement_base_velocity(&self, ctx: &MoveContext) -> Vec3 {
        let Some(surface) = self.base.and_then(|handle| ctx.bases.resolve(handle)) else {
            return Vec3::ZERO;
        };
        if !surface.is_movable() {
            return Vec3::ZERO;
        }
        let mut velocity = surface.velocity;
        if !self.config.impart_base_velocity_x {
            velocity.x = 0.0;
        }
        if !self.config.impart_base_velocity_y {
            velocity.y = 0.0;
        }
        if !self.config.impart_base_velocity_z {
            velocity.z = 0.0;
        }
        velocity
    }

    /// Carries the character along with whatever its base did since the last update.
    ///
    /// The base is left untouched; only our location and yaw change. A base
    /// that no longer resolves is dropped and the floor rechecked.
    pub(crate) fn update_based_movement(&mut self, ctx: &MoveContext) {
        let Some(handle) = self.base else {
            return;
        };
        let Some(surface) = ctx.bases.resolve(handle) else {
            tracing::debug!(?handle, "movement base destroyed");
            self.set_base(None, ctx);
            self.force_next_floor_check = true;
            return;
        };
        if !surface.is_movable() {
            return;
        }

        let new_location = surface.location;
        let new_rotation = surface.rotation;
        let old_location = self.old_base_location;
        let old_rotation = self.old_base_rotation;
        let rotation_changed = !new_rotation.abs_diff_eq(old_rotation, 1.0e-8);
        if new_location == old_location && !rotation_changed {
            return;
        }

        let delta_rotation = new_rotation * old_rotation.inverse();
        let mut rotation = self.rotation;
        if rotation_changed && !self.config.ignore_base_rotation {
            let (delta_yaw, _, _) = delta_rotation.to_euler(EulerRot::ZYX);
            rotation.yaw = Rotator::normalize_axis(rotation.yaw + delta_yaw.to_degrees());
        }

        // Transform the bottom of the capsule so turning bases pivot us about our feet
        let base_offset = Vec3::Z * self.half_height;
        let local = old_rotation.inverse() * (self.location - base_offset - old_location);
        let new_world = new_rotation * local + new_location + base_offset;
        let mut delta = new_world - self.location;

        let base_move = new_location - old_location;
        if !rotation_changed && base_move.x == 0.0 && base_move.y == 0.0 {
            delta.x = 0.0;
            delta.y = 0.0;
        }

        let (_, hit) = self.move_updated_component(delta, rotation, ctx);
        if hit.start_penetrating {
            // The base pushed into something we were already touching
            let adjustment = self.penetration_adjustment(&hit);
            if self.resolve_penetration(adjustment, &hit, rotation, ctx) {
                self.move_updated_component(delta, rotation, ctx);
            }
        }

        self.old_base_location = new_location;
        self.old_base_rotation = new_rotation;
        if self.is_moving_on_ground() {
            self.force_next_floor_check = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{MovementEvent, MovementMode};
    use super::*;
    use crate::geometry::MovementScene;

    const DT: f32 = 1.0 / 60.0;

    /// 400x400 movable platform with its top at z = 0
    fn platform_scene() -> (MovementScene, BaseHandle) {
        let mut scene = MovementScene::new();
        scene.add_floor(-1000.0);
        let platform = scene.add_platform(Vec3::new(0.0, 0.0, -10.0), Vec3::new(200.0, 200.0, 10.0));
        (scene, platform)
    }

    #[test]
    fn test_static_floor_has_no_relative_location() {
        let scene = flat_scene();
        let movement = standing(&scene, 0.0, 0.0);
        assert!(movement.base().is_some());
        assert!(movement.base_relative_location().is_none());
        assert_eq!(movement.imparted_movement_base_velocity(&scene.context()), Vec3::ZERO);
    }

    #[test]
    fn test_rides_translating_platform() {
        let (mut scene, platform) = platform_scene();
        let mut movement = standing(&scene, 0.0, 0.0);
        assert_eq!(movement.base(), Some(platform));
        let start = movement.location;

        for _ in 0..30 {
            scene.move_base(platform, Vec3::X * 2.0, DT);
            movement.tick(Vec3::ZERO, DT, &scene.context()).unwrap();
        }
        assert!((movement.location.x - (start.x + 60.0)).abs() < 0.05);
        assert!((movement.location.z - start.z).abs() < 0.5);
        assert_eq!(movement.base(), Some(platform));
        let relative = movement.base_relative_location().expect("movable base");
        assert!((relative.x - movement.location.x + 60.0).abs() < 0.05);
    }

    #[test]
    fn test_rides_rising_platform() {
        let (mut scene, platform) = platform_scene();
        let mut movement = standing(&scene, 0.0, 0.0);
        let start = movement.location;
        for _ in 0..20 {
            scene.move_base(platform, Vec3::Z * 3.0, DT);
            movement.tick(Vec3::ZERO, DT, &scene.context()).unwrap();
        }
        assert_eq!(movement.mode(), MovementMode::Walking);
        assert!((movement.location.z - (start.z + 60.0)).abs() < 0.5);
    }

    #[test]
    fn test_turning_platform_carries_position_and_yaw() {
        let (mut scene, platform) = platform_scene();
        let mut movement = standing(&scene, 100.0, 0.0);
        scene.rotate_base(platform, 90.0);
        movement.tick(Vec3::ZERO, DT, &scene.context()).unwrap();

        assert!(movement.location.x.abs() < 0.5);
        assert!((movement.location.y - 100.0).abs() < 0.5);
        assert!((movement.rotation.yaw - 90.0).abs() < 1e-2);
    }

    #[test]
    fn test_ignore_base_rotation_keeps_yaw() {
        let (mut scene, platform) = platform_scene();
        let mut movement = standing(&scene, 100.0, 0.0);
        movement.config.ignore_base_rotation = true;
        scene.rotate_base(platform, 45.0);
        movement.tick(Vec3::ZERO, DT, &scene.context()).unwrap();
        assert_eq!(movement.rotation.yaw, 0.0);
    }

    #[test]
    fn test_destroyed_base_is_dropped() {
        let (mut scene, platform) = platform_scene();
        let mut movement = standing(&scene, 0.0, 0.0);
        scene.remove_base(platform);
        movement.tick(Vec3::ZERO, DT, &scene.context()).unwrap();
        assert!(movement.base().is_none());
        assert_eq!(movement.mode(), MovementMode::Falling);
    }

    #[test]
    fn test_jumping_off_moving_platform_keeps_its_velocity() {
        let (mut scene, platform) = platform_scene();
        let mut movement = standing(&scene, 0.0, 0.0);
        scene.move_base(platform, Vec3::X * 2.0, DT);
        movement.drain_events();
        movement.jump_pressed = true;
        movement.tick(Vec3::ZERO, DT, &scene.context()).unwrap();

        assert_eq!(movement.mode(), MovementMode::Falling);
        assert!(movement.velocity.x > 100.0);
        assert!(movement.drain_events().contains(&MovementEvent::Jumped));
    }

    #[test]
    fn test_impart_flags_mask_velocity() {
        let (mut scene, platform) = platform_scene();
        let mut movement = standing(&scene, 0.0, 0.0);
        scene.move_base(platform, Vec3::new(2.0, 1.0, 0.0), DT);
        movement.config.impart_base_velocity_x = false;
        let imparted = movement.imparted_movement_base_velocity(&scene.context());
        assert_eq!(imparted.x, 0.0);
        assert!((imparted.y - 60.0).abs() < 1e-3);
    }
}
