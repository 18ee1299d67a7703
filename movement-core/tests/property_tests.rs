//! Property-based tests using proptest
//!
//! Invariants that must hold for ALL inputs:
//! - Walkability: a hit is walkable exactly when its normal clears the threshold
//! - Walking: the floor gap stays inside the min/max band on flat ground
//! - Determinism: identical inputs from identical state give identical digests
//! - Combining: merged colinear moves end where sequential moves end
//! - Quantization: wire rounding stays within its resolution

use bevy::math::Vec3;
use proptest::prelude::*;

use movement_core::config::{MovementConfig, NetworkConfig};
use movement_core::constants::{MAX_FLOOR_DIST, MIN_FLOOR_DIST};
use movement_core::geometry::HitResult;
use movement_core::movement::MovementInput;
use movement_core::net::{pack_view, unpack_view, NetQuantize10, NetQuantize100};
use movement_core::rotator::Rotator;
use movement_core::{CharacterMovement, ClientPredictionData, MovementMode, MovementScene};

const DT: f32 = 1.0 / 60.0;

fn flat_scene() -> MovementScene {
    let mut scene = MovementScene::new();
    scene.add_floor(0.0);
    scene
}

fn standing(scene: &MovementScene) -> CharacterMovement {
    let mut movement = CharacterMovement::new(MovementConfig::default(), Vec3::new(0.0, 0.0, 90.15));
    movement.set_default_movement_mode(&scene.context());
    movement
}

fn direction(angle_degrees: f32) -> Vec3 {
    let radians = angle_degrees.to_radians();
    Vec3::new(radians.cos(), radians.sin(), 0.0)
}

fn angle_error(a: f32, b: f32) -> f32 {
    ((a - b + 540.0).rem_euclid(360.0) - 180.0).abs()
}

// ============================================================
// Floor Properties
// ============================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_walkable_matches_threshold(normal_z in -1.0f32..=1.0, walkable_z in 0.05f32..0.99) {
        let scene = flat_scene();
        let ctx = scene.context();
        let config = MovementConfig {
            walkable_floor_z: walkable_z,
            ..MovementConfig::default()
        };
        let movement = CharacterMovement::new(config, Vec3::new(0.0, 0.0, 90.15));
        let horizontal = (1.0 - normal_z * normal_z).max(0.0).sqrt();
        let normal = Vec3::new(horizontal, 0.0, normal_z);
        let hit = HitResult {
            blocking_hit: true,
            normal,
            impact_normal: normal,
            ..HitResult::new(0.5)
        };
        prop_assert_eq!(movement.is_walkable(&hit, &ctx), normal_z >= walkable_z);
    }

    #[test]
    fn prop_walking_keeps_floor_gap_in_band(
        steps in prop::collection::vec((0.0f32..360.0, 0.0f32..=1.0, 1.0f32 / 120.0..1.0 / 20.0), 1..60),
    ) {
        let scene = flat_scene();
        let ctx = scene.context();
        let mut movement = standing(&scene);
        for (angle, scale, dt) in steps {
            movement.tick(direction(angle) * scale, dt, &ctx).unwrap();
            prop_assert_eq!(movement.mode(), MovementMode::Walking);
            let gap = movement.current_floor.floor_dist;
            prop_assert!(
                (MIN_FLOOR_DIST - 0.01..=MAX_FLOOR_DIST + 0.01).contains(&gap),
                "floor gap {gap} left the band"
            );
            prop_assert!(movement.velocity.z.abs() < 1e-3);
        }
    }
}

// ============================================================
// Determinism Properties
// ============================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_same_inputs_same_digest(
        steps in prop::collection::vec((0.0f32..360.0, any::<bool>(), any::<bool>()), 1..90),
    ) {
        let mut scene = flat_scene();
        scene.add_box(Vec3::new(300.0, 0.0, 5.0), Vec3::new(50.0, 200.0, 5.0));
        scene.add_ramp(Vec3::new(-400.0, 0.0, 0.0), Vec3::new(150.0, 150.0, 10.0), 25.0);
        let ctx = scene.context();
        let mut first = standing(&scene);
        let mut second = first.clone();
        for (angle, jump, crouch) in steps {
            for movement in [&mut first, &mut second] {
                movement.jump_pressed = jump;
                movement.wants_to_crouch = crouch;
                movement.tick(direction(angle), DT, &ctx).unwrap();
            }
            prop_assert_eq!(first.state_digest(), second.state_digest());
        }
    }

    #[test]
    fn prop_combined_moves_match_sequential(angle in 0.0f32..360.0, frames in 2usize..20) {
        let scene = flat_scene();
        let ctx = scene.context();
        let mut warmed = standing(&scene);
        // Reach the speed cap first so integration order stops mattering
        for _ in 0..60 {
            warmed.tick(direction(angle), DT, &ctx).unwrap();
        }

        let mut combined = warmed.clone();
        let mut sequential = warmed;
        let mut combining = ClientPredictionData::new(NetworkConfig::default());
        let mut separate = ClientPredictionData::new(NetworkConfig {
            enable_move_combining: false,
            ..NetworkConfig::default()
        });
        let input = MovementInput {
            direction: direction(angle),
            ..Default::default()
        };
        for frame in 1..=frames {
            let now = frame as f32 * DT;
            combining.predict_move(&mut combined, &input, DT, now, &ctx);
            separate.predict_move(&mut sequential, &input, DT, now, &ctx);
            let gap = combined.location.distance(sequential.location);
            prop_assert!(gap < 0.1, "combined drifted {gap} from sequential at frame {frame}");
        }
        prop_assert!(combining.saved_moves().len() <= separate.saved_moves().len());
    }
}

// ============================================================
// Quantization Properties
// ============================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_location_quantization_error_bounded(
        x in -10_000.0f32..10_000.0,
        y in -10_000.0f32..10_000.0,
        z in -10_000.0f32..10_000.0,
    ) {
        let v = Vec3::new(x, y, z);
        let fine = NetQuantize100::from_vec3(v).to_vec3();
        prop_assert!((fine - v).abs().max_element() <= 0.006);
        let coarse = NetQuantize10::from_vec3(v).to_vec3();
        prop_assert!((coarse - v).abs().max_element() <= 0.051);
    }

    #[test]
    fn prop_view_packing_error_bounded(pitch in 0.0f32..360.0, yaw in 0.0f32..360.0) {
        let view = unpack_view(pack_view(Rotator::new(pitch, yaw, 0.0)), 0);
        let resolution = 360.0 / 65536.0;
        prop_assert!(angle_error(view.pitch, pitch) <= resolution);
        prop_assert!(angle_error(view.yaw, yaw) <= resolution);
    }
}
