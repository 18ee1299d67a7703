//! Edge case tests
//!
//! Inputs and situations the simulation must survive:
//! - Non-finite input and degenerate frame times
//! - Bases destroyed underneath the character
//! - Saved move overflow when the server never answers
//! - Custom modes with and without a host simulation
//! - Avoidance providers returning garbage
//! - Config files on disk and malformed wire payloads

use bevy::math::Vec3;

use movement_core::avoidance::AvoidanceAgent;
use movement_core::config::{AvoidanceConfig, MovementConfig, MovementSettings, NetworkConfig};
use movement_core::geometry::MoveContext;
use movement_core::movement::{CustomMovement, MovementEvent, MovementInput};
use movement_core::net::{decode, encode, ClientMessage, NetQuantize100};
use movement_core::{
    CharacterMovement, ClientPredictionData, CodecError, MovementError, MovementMode, MovementScene,
};

const DT: f32 = 1.0 / 60.0;

fn flat_scene() -> MovementScene {
    let mut scene = MovementScene::new();
    scene.add_floor(0.0);
    scene
}

fn standing(scene: &MovementScene, config: MovementConfig) -> CharacterMovement {
    let mut movement = CharacterMovement::new(config, Vec3::new(0.0, 0.0, 90.15));
    movement.set_default_movement_mode(&scene.context());
    movement
}

// ============================================================
// Numeric Edge Cases
// ============================================================

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "acceleration")]
fn test_nan_input_is_fatal_in_debug() {
    let scene = flat_scene();
    let mut movement = standing(&scene, MovementConfig::default());
    let _ = movement.tick(Vec3::NAN, DT, &scene.context());
}

#[cfg(not(debug_assertions))]
#[test]
fn test_nan_input_is_sanitized_in_release() {
    let scene = flat_scene();
    let mut movement = standing(&scene, MovementConfig::default());
    let before = movement.location;
    let result = movement.tick(Vec3::NAN, DT, &scene.context());
    assert!(matches!(result, Err(MovementError::NonFinite { .. })));
    assert_eq!(movement.acceleration, Vec3::ZERO);
    assert_eq!(movement.location, before);
    assert!(movement.drain_events().contains(&MovementEvent::Sanitized));
}

#[test]
fn test_zero_delta_time_changes_nothing() {
    let scene = flat_scene();
    let mut movement = standing(&scene, MovementConfig::default());
    let digest = movement.state_digest();
    movement.tick(Vec3::ZERO, 0.0, &scene.context()).unwrap();
    assert_eq!(movement.state_digest(), digest);
}

#[test]
fn test_huge_delta_time_stays_on_floor() {
    let scene = flat_scene();
    let mut movement = standing(&scene, MovementConfig::default());
    for _ in 0..5 {
        movement.tick(Vec3::X, 1.0, &scene.context()).unwrap();
        assert!(movement.location.is_finite());
        assert_eq!(movement.mode(), MovementMode::Walking);
        assert!((movement.location.z - 90.15).abs() < 0.5);
    }
    assert!(movement.velocity.length() <= movement.config.max_walk_speed + 1e-2);
    assert!(movement.location.x <= 5.0 * movement.config.max_walk_speed + 1.0);
}

#[test]
fn test_oversized_input_is_clamped() {
    let scene = flat_scene();
    let mut movement = standing(&scene, MovementConfig::default());
    movement.tick(Vec3::X * 50.0, DT, &scene.context()).unwrap();
    assert!((movement.acceleration.length() - movement.config.max_acceleration).abs() < 1e-2);
}

// ============================================================
// Bases
// ============================================================

#[test]
fn test_base_destroyed_mid_walk() {
    let mut scene = MovementScene::new();
    let platform = scene.add_platform(Vec3::new(0.0, 0.0, -10.0), Vec3::new(500.0, 500.0, 10.0));
    let mut movement = standing(&scene, MovementConfig::default());
    for _ in 0..10 {
        movement.tick(Vec3::X, DT, &scene.context()).unwrap();
    }
    assert_eq!(movement.base(), Some(platform));
    scene.remove_base(platform);
    movement.tick(Vec3::X, DT, &scene.context()).unwrap();
    assert!(movement.base().is_none());
    assert_eq!(movement.mode(), MovementMode::Falling);
    // A handle to a removed base never resolves again
    assert!(scene.bases.resolve(platform).is_none());
    let replacement = scene.add_platform(Vec3::new(0.0, 0.0, -10.0), Vec3::new(500.0, 500.0, 10.0));
    assert_ne!(replacement, platform);
    assert!(scene.bases.resolve(platform).is_none());
}

#[test]
fn test_none_mode_ignores_input_and_launch() {
    let scene = flat_scene();
    let ctx = scene.context();
    let mut movement = standing(&scene, MovementConfig::default());
    movement.disable_movement(&ctx);
    movement.launch(Vec3::Z * 1000.0);
    let before = movement.location;
    movement.tick(Vec3::X, DT, &ctx).unwrap();
    assert_eq!(movement.location, before);
    assert_eq!(movement.velocity, Vec3::ZERO);
}

// ============================================================
// Prediction Limits
// ============================================================

#[test]
fn test_saved_moves_bounded_without_acks() {
    let scene = flat_scene();
    let ctx = scene.context();
    let config = NetworkConfig {
        max_saved_move_count: 16,
        enable_move_combining: false,
        ..NetworkConfig::default()
    };
    let mut movement = standing(&scene, MovementConfig::default());
    let mut prediction = ClientPredictionData::new(config);
    let input = MovementInput {
        direction: Vec3::Y,
        ..Default::default()
    };
    for frame in 1..=100 {
        prediction.predict_move(&mut movement, &input, DT, frame as f32 * DT, &ctx);
        assert!(prediction.saved_moves().len() <= 16);
    }
    assert!(prediction.free_move_count() <= prediction.config.max_free_move_count);
    // Simulation keeps going even though history was dropped
    assert!(movement.location.y > 500.0);
}

#[test]
fn test_ack_for_unknown_timestamp_is_ignored() {
    let scene = flat_scene();
    let ctx = scene.context();
    let mut movement = standing(&scene, MovementConfig::default());
    let mut prediction = ClientPredictionData::new(NetworkConfig::default());
    prediction.predict_move(&mut movement, &MovementInput::default(), DT, DT, &ctx);
    let saved = prediction.saved_moves().len();
    let corrected = prediction.handle_client_message(
        &mut movement,
        &ClientMessage::AckGoodMove { timestamp: 123.0 },
        &ctx,
    );
    assert!(!corrected);
    assert_eq!(prediction.saved_moves().len(), saved);

    let correction = ClientMessage::VeryShortAdjustPosition {
        timestamp: 123.0,
        location: NetQuantize100::from_vec3(Vec3::new(500.0, 0.0, 90.15)),
        base: None,
        base_relative: false,
    };
    let before = movement.location;
    assert!(!prediction.handle_client_message(&mut movement, &correction, &ctx));
    assert_eq!(movement.location, before);
}

// ============================================================
// Custom Modes and Avoidance
// ============================================================

struct Conveyor {
    speed: f32,
}

impl CustomMovement for Conveyor {
    fn phys_custom(&self, movement: &mut CharacterMovement, _ctx: &MoveContext, delta_time: f32, _iterations: u32) {
        movement.velocity = Vec3::X * self.speed;
        movement.location += movement.velocity * delta_time;
    }
}

#[test]
fn test_custom_mode_without_host_stands_still() {
    let scene = flat_scene();
    let ctx = scene.context();
    let mut movement = standing(&scene, MovementConfig::default());
    movement.set_movement_mode(MovementMode::Custom(3), &ctx);
    let before = movement.location;
    movement.tick(Vec3::X, DT, &ctx).unwrap();
    assert_eq!(movement.location, before);
    assert_eq!(movement.mode(), MovementMode::Custom(3));
}

#[test]
fn test_custom_mode_delegates_to_host() {
    let scene = flat_scene();
    let conveyor = Conveyor { speed: 120.0 };
    let ctx = scene.context().with_custom(&conveyor);
    let mut movement = standing(&scene, MovementConfig::default());
    movement.set_movement_mode(MovementMode::Custom(1), &ctx);
    for _ in 0..60 {
        movement.tick(Vec3::ZERO, DT, &ctx).unwrap();
    }
    assert!((movement.location.x - 120.0).abs() < 0.5);
}

#[test]
fn test_non_finite_avoidance_answer_is_ignored() {
    let scene = flat_scene();
    let garbage = |_: &AvoidanceAgent, _: f32| Vec3::NAN;
    let ctx = scene.context().with_avoidance(&garbage);
    let config = MovementConfig {
        avoidance: AvoidanceConfig {
            enabled: true,
            ..AvoidanceConfig::default()
        },
        ..MovementConfig::default()
    };
    let mut movement = standing(&scene, config);
    for _ in 0..30 {
        movement.tick(Vec3::X, DT, &ctx).unwrap();
    }
    assert!(movement.velocity.is_finite());
    assert!(movement.location.x > 0.0);
}

#[test]
fn test_avoidance_steers_walking_velocity() {
    let scene = flat_scene();
    let sidestep = |agent: &AvoidanceAgent, _: f32| Vec3::new(0.0, agent.velocity.length(), 50.0);
    let ctx = scene.context().with_avoidance(&sidestep);
    let config = MovementConfig {
        avoidance: AvoidanceConfig {
            enabled: true,
            ..AvoidanceConfig::default()
        },
        ..MovementConfig::default()
    };
    let mut movement = standing(&scene, config);
    for _ in 0..30 {
        movement.tick(Vec3::X, DT, &ctx).unwrap();
    }
    assert!(movement.location.y > movement.location.x);
    assert_eq!(movement.mode(), MovementMode::Walking);
}

// ============================================================
// Config and Wire
// ============================================================

#[test]
fn test_settings_files_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = MovementSettings::default();
    settings.movement.max_walk_speed = 375.0;
    settings.network.enable_move_combining = false;

    let ron_path = dir.path().join("movement.ron");
    std::fs::write(&ron_path, settings.to_ron()).unwrap();
    let from_ron = MovementSettings::load(&ron_path).unwrap();
    assert_eq!(from_ron.movement, settings.movement);
    assert_eq!(from_ron.network, settings.network);

    let json_path = dir.path().join("movement.json");
    std::fs::write(&json_path, settings.to_json()).unwrap();
    let from_json = MovementSettings::load(&json_path).unwrap();
    assert_eq!(from_json.movement, settings.movement);
}

#[test]
fn test_bad_settings_files_are_errors() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.ron");
    assert!(matches!(MovementSettings::load(&missing), Err(MovementError::Io(_))));

    let broken = dir.path().join("broken.ron");
    std::fs::write(&broken, "(movement: (max_walk_speed: ").unwrap();
    assert!(matches!(MovementSettings::load(&broken), Err(MovementError::Ron(_))));

    let invalid = dir.path().join("invalid.json");
    std::fs::write(&invalid, r#"{"movement": {"capsule_radius": -1.0}}"#).unwrap();
    assert!(matches!(MovementSettings::load(&invalid), Err(MovementError::InvalidConfig(_))));
}

#[test]
fn test_truncated_message_fails_to_decode() {
    let bytes = encode(&ClientMessage::AckGoodMove { timestamp: 1.5 }).unwrap();
    let result = decode::<ClientMessage>(&bytes[..bytes.len() - 1]);
    assert!(matches!(result, Err(CodecError::Decode(_))));
}
