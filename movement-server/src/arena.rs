//! Test arena both halves simulate against.
//!
//! Layout is seeded: a floor, scattered low blocks that can be stepped
//! onto, a few taller walls, ramps, a shallow pool and optional moving
//! platforms.

use bevy::prelude::*;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use movement_core::MovementScene;

use crate::components::MovingPlatform;

/// Half width of the playable square, in cm
pub const ARENA_HALF_EXTENT: f32 = 3000.0;

/// Spawn spots are kept clear of generated geometry
const SPAWN_CLEARANCE: f32 = 300.0;

pub fn build_arena(seed: u64, moving_platforms: u32) -> (MovementScene, Vec<MovingPlatform>) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut scene = MovementScene::new();
    scene.add_floor(0.0);

    // Boundary walls
    let wall_height = 300.0;
    for (center, half) in [
        (Vec3::new(ARENA_HALF_EXTENT, 0.0, wall_height), Vec3::new(50.0, ARENA_HALF_EXTENT, wall_height)),
        (Vec3::new(-ARENA_HALF_EXTENT, 0.0, wall_height), Vec3::new(50.0, ARENA_HALF_EXTENT, wall_height)),
        (Vec3::new(0.0, ARENA_HALF_EXTENT, wall_height), Vec3::new(ARENA_HALF_EXTENT, 50.0, wall_height)),
        (Vec3::new(0.0, -ARENA_HALF_EXTENT, wall_height), Vec3::new(ARENA_HALF_EXTENT, 50.0, wall_height)),
    ] {
        scene.add_box(center, half);
    }

    let mut placed = 0;
    while placed < 24 {
        let center = random_spot(&mut rng);
        if center.truncate().length() < SPAWN_CLEARANCE * 2.0 {
            continue;
        }
        let half_height = if rng.gen_bool(0.7) {
            // Low enough to step onto
            rng.gen_range(4.0..20.0)
        } else {
            rng.gen_range(60.0..150.0)
        };
        let half = Vec3::new(rng.gen_range(40.0..160.0), rng.gen_range(40.0..160.0), half_height);
        scene.add_box(Vec3::new(center.x, center.y, half_height), half);
        placed += 1;
    }

    for _ in 0..3 {
        let center = random_spot(&mut rng);
        if center.truncate().length() < SPAWN_CLEARANCE * 2.0 {
            continue;
        }
        scene.add_ramp(
            Vec3::new(center.x, center.y, 0.0),
            Vec3::new(250.0, 150.0, 10.0),
            rng.gen_range(10.0..40.0),
        );
    }

    scene.add_water(
        Vec3::new(-ARENA_HALF_EXTENT + 100.0, -ARENA_HALF_EXTENT + 100.0, 0.0),
        Vec3::new(-ARENA_HALF_EXTENT + 700.0, -ARENA_HALF_EXTENT + 700.0, 250.0),
        0.8,
    );

    let platforms = (0..moving_platforms)
        .map(|i| {
            let rest = Vec3::new(-1200.0 + 800.0 * i as f32, 1500.0, 20.0);
            let handle = scene.add_platform(rest, Vec3::new(200.0, 200.0, 20.0));
            MovingPlatform {
                handle,
                axis: if i % 2 == 0 { Vec3::X } else { Vec3::Y },
                amplitude: rng.gen_range(100.0..300.0),
                period: rng.gen_range(4.0..8.0),
                offset: Vec3::ZERO,
            }
        })
        .collect();

    (scene, platforms)
}

/// Where agent `index` of `count` starts: a ring around the arena center
pub fn spawn_location(index: u32, count: u32, standing_height: f32) -> Vec3 {
    let angle = std::f32::consts::TAU * index as f32 / count.max(1) as f32;
    Vec3::new(angle.cos() * SPAWN_CLEARANCE, angle.sin() * SPAWN_CLEARANCE, standing_height)
}

fn random_spot(rng: &mut Xoshiro256PlusPlus) -> Vec3 {
    let limit = ARENA_HALF_EXTENT - 300.0;
    Vec3::new(rng.gen_range(-limit..limit), rng.gen_range(-limit..limit), 0.0)
}

/// Slides every platform to its displacement for the current time
pub fn drive_platforms(scene: &mut MovementScene, platforms: &mut [MovingPlatform], time: f32, delta_time: f32) {
    for platform in platforms {
        let target = platform.displacement_at(time);
        let delta = target - platform.offset;
        if scene.move_base(platform.handle, delta, delta_time) {
            platform.offset = target;
        }
    }
}
