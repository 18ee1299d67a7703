//! Centralized movement constants.
//!
//! Tuning values that designers are expected to change live in
//! [`crate::config`]. The values here are structural tolerances the
//! floor, step and network code rely on and are not exposed as config.

// =====================================================
// Numeric tolerances
// =====================================================

/// Generic "close enough to zero" tolerance for lengths and dot products
pub const KINDA_SMALL_NUMBER: f32 = 1.0e-4;

/// Tolerance for normalization guards
pub const SMALL_NUMBER: f32 = 1.0e-8;

/// Simulation steps shorter than this are skipped entirely
pub const MIN_TICK_TIME: f32 = 0.0003;

// =====================================================
// Floor
// =====================================================

/// Minimum distance the capsule should float above a walkable floor
pub const MIN_FLOOR_DIST: f32 = 1.9;

/// Maximum distance the capsule may float above a walkable floor
pub const MAX_FLOOR_DIST: f32 = 2.4;

/// Distance AdjustFloorHeight aims for when re-seating the capsule
pub const AVG_FLOOR_DIST: f32 = (MIN_FLOOR_DIST + MAX_FLOOR_DIST) * 0.5;

/// Hits closer than this to the capsule's vertical edge are not trusted as floor
pub const SWEEP_EDGE_REJECT_DISTANCE: f32 = 0.15;

/// Smallest radius a perch test may shrink to
pub const MIN_PERCH_RADIUS: f32 = 0.1;

/// Fraction of (half_height - radius) the first floor sweep shrinks the capsule by
pub const FLOOR_SWEEP_SHRINK: f32 = 0.1;

/// Fraction of (half_height - radius) the retry sweep shrinks by after an edge or penetration reject
pub const FLOOR_SWEEP_RETRY_SHRINK: f32 = 0.9;

// =====================================================
// Step Up
// =====================================================

/// Impact normals flatter than this (z component) count as the side of a step
pub const MAX_STEP_SIDE_Z: f32 = 0.08;

/// Vertical-ish impact threshold for flying/swimming step-up attempts
pub const VERTICAL_SLOPE_NORMAL_Z: f32 = 0.001;

// =====================================================
// Velocity
// =====================================================

/// Speeds below this while braking snap to zero
pub const BRAKE_TO_STOP_VELOCITY: f32 = 10.0;

/// Braking integrates in slices no longer than this
pub const BRAKING_SUBSTEP_TIME: f32 = 0.03;

/// Horizontal speed below which falling velocity is zeroed
pub const MIN_FALLING_HORIZONTAL_SPEED: f32 = 10.0;

/// Minimum prediction horizon used when testing air control
pub const MIN_AIR_CONTROL_TICK: f32 = 0.05;

/// Vertical bob applied when swimming up to the surface
pub const SWIM_BOB_SPEED: f32 = -80.0;

/// Hit time is pulled back by this many units along every sweep
pub const SWEEP_PULLBACK_DISTANCE: f32 = 0.1;

/// Extra distance added when popping out of penetration
pub const PENETRATION_PULLBACK_DISTANCE: f32 = 0.125;

/// Repeated same-wall hits push out along the normal by this much
pub const SAME_WALL_NUDGE: f32 = 0.01;

// =====================================================
// Networking
// =====================================================

/// Sentinel client location marking the first half of a dual move
pub const DUAL_MOVE_SENTINEL: [f32; 3] = [1.0, 2.0, 3.0];

/// Move-send interval on fast connections and small sessions
pub const FAST_NET_MOVE_DELTA: f32 = 0.011;

/// Lower bound of the move-send interval on constrained connections
pub const SLOW_NET_MOVE_DELTA: f32 = 0.0222;

/// Net speed above which a connection counts as fast
pub const FAST_NET_SPEED: f32 = 10_000.0;

/// Sessions at or below this many players send moves at the fast rate
pub const SMALL_SESSION_PLAYERS: u32 = 10;

/// Saved-move magnitude difference that makes a move important
pub const ACCEL_MAG_THRESHOLD: f32 = 1.0;

/// Saved-move direction agreement below which a move is important
pub const ACCEL_DOT_THRESHOLD: f32 = 0.9;

/// Acceleration direction agreement required to combine two moves
pub const COMBINE_ACCEL_DOT_THRESHOLD: f32 = 0.99;

/// Upper bound on the server's quiet period after sending a correction
pub const MAX_CLIENT_UPDATE_INTERVAL: f32 = 0.25;
