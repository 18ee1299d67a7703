//! Movement tuning and network prediction configuration.
//!
//! Loaded from RON (preferred) or JSON. Every struct is `#[serde(default)]`
//! so config files only need the fields they override.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MovementError, MovementResult};
use crate::logging::TracingConfig;
use crate::rotator::Rotator;

/// Sub-stepping limits used by the iterative mode physics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubstepConfig {
    /// Longest slice a single physics iteration may integrate
    pub max_simulation_time_step: f32,
    /// Iteration cap per tick; remaining time beyond it is dropped
    pub max_simulation_iterations: u32,
}

impl Default for SubstepConfig {
    fn default() -> Self {
        Self {
            max_simulation_time_step: 0.05,
            max_simulation_iterations: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvoidanceConfig {
    pub enabled: bool,
    /// Weights at or above 1 never yield to other agents
    pub avoidance_weight: f32,
    pub lock_time_after_avoid: f32,
    pub lock_time_after_clean: f32,
}

impl Default for AvoidanceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            avoidance_weight: 0.5,
            lock_time_after_avoid: 0.2,
            lock_time_after_clean: 0.01,
        }
    }
}

/// Per-character movement tuning (units: cm, seconds, degrees)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    pub capsule_radius: f32,
    pub capsule_half_height: f32,
    pub crouched_half_height: f32,

    pub gravity_z: f32,
    pub gravity_scale: f32,
    pub max_acceleration: f32,

    pub ground_friction: f32,
    pub max_walk_speed: f32,
    pub crouched_speed_multiplier: f32,
    pub braking_deceleration_walking: f32,
    pub braking_deceleration_falling: f32,
    pub braking_deceleration_swimming: f32,
    pub braking_deceleration_flying: f32,
    /// Multiplies friction while braking
    pub braking_friction_factor: f32,

    /// Minimum z of a surface normal that can be stood on
    pub walkable_floor_z: f32,
    pub max_step_height: f32,
    pub perch_radius_threshold: f32,
    pub perch_additional_height: f32,
    pub ledge_check_threshold: f32,
    pub can_walk_off_ledges: bool,
    pub can_walk_off_ledges_when_crouching: bool,
    pub maintain_horizontal_ground_velocity: bool,
    /// When false, a floor on static geometry is reused across ticks without movement
    pub always_check_floor: bool,
    pub can_crouch: bool,
    pub can_swim: bool,

    pub jump_z_velocity: f32,
    pub jump_off_jump_z_factor: f32,
    pub air_control: f32,
    pub air_control_boost_multiplier: f32,
    pub air_control_boost_velocity_threshold: f32,
    pub falling_lateral_friction: f32,

    pub max_fly_speed: f32,
    pub max_swim_speed: f32,
    pub max_custom_movement_speed: f32,
    pub buoyancy: f32,

    /// Longest single push out of penetrating geometry
    pub max_depenetration: f32,

    pub impart_base_velocity_x: bool,
    pub impart_base_velocity_y: bool,
    pub impart_base_velocity_z: bool,
    pub ignore_base_rotation: bool,

    pub orient_rotation_to_movement: bool,
    /// Degrees per second
    pub rotation_rate: Rotator,

    pub substep: SubstepConfig,
    pub avoidance: AvoidanceConfig,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            capsule_radius: 34.0,
            capsule_half_height: 88.0,
            crouched_half_height: 40.0,
            gravity_z: -980.0,
            gravity_scale: 1.0,
            max_acceleration: 2048.0,
            ground_friction: 8.0,
            max_walk_speed: 600.0,
            crouched_speed_multiplier: 0.5,
            braking_deceleration_walking: 2048.0,
            braking_deceleration_falling: 0.0,
            braking_deceleration_swimming: 0.0,
            braking_deceleration_flying: 0.0,
            braking_friction_factor: 2.0,
            walkable_floor_z: 0.71,
            max_step_height: 45.0,
            perch_radius_threshold: 0.0,
            perch_additional_height: 40.0,
            ledge_check_threshold: 4.0,
            can_walk_off_ledges: true,
            can_walk_off_ledges_when_crouching: false,
            maintain_horizontal_ground_velocity: true,
            always_check_floor: false,
            can_crouch: true,
            can_swim: true,
            jump_z_velocity: 420.0,
            jump_off_jump_z_factor: 0.5,
            air_control: 0.05,
            air_control_boost_multiplier: 2.0,
            air_control_boost_velocity_threshold: 25.0,
            falling_lateral_friction: 0.0,
            max_fly_speed: 600.0,
            max_swim_speed: 300.0,
            max_custom_movement_speed: 600.0,
            buoyancy: 1.0,
            max_depenetration: 100.0,
            impart_base_velocity_x: true,
            impart_base_velocity_y: true,
            impart_base_velocity_z: true,
            ignore_base_rotation: false,
            orient_rotation_to_movement: false,
            rotation_rate: Rotator::new(0.0, 360.0, 0.0),
            substep: SubstepConfig::default(),
            avoidance: AvoidanceConfig::default(),
        }
    }
}

impl MovementConfig {
    /// Effective gravity along Z
    pub fn gravity(&self) -> f32 {
        self.gravity_z * self.gravity_scale
    }

    /// Maximum walkable slope in degrees
    pub fn walkable_floor_angle(&self) -> f32 {
        self.walkable_floor_z.clamp(-1.0, 1.0).acos().to_degrees()
    }

    pub fn set_walkable_floor_angle(&mut self, degrees: f32) {
        self.walkable_floor_z = degrees.clamp(0.0, 90.0).to_radians().cos();
    }

    pub fn validate(&self) -> MovementResult<()> {
        if self.capsule_radius <= 0.0 || self.capsule_half_height < self.capsule_radius {
            return Err(MovementError::InvalidConfig(format!(
                "capsule radius {} / half height {} must satisfy 0 < radius <= half_height",
                self.capsule_radius, self.capsule_half_height
            )));
        }
        if self.crouched_half_height < self.capsule_radius {
            return Err(MovementError::InvalidConfig(
                "crouched_half_height must be at least the capsule radius".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.walkable_floor_z) {
            return Err(MovementError::InvalidConfig(format!(
                "walkable_floor_z {} outside [0, 1]",
                self.walkable_floor_z
            )));
        }
        if self.max_step_height < 0.0 || self.max_acceleration < 0.0 {
            return Err(MovementError::InvalidConfig(
                "max_step_height and max_acceleration must be non-negative".into(),
            ));
        }
        if self.substep.max_simulation_time_step <= 0.0 || self.substep.max_simulation_iterations == 0 {
            return Err(MovementError::InvalidConfig(
                "substep time step and iteration count must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Client prediction and server reconciliation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Client timestamps reset after exceeding this many seconds
    pub min_time_between_time_stamp_resets: f32,
    pub client_max_response_time: f32,
    pub server_max_response_time: f32,
    pub max_free_move_count: usize,
    pub max_saved_move_count: usize,
    pub enable_move_combining: bool,

    pub smooth_net_updates: bool,
    pub max_smooth_net_update_dist: f32,
    pub no_smooth_net_update_dist: f32,
    pub smooth_net_update_time: f32,

    /// Squared distance the server tolerates before correcting a client
    pub max_position_error_squared: f32,
    pub client_authoritative_position: bool,
    pub client_adjust_update_cost: f32,
    pub move_rep_size: f32,
    /// Connection bandwidth in bytes per second
    pub net_speed: f32,
    pub player_count: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            min_time_between_time_stamp_resets: 240.0,
            client_max_response_time: 0.125,
            server_max_response_time: 0.125,
            max_free_move_count: 32,
            max_saved_move_count: 96,
            enable_move_combining: true,
            smooth_net_updates: true,
            max_smooth_net_update_dist: 84.0,
            no_smooth_net_update_dist: 128.0,
            smooth_net_update_time: 0.125,
            max_position_error_squared: 3.0,
            client_authoritative_position: false,
            client_adjust_update_cost: 180.0,
            move_rep_size: 42.0,
            net_speed: 10_000.0,
            player_count: 1,
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> MovementResult<()> {
        if self.min_time_between_time_stamp_resets <= 0.0 {
            return Err(MovementError::InvalidConfig(
                "min_time_between_time_stamp_resets must be positive".into(),
            ));
        }
        if self.client_max_response_time <= 0.0 || self.server_max_response_time <= 0.0 {
            return Err(MovementError::InvalidConfig("max response times must be positive".into()));
        }
        if self.max_saved_move_count == 0 {
            return Err(MovementError::InvalidConfig("max_saved_move_count must be positive".into()));
        }
        if self.no_smooth_net_update_dist < self.max_smooth_net_update_dist {
            return Err(MovementError::InvalidConfig(
                "no_smooth_net_update_dist must be >= max_smooth_net_update_dist".into(),
            ));
        }
        if self.net_speed <= 0.0 {
            return Err(MovementError::InvalidConfig("net_speed must be positive".into()));
        }
        Ok(())
    }
}

/// Everything a movement config file may carry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementSettings {
    pub movement: MovementConfig,
    pub network: NetworkConfig,
    pub tracing: TracingConfig,
}

impl MovementSettings {
    pub fn from_ron(text: &str) -> MovementResult<Self> {
        let settings: Self = ron::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json(text: &str) -> MovementResult<Self> {
        let settings: Self = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from disk; `.json` files are parsed as JSON, everything else as RON.
    pub fn load(path: &Path) -> MovementResult<Self> {
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&text),
            _ => Self::from_ron(&text),
        }
    }

    pub fn to_ron(&self) -> String {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default()).unwrap_or_default()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn validate(&self) -> MovementResult<()> {
        self.movement.validate()?;
        self.network.validate()
    }
}
