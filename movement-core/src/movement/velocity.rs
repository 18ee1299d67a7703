//! Velocity integration: acceleration, friction and braking.

use bevy::prelude::*;

use super::{CharacterMovement, MovementMode};
use crate::avoidance::AvoidanceAgent;
use crate::constants::{BRAKE_TO_STOP_VELOCITY, BRAKING_SUBSTEP_TIME, KINDA_SMALL_NUMBER, MIN_TICK_TIME};
use crate::geometry::MoveContext;

/// Speeds may drift this far over the cap (squared ratio) before counting as exceeding it
const MAX_SPEED_TOLERANCE_SQ: f32 = 1.01;

impl CharacterMovement {
    /// Speed cap for the current mode
    pub fn max_speed(&self) -> f32 {
        match self.mode {
            MovementMode::Walking => {
                if self.crouched {
                    self.config.max_walk_speed * self.config.crouched_speed_multiplier
                } else {
                    self.config.max_walk_speed
                }
            }
            MovementMode::Falling => self.config.max_walk_speed,
            MovementMode::Swimming => self.config.max_swim_speed,
            MovementMode::Flying => self.config.max_fly_speed,
            MovementMode::Custom(_) => self.config.max_custom_movement_speed,
            MovementMode::None => 0.0,
        }
    }

    pub fn max_braking_deceleration(&self) -> f32 {
        match self.mode {
            MovementMode::Walking => self.config.braking_deceleration_walking,
            MovementMode::Falling => self.config.braking_deceleration_falling,
            MovementMode::Swimming => self.config.braking_deceleration_swimming,
            MovementMode::Flying => self.config.braking_deceleration_flying,
            MovementMode::Custom(_) | MovementMode::None => 0.0,
        }
    }

    /// Ground and air modes ignore vertical input
    pub fn constrain_input_acceleration(&self, input: Vec3) -> Vec3 {
        let mut input = input;
        if input.z != 0.0 && (self.is_moving_on_ground() || self.is_falling()) {
            input.z = 0.0;
        }
        input
    }

    /// Input of length at most 1 scaled to an acceleration
    pub fn scale_input_acceleration(&self, input: Vec3) -> Vec3 {
        input.clamp_length_max(1.0) * self.config.max_acceleration
    }

    /// Integrates acceleration and friction into `velocity` for one step.
    ///
    /// With no acceleration, or when over the speed cap, the character
    /// brakes instead of accelerating. `fluid` applies friction to the full
    /// velocity as well.
    pub fn calc_velocity(
        &mut self,
        delta_time: f32,
        friction: f32,
        fluid: bool,
        braking_deceleration: f32,
        ctx: &MoveContext,
    ) {
        if delta_time < MIN_TICK_TIME {
            return;
        }
        let friction = friction.max(0.0);
        let max_accel = self.config.max_acceleration;
        let max_speed = self.max_speed();

        let mut accel = self.acceleration;
        let zero_accel = accel.length_squared() < KINDA_SMALL_NUMBER * KINDA_SMALL_NUMBER;
        let exceeding = self.velocity.length_squared() > max_speed * max_speed * MAX_SPEED_TOLERANCE_SQ;

        if zero_accel || exceeding {
            let old_velocity = self.velocity;
            let braking_friction = friction * self.config.braking_friction_factor.max(0.0);
            self.apply_velocity_braking(delta_time, braking_friction, braking_deceleration);

            // Braking must not take us below the cap if we are still pushing forward
            if exceeding
                && self.velocity.length_squared() < max_speed * max_speed
                && accel.dot(old_velocity) > 0.0
            {
                self.velocity = old_velocity.normalize_or_zero() * max_speed;
            }
        } else {
            // Friction turns the velocity toward the acceleration direction
            let accel_dir = accel.normalize_or_zero();
            let speed = self.velocity.length();
            self.velocity -= (self.velocity - accel_dir * speed) * (delta_time * friction).min(1.0);
        }

        if fluid {
            self.velocity *= 1.0 - (friction * delta_time).min(1.0);
        }

        if !zero_accel {
            let new_max = if exceeding { self.velocity.length() } else { max_speed };
            accel = accel.clamp_length_max(max_accel);
            self.velocity = (self.velocity + accel * delta_time).clamp_length_max(new_max);
        }

        self.apply_avoidance(delta_time, ctx);
    }

    fn apply_avoidance(&mut self, delta_time: f32, ctx: &MoveContext) {
        let Some(provider) = ctx.avoidance else {
            return;
        };
        let config = &self.config.avoidance;
        if !config.enabled
            || config.avoidance_weight >= 1.0
            || !self.is_moving_on_ground()
            || self.velocity == Vec3::ZERO
        {
            return;
        }
        let agent = AvoidanceAgent {
            location: self.location,
            velocity: self.velocity,
            radius: self.radius(),
            half_height: self.half_height,
            weight: config.avoidance_weight,
        };
        let avoid_config = config.clone();
        let adjusted = self.avoidance.resolve(&avoid_config, provider, &agent, delta_time);
        // Avoidance steers, it doesn't lift
        self.velocity = Vec3::new(adjusted.x, adjusted.y, self.velocity.z);
    }

    /// Slows the velocity by friction and a constant deceleration, never reversing it
    pub fn apply_velocity_braking(&mut self, delta_time: f32, friction: f32, braking_deceleration: f32) {
        if self.velocity == Vec3::ZERO || delta_time < MIN_TICK_TIME {
            return;
        }
        let friction = friction.max(0.0);
        let braking_deceleration = braking_deceleration.max(0.0);
        let zero_friction = friction == 0.0;
        let zero_braking = braking_deceleration == 0.0;
        if zero_friction && zero_braking {
            return;
        }

        let old_velocity = self.velocity;
        let mut remaining = delta_time;
        // Subdivide so friction stays stable at large time steps
        let max_step = if zero_friction { delta_time } else { BRAKING_SUBSTEP_TIME };
        let reverse_accel = if zero_braking {
            Vec3::ZERO
        } else {
            -braking_deceleration * self.velocity.normalize_or_zero()
        };

        while remaining >= MIN_TICK_TIME {
            let dt = if remaining > max_step && !zero_friction {
                max_step.min(remaining * 0.5)
            } else {
                remaining
            };
            remaining -= dt;

            self.velocity += (-friction * self.velocity + reverse_accel) * dt;
            // Braking never reverses direction
            if self.velocity.dot(old_velocity) <= 0.0 {
                self.velocity = Vec3::ZERO;
                return;
            }
        }

        let speed_sq = self.velocity.length_squared();
        if speed_sq <= KINDA_SMALL_NUMBER
            || (!zero_braking && speed_sq <= BRAKE_TO_STOP_VELOCITY * BRAKE_TO_STOP_VELOCITY)
        {
            self.velocity = Vec3::ZERO;
        }
    }

    /// Vertical velocity after falling for `delta_time`, capped at the volume's terminal velocity
    pub fn new_fall_velocity(&self, initial: Vec3, gravity: Vec3, delta_time: f32, ctx: &MoveContext) -> Vec3 {
        let mut result = initial;
        if delta_time > 0.0 {
            result += gravity * delta_time;
            let terminal = ctx.geometry.physics_volume(self.location).terminal_velocity.abs();
            if result.length_squared() > terminal * terminal {
                let gravity_dir = gravity.normalize_or_zero();
                if result.dot(gravity_dir) > terminal {
                    // Only the component along gravity is capped
                    result = result - gravity_dir * result.dot(gravity_dir) + gravity_dir * terminal;
                }
            }
        }
        result
    }

    pub(crate) fn gravity_vector(&self) -> Vec3 {
        Vec3::new(0.0, 0.0, self.config.gravity())
    }

    /// Projects velocity onto the horizontal plane keeping its magnitude
    pub fn maintain_horizontal_ground_velocity(&mut self) {
        if self.velocity.z != 0.0 {
            if self.config.maintain_horizontal_ground_velocity {
                let speed = self.velocity.length();
                self.velocity = Vec3::new(self.velocity.x, self.velocity.y, 0.0).normalize_or_zero() * speed;
            } else {
                self.velocity.z = 0.0;
            }
        }
    }
}
