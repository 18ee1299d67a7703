//! Crowd avoidance hook.
//!
//! The movement core does not steer around other agents itself. A host
//! system implements [`AvoidanceProvider`]; walking characters consult it
//! once per velocity update and then hold the answer for a short lock window
//! so that neighbouring agents see a stable velocity.

use bevy::prelude::*;

use crate::config::AvoidanceConfig;

/// What the avoidance system gets to see about one agent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvoidanceAgent {
    pub location: Vec3,
    pub velocity: Vec3,
    pub radius: f32,
    pub half_height: f32,
    pub weight: f32,
}

/// Computes an adjusted velocity for an agent
pub trait AvoidanceProvider: Send + Sync {
    fn compute_avoidance_velocity(&self, agent: &AvoidanceAgent, delta_time: f32) -> Vec3;
}

impl<F> AvoidanceProvider for F
where
    F: Fn(&AvoidanceAgent, f32) -> Vec3 + Send + Sync,
{
    fn compute_avoidance_velocity(&self, agent: &AvoidanceAgent, delta_time: f32) -> Vec3 {
        self(agent, delta_time)
    }
}

/// Per-character lock state
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AvoidanceState {
    pub lock_timer: f32,
    pub lock_velocity: Vec3,
    /// Set whenever the provider was consulted or a lock was replayed this tick
    pub was_updated: bool,
}

impl AvoidanceState {
    pub fn tick(&mut self, delta_time: f32) {
        self.lock_timer = (self.lock_timer - delta_time).max(0.0);
        self.was_updated = false;
    }

    pub fn set_lock(&mut self, velocity: Vec3, duration: f32) {
        self.lock_velocity = velocity;
        self.lock_timer = duration;
    }

    pub fn is_locked(&self) -> bool {
        self.lock_timer > 0.0
    }

    /// Velocity to use after avoidance. Callers only invoke this for walking
    /// agents with a non-zero velocity.
    pub fn resolve(
        &mut self,
        config: &AvoidanceConfig,
        provider: &dyn AvoidanceProvider,
        agent: &AvoidanceAgent,
        delta_time: f32,
    ) -> Vec3 {
        if !config.enabled || config.avoidance_weight >= 1.0 {
            return agent.velocity;
        }
        self.was_updated = true;
        if self.is_locked() {
            return self.lock_velocity;
        }

        let adjusted = provider.compute_avoidance_velocity(agent, delta_time);
        if !adjusted.is_finite() {
            tracing::warn!(?adjusted, "avoidance returned a non-finite velocity, ignoring");
            self.set_lock(agent.velocity, config.lock_time_after_clean);
            return agent.velocity;
        }
        if adjusted.abs_diff_eq(agent.velocity, crate::constants::KINDA_SMALL_NUMBER) {
            // Course unchanged, but this frame's velocity is now decided
            self.set_lock(agent.velocity, config.lock_time_after_clean);
            agent.velocity
        } else {
            tracing::debug!(from = ?agent.velocity, to = ?adjusted, "avoidance diverted velocity");
            self.set_lock(adjusted, config.lock_time_after_avoid);
            adjusted
        }
    }
}
