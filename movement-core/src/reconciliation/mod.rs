//! Server-side reconciliation.
//!
//! The server re-simulates every client move authoritatively, compares the
//! result with the location the client reported and answers with either an
//! acknowledgement or a correction. Stale and out-of-order moves are dropped
//! by timestamp; the client clock's periodic reset is recognised by a jump
//! backwards of more than half the reset interval.

use bevy::prelude::*;

use crate::base::BaseHandle;
use crate::config::NetworkConfig;
use crate::constants::{DUAL_MOVE_SENTINEL, MAX_CLIENT_UPDATE_INTERVAL};
use crate::geometry::MoveContext;
use crate::movement::CharacterMovement;
use crate::net::{unpack_view, ClientMessage, ClientMove, NetQuantize100, ServerMessage};
use crate::rotator::Rotator;

/// Answer owed to the client for the last processed move
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingAdjustment {
    pub timestamp: f32,
    pub new_location: Vec3,
    pub new_velocity: Vec3,
    pub new_base: Option<BaseHandle>,
    /// `new_location` is an offset from `new_base`
    pub base_relative_position: bool,
    pub ack_good_move: bool,
}

impl PendingAdjustment {
    pub fn ack(timestamp: f32) -> Self {
        Self {
            timestamp,
            new_location: Vec3::ZERO,
            new_velocity: Vec3::ZERO,
            new_base: None,
            base_relative_position: false,
            ack_good_move: true,
        }
    }
}

#[derive(Component, Debug, Clone)]
pub struct ServerPredictionData {
    pub config: NetworkConfig,
    /// Timestamp of the newest move accepted from the client
    pub current_client_timestamp: f32,
    /// World time the last correction was built
    pub last_update_time: Option<f32>,
    pub pending_adjustment: Option<PendingAdjustment>,
    /// Control rotation last reported by the client
    pub view_rotation: Rotator,
}

impl Default for ServerPredictionData {
    fn default() -> Self {
        Self::new(NetworkConfig::default())
    }
}

impl ServerPredictionData {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            current_client_timestamp: 0.0,
            last_update_time: None,
            pending_adjustment: None,
            view_rotation: Rotator::ZERO,
        }
    }

    /// Accepts strictly newer timestamps, plus the first one after a client clock reset
    pub fn verify_client_timestamp(&mut self, timestamp: f32) -> bool {
        let delta = timestamp - self.current_client_timestamp;
        if delta.abs() > self.config.min_time_between_time_stamp_resets * 0.5 {
            if delta < 0.0 {
                tracing::info!(
                    timestamp,
                    previous = self.current_client_timestamp,
                    "client timestamp reset"
                );
                self.current_client_timestamp = 0.0;
                return true;
            }
            // A straggler from before a reset we already went through
            tracing::debug!(timestamp, "dropping move from previous timestamp epoch");
            return false;
        }
        if timestamp <= self.current_client_timestamp {
            tracing::debug!(timestamp, current = self.current_client_timestamp, "dropping stale move");
            return false;
        }
        true
    }

    /// Dispatches one client message
    pub fn receive(
        &mut self,
        movement: &mut CharacterMovement,
        message: &ServerMessage,
        now: f32,
        ctx: &MoveContext,
    ) {
        match message {
            ServerMessage::Move {
                moved,
                client_location,
                client_roll,
            } => self.server_move(movement, moved, client_location.to_vec3(), *client_roll, now, ctx),
            ServerMessage::MoveDual {
                pending,
                moved,
                client_location,
                client_roll,
            } => self.server_move_dual(movement, pending, moved, *client_location, *client_roll, now, ctx),
            ServerMessage::MoveOld {
                old_timestamp,
                old_acceleration,
                old_flags,
            } => self.server_move_old(movement, *old_timestamp, old_acceleration.to_vec3(), *old_flags, ctx),
        }
    }

    pub fn server_move(
        &mut self,
        movement: &mut CharacterMovement,
        moved: &ClientMove,
        client_location: Vec3,
        client_roll: u8,
        now: f32,
        ctx: &MoveContext,
    ) {
        if !self.verify_client_timestamp(moved.timestamp) {
            return;
        }
        let delta_time = (moved.timestamp - self.current_client_timestamp).min(self.config.server_max_response_time);
        self.current_client_timestamp = moved.timestamp;

        self.view_rotation = unpack_view(moved.view, client_roll);
        if !movement.config.orient_rotation_to_movement {
            movement.rotation = self.view_rotation;
        }

        let acceleration = moved.acceleration.to_vec3();
        if delta_time > 0.0 {
            if let Err(err) = movement.move_autonomous(delta_time, moved.flags, acceleration, ctx) {
                tracing::warn!(%err, timestamp = moved.timestamp, "server move sanitized");
            }
        }
        tracing::debug!(
            timestamp = moved.timestamp,
            delta_time,
            ?acceleration,
            location = ?movement.location,
            "server move"
        );
        self.handle_client_error(movement, moved.timestamp, client_location, now, ctx);
    }

    /// Runs the held-back move, then the newest one
    #[allow(clippy::too_many_arguments)]
    pub fn server_move_dual(
        &mut self,
        movement: &mut CharacterMovement,
        pending: &ClientMove,
        moved: &ClientMove,
        client_location: NetQuantize100,
        client_roll: u8,
        now: f32,
        ctx: &MoveContext,
    ) {
        let sentinel = Vec3::from_array(DUAL_MOVE_SENTINEL);
        self.server_move(movement, pending, sentinel, client_roll, now, ctx);
        self.server_move(movement, moved, client_location.to_vec3(), client_roll, now, ctx);
    }

    /// Simulates a resent move without checking the client's location
    pub fn server_move_old(
        &mut self,
        movement: &mut CharacterMovement,
        old_timestamp: f32,
        old_acceleration: Vec3,
        old_flags: u8,
        ctx: &MoveContext,
    ) {
        if !self.verify_client_timestamp(old_timestamp) {
            return;
        }
        tracing::debug!(old_timestamp, "recovered lost move");
        let delta_time = (old_timestamp - self.current_client_timestamp).min(self.config.server_max_response_time);
        if let Err(err) = movement.move_autonomous(delta_time, old_flags, old_acceleration, ctx) {
            tracing::warn!(%err, old_timestamp, "old move sanitized");
        }
        self.current_client_timestamp = old_timestamp;
    }

    /// Whether a correction sent at `last_update_time` is recent enough that
    /// the client cannot have reacted to it yet
    pub fn within_update_delay_bounds(&self, now: f32, last_update_time: f32) -> bool {
        let delay = (self.config.client_adjust_update_cost / self.config.net_speed).min(MAX_CLIENT_UPDATE_INTERVAL);
        now - last_update_time < delay
    }

    /// Compares the authoritative result with the client's report and queues the answer
    pub fn handle_client_error(
        &mut self,
        movement: &mut CharacterMovement,
        timestamp: f32,
        client_location: Vec3,
        now: f32,
        ctx: &MoveContext,
    ) {
        if client_location == Vec3::from_array(DUAL_MOVE_SENTINEL) {
            return;
        }
        if let Some(last) = self.last_update_time {
            // Still waiting on the client to apply the previous correction
            if last != now && self.within_update_delay_bounds(now, last) {
                return;
            }
        }

        let location_diff = movement.location - client_location;
        if !self.config.client_authoritative_position
            && location_diff.length_squared() > self.config.max_position_error_squared
        {
            let base = movement.base();
            let relative_to = base
                .and_then(|handle| ctx.bases.resolve(handle))
                .filter(|surface| surface.is_movable());
            let new_location = match relative_to {
                Some(surface) => movement.location - surface.location,
                None => movement.location,
            };
            tracing::info!(
                timestamp,
                error = location_diff.length(),
                server = ?movement.location,
                client = ?client_location,
                "client position error, sending correction"
            );
            self.pending_adjustment = Some(PendingAdjustment {
                timestamp,
                new_location,
                new_velocity: movement.velocity,
                new_base: base,
                base_relative_position: relative_to.is_some(),
                ack_good_move: false,
            });
            self.last_update_time = Some(now);
            return;
        }

        if self.config.client_authoritative_position && location_diff != Vec3::ZERO {
            movement.accept_client_location(client_location, ctx);
        }
        self.pending_adjustment = Some(PendingAdjustment::ack(timestamp));
    }

    /// Takes the queued answer, if any, in wire form
    pub fn send_client_adjustment(&mut self) -> Option<ClientMessage> {
        let adjustment = self.pending_adjustment.take()?;
        if adjustment.ack_good_move {
            return Some(ClientMessage::AckGoodMove {
                timestamp: adjustment.timestamp,
            });
        }
        let location = NetQuantize100::from_vec3(adjustment.new_location);
        if adjustment.new_velocity == Vec3::ZERO {
            Some(ClientMessage::VeryShortAdjustPosition {
                timestamp: adjustment.timestamp,
                location,
                base: adjustment.new_base,
                base_relative: adjustment.base_relative_position,
            })
        } else {
            Some(ClientMessage::AdjustPosition {
                timestamp: adjustment.timestamp,
                location,
                velocity: adjustment.new_velocity,
                base: adjustment.new_base,
                base_relative: adjustment.base_relative_position,
            })
        }
    }
}
