//! Client-side prediction.
//!
//! The owning client simulates every move immediately and remembers it as a
//! [`SavedMove`] until the server acknowledges a move with an equal or later
//! timestamp. Moves are batched toward the server at a bandwidth-aware
//! cadence; a held-back move may absorb the next one when their inputs
//! agree. When the server corrects us we snap to its state and replay every
//! move it has not seen yet through [`CharacterMovement::move_autonomous`].

use bevy::prelude::*;

use crate::base::BaseHandle;
use crate::config::NetworkConfig;
use crate::constants::{FAST_NET_MOVE_DELTA, FAST_NET_SPEED, SLOW_NET_MOVE_DELTA, SMALL_SESSION_PLAYERS};
use crate::geometry::MoveContext;
use crate::movement::{CharacterMovement, MovementInput};
use crate::net::quantize::compress_axis_to_byte;
use crate::net::{
    pack_view, round_acceleration, ClientMessage, ClientMove, NetQuantize10, NetQuantize100, ServerMessage,
};

mod saved_move;
mod smoothing;

pub use saved_move::SavedMove;

#[derive(Component, Debug, Clone)]
pub struct ClientPredictionData {
    pub config: NetworkConfig,
    /// Unacknowledged moves in timestamp order; the pending move, if any, is last
    saved_moves: Vec<SavedMove>,
    free_moves: Vec<SavedMove>,
    has_pending_move: bool,
    last_acked_move: Option<SavedMove>,
    pub current_timestamp: f32,
    /// World time the last batch went out
    pub client_update_time: f32,
    /// Set by a correction; the next replay pass consumes it
    pub update_position: bool,
    pub mesh_translation_offset: Vec3,
}

impl Default for ClientPredictionData {
    fn default() -> Self {
        Self::new(NetworkConfig::default())
    }
}

impl ClientPredictionData {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            saved_moves: Vec::new(),
            free_moves: Vec::new(),
            has_pending_move: false,
            last_acked_move: None,
            current_timestamp: 0.0,
            client_update_time: f32::NEG_INFINITY,
            update_position: false,
            mesh_translation_offset: Vec3::ZERO,
        }
    }

    pub fn saved_moves(&self) -> &[SavedMove] {
        &self.saved_moves
    }

    /// The move held back for combining, not yet sent
    pub fn pending_move(&self) -> Option<&SavedMove> {
        if self.has_pending_move {
            self.saved_moves.last()
        } else {
            None
        }
    }

    pub fn last_acked_move(&self) -> Option<&SavedMove> {
        self.last_acked_move.as_ref()
    }

    pub fn free_move_count(&self) -> usize {
        self.free_moves.len()
    }

    /// Advances the client clock and returns the delta time the server will
    /// derive for this move.
    ///
    /// The clock wraps back to zero after `min_time_between_time_stamp_resets`
    /// to keep float precision; everything recorded before that is flagged so
    /// it is never resent into the new epoch.
    pub fn update_timestamp_and_delta_time(&mut self, delta_time: f32) -> f32 {
        if self.current_timestamp > self.config.min_time_between_time_stamp_resets {
            tracing::info!(timestamp = self.current_timestamp, "resetting client timestamp");
            self.current_timestamp = 0.0;
            for saved in &mut self.saved_moves {
                saved.old_time_stamp_before_reset = true;
            }
            if let Some(acked) = &mut self.last_acked_move {
                acked.old_time_stamp_before_reset = true;
            }
        }

        self.current_timestamp += delta_time;
        let mut client_delta_time = delta_time;
        if let Some(previous) = self.saved_moves.last() {
            if !previous.old_time_stamp_before_reset {
                // Same subtraction the server will do
                client_delta_time = self.current_timestamp - previous.timestamp;
            }
        }
        client_delta_time.min(self.config.client_max_response_time)
    }

    /// Seconds to wait between batches for the current connection
    pub fn net_move_delta(&self) -> f32 {
        if self.config.net_speed > FAST_NET_SPEED && self.config.player_count <= SMALL_SESSION_PLAYERS {
            FAST_NET_MOVE_DELTA
        } else {
            SLOW_NET_MOVE_DELTA.max(2.0 * self.config.move_rep_size / self.config.net_speed)
        }
    }

    fn create_saved_move(&mut self) -> SavedMove {
        if self.saved_moves.len() >= self.config.max_saved_move_count {
            tracing::warn!(
                count = self.saved_moves.len(),
                "hit saved move limit, dropping all unacknowledged moves"
            );
            let dropped: Vec<SavedMove> = self.saved_moves.drain(..).collect();
            for saved in dropped {
                self.free_move(saved);
            }
            self.has_pending_move = false;
        }
        match self.free_moves.pop() {
            Some(mut saved) => {
                saved.clear();
                saved
            }
            None => SavedMove::default(),
        }
    }

    fn free_move(&mut self, saved: SavedMove) {
        if self.free_moves.len() < self.config.max_free_move_count {
            self.free_moves.push(saved);
        }
    }

    /// Local input for one frame: records, simulates and possibly sends a move
    pub fn predict_move(
        &mut self,
        movement: &mut CharacterMovement,
        input: &MovementInput,
        delta_time: f32,
        now: f32,
        ctx: &MoveContext,
    ) -> Vec<ServerMessage> {
        movement.wants_to_crouch = input.crouch;
        movement.jump_pressed |= input.jump;
        let acceleration = movement.scale_input_acceleration(movement.constrain_input_acceleration(input.direction));
        self.replicate_move_to_server(movement, delta_time, acceleration, now, ctx)
    }

    /// Simulates one move locally and returns whatever must go to the server now
    pub fn replicate_move_to_server(
        &mut self,
        movement: &mut CharacterMovement,
        delta_time: f32,
        new_acceleration: Vec3,
        now: f32,
        ctx: &MoveContext,
    ) -> Vec<ServerMessage> {
        let delta_time = self.update_timestamp_and_delta_time(delta_time);
        let acceleration = round_acceleration(new_acceleration.clamp_length_max(movement.config.max_acceleration));

        // Oldest unacknowledged move the server must not miss. The last
        // saved move may still combine, so it is not a candidate.
        let old_move = self.last_acked_move.as_ref().and_then(|acked| {
            let candidates = self.saved_moves.len().saturating_sub(1);
            self.saved_moves[..candidates]
                .iter()
                .find(|saved| !saved.old_time_stamp_before_reset && saved.is_important_move(acked))
                .map(|saved| (saved.timestamp, saved.acceleration, saved.compressed_flags()))
        });

        let mut new_move = self.create_saved_move();
        new_move.set_move_for(movement, self.current_timestamp, delta_time, acceleration, ctx);

        if let Some(pending) = self.pending_move() {
            let max_delta = self.config.client_max_response_time;
            if pending.can_combine_with(&new_move, max_delta, ctx.bases) {
                let start = pending.reverted_location(ctx.bases);
                // Don't rewind into something that has moved in since
                if !ctx.geometry.overlap_test(&movement.capsule(), start) {
                    tracing::trace!(
                        pending = pending.timestamp,
                        timestamp = new_move.timestamp,
                        "combining with pending move"
                    );
                    movement.revert_to(
                        start,
                        pending.start_rotation,
                        pending.start_velocity,
                        pending.start_base,
                        pending.start_floor,
                        ctx,
                    );
                    new_move.delta_time += pending.delta_time;
                    new_move.set_initial_position(movement, ctx);
                    if let Some(combined) = self.saved_moves.pop() {
                        self.free_move(combined);
                    }
                    self.has_pending_move = false;
                }
            }
        }

        if let Err(err) = movement.move_autonomous(new_move.delta_time, new_move.compressed_flags(), acceleration, ctx) {
            tracing::warn!(%err, timestamp = new_move.timestamp, "predicted move sanitized");
        }
        new_move.post_update(movement, ctx);
        self.saved_moves.push(new_move);

        if self.config.enable_move_combining && !self.has_pending_move && now - self.client_update_time < self.net_move_delta() {
            // Too soon to send; hold this move so the next one can join it
            self.has_pending_move = true;
            return Vec::new();
        }
        self.client_update_time = now;

        let mut messages = Vec::with_capacity(2);
        if let Some((old_timestamp, old_acceleration, old_flags)) = old_move {
            messages.push(ServerMessage::MoveOld {
                old_timestamp,
                old_acceleration: NetQuantize10::from_vec3(old_acceleration),
                old_flags,
            });
        }
        let view = pack_view(movement.rotation);
        let client_location = NetQuantize100::from_vec3(movement.location);
        let client_roll = compress_axis_to_byte(movement.rotation.roll);
        let count = self.saved_moves.len();
        let newest = &self.saved_moves[count - 1];
        let moved = wire_move(newest, view);
        if self.has_pending_move && count >= 2 {
            let pending = &self.saved_moves[count - 2];
            messages.push(ServerMessage::MoveDual {
                pending: wire_move(pending, pack_view(pending.saved_rotation)),
                moved,
                client_location,
                client_roll,
            });
        } else {
            messages.push(ServerMessage::Move {
                moved,
                client_location,
                client_roll,
            });
        }
        self.has_pending_move = false;
        messages
    }

    /// Index of the saved move with exactly `timestamp`, unless it was already acknowledged
    pub fn get_saved_move_index(&self, timestamp: f32) -> Option<usize> {
        if let Some(acked) = &self.last_acked_move {
            if !acked.old_time_stamp_before_reset && timestamp <= acked.timestamp {
                return None;
            }
        }
        self.saved_moves.iter().position(|saved| saved.timestamp == timestamp)
    }

    /// Drops every move up to and including `index`; that move becomes the last acknowledged one
    pub fn ack_move(&mut self, index: usize) {
        if index >= self.saved_moves.len() {
            return;
        }
        if self.has_pending_move && index == self.saved_moves.len() - 1 {
            self.has_pending_move = false;
        }
        let mut acked: Vec<SavedMove> = self.saved_moves.drain(..=index).collect();
        let newest = acked.pop();
        if let Some(previous) = std::mem::replace(&mut self.last_acked_move, newest) {
            self.free_move(previous);
        }
        for saved in acked {
            self.free_move(saved);
        }
    }

    pub fn client_ack_good_move(&mut self, timestamp: f32) {
        match self.get_saved_move_index(timestamp) {
            Some(index) => self.ack_move(index),
            None => {
                if self.last_acked_move.is_some() {
                    tracing::debug!(timestamp, "ack for unknown or already acknowledged move");
                }
            }
        }
    }

    /// Applies an authoritative correction. Returns false when it was ignored.
    ///
    /// A location relative to a base we cannot resolve is rejected; the move
    /// stays unacknowledged and a later correction will be absolute.
    #[allow(clippy::too_many_arguments)]
    pub fn client_adjust_position(
        &mut self,
        movement: &mut CharacterMovement,
        timestamp: f32,
        location: Vec3,
        velocity: Vec3,
        base: Option<BaseHandle>,
        base_relative: bool,
        ctx: &MoveContext,
    ) -> bool {
        let surface = base.and_then(|handle| ctx.bases.resolve(handle));
        if base.is_some() && surface.is_none() && base_relative {
            tracing::warn!(?base, timestamp, "relative correction against unresolved base, ignoring");
            return false;
        }
        let Some(index) = self.get_saved_move_index(timestamp) else {
            tracing::debug!(timestamp, "correction for unknown or already acknowledged move");
            return false;
        };
        self.ack_move(index);

        let mut world_location = location;
        if base_relative {
            if let Some(surface) = surface {
                world_location += surface.location;
            }
        }
        tracing::info!(
            timestamp,
            from = ?movement.location,
            to = ?world_location,
            "client position corrected"
        );
        movement.apply_server_correction(world_location, velocity, base, ctx);
        self.update_position = true;
        true
    }

    pub fn client_very_short_adjust_position(
        &mut self,
        movement: &mut CharacterMovement,
        timestamp: f32,
        location: Vec3,
        base: Option<BaseHandle>,
        base_relative: bool,
        ctx: &MoveContext,
    ) -> bool {
        self.client_adjust_position(movement, timestamp, location, Vec3::ZERO, base, base_relative, ctx)
    }

    /// Replays every unacknowledged move on top of a correction.
    /// Returns whether anything was replayed.
    pub fn client_update_position_after_server_update(
        &mut self,
        movement: &mut CharacterMovement,
        ctx: &MoveContext,
    ) -> bool {
        if !self.update_position {
            return false;
        }
        self.update_position = false;
        if self.saved_moves.is_empty() {
            return false;
        }

        let real_jump = movement.jump_pressed;
        let real_crouch = movement.wants_to_crouch;
        movement.force_next_floor_check = true;

        tracing::debug!(count = self.saved_moves.len(), "replaying unacknowledged moves");
        for saved in &mut self.saved_moves {
            if let Err(err) = movement.move_autonomous(saved.delta_time, saved.compressed_flags(), saved.acceleration, ctx) {
                tracing::warn!(%err, timestamp = saved.timestamp, "replayed move sanitized");
            }
            saved.post_update(movement, ctx);
        }
        if self.has_pending_move {
            if let Some(pending) = self.saved_moves.last_mut() {
                pending.force_no_combine = true;
            }
        }

        movement.jump_pressed = real_jump;
        movement.wants_to_crouch = real_crouch;
        movement.force_next_floor_check = true;
        true
    }

    /// Handles one server response: acks free moves, corrections snap and
    /// replay. Returns whether the character was corrected.
    pub fn handle_client_message(
        &mut self,
        movement: &mut CharacterMovement,
        message: &ClientMessage,
        ctx: &MoveContext,
    ) -> bool {
        let before = movement.location;
        let corrected = match *message {
            ClientMessage::AckGoodMove { timestamp } => {
                self.client_ack_good_move(timestamp);
                false
            }
            ClientMessage::AdjustPosition {
                timestamp,
                location,
                velocity,
                base,
                base_relative,
            } => self.client_adjust_position(movement, timestamp, location.to_vec3(), velocity, base, base_relative, ctx),
            ClientMessage::VeryShortAdjustPosition {
                timestamp,
                location,
                base,
                base_relative,
            } => self.client_very_short_adjust_position(movement, timestamp, location.to_vec3(), base, base_relative, ctx),
        };
        if corrected {
            self.client_update_position_after_server_update(movement, ctx);
            self.smooth_correction(before, movement.location);
        }
        corrected
    }
}

fn wire_move(saved: &SavedMove, view: u32) -> ClientMove {
    ClientMove {
        timestamp: saved.timestamp,
        acceleration: NetQuantize10::from_vec3(saved.acceleration),
        flags: saved.compressed_flags(),
        view,
    }
}
