//! Messages exchanged between a predicting client and the authoritative server.
//!
//! [`ServerMessage`] travels client to server (the server handles it),
//! [`ClientMessage`] travels server to client.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use super::quantize::{NetQuantize10, NetQuantize100};
use crate::base::BaseHandle;

pub const FLAG_JUMP_PRESSED: u8 = 0x01;
pub const FLAG_WANTS_TO_CROUCH: u8 = 0x02;

/// Input of one saved move as the server sees it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClientMove {
    pub timestamp: f32,
    pub acceleration: NetQuantize10,
    pub flags: u8,
    /// Packed yaw and pitch, see [`super::quantize::pack_view`]
    pub view: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    Move {
        moved: ClientMove,
        client_location: NetQuantize100,
        client_roll: u8,
    },
    /// A held-back move sent together with the newest one
    MoveDual {
        pending: ClientMove,
        moved: ClientMove,
        client_location: NetQuantize100,
        client_roll: u8,
    },
    /// Resend of an unacknowledged move that changed input significantly
    MoveOld {
        old_timestamp: f32,
        old_acceleration: NetQuantize10,
        old_flags: u8,
    },
}

impl ServerMessage {
    /// Timestamp of the newest move carried
    pub fn timestamp(&self) -> f32 {
        match self {
            ServerMessage::Move { moved, .. } | ServerMessage::MoveDual { moved, .. } => moved.timestamp,
            ServerMessage::MoveOld { old_timestamp, .. } => *old_timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    AckGoodMove {
        timestamp: f32,
    },
    AdjustPosition {
        timestamp: f32,
        /// World location, or an offset from `base` when `base_relative` is set
        location: NetQuantize100,
        velocity: Vec3,
        base: Option<BaseHandle>,
        base_relative: bool,
    },
    /// Correction for a character that ended at rest
    VeryShortAdjustPosition {
        timestamp: f32,
        location: NetQuantize100,
        base: Option<BaseHandle>,
        base_relative: bool,
    },
}

impl ClientMessage {
    pub fn timestamp(&self) -> f32 {
        match self {
            ClientMessage::AckGoodMove { timestamp }
            | ClientMessage::AdjustPosition { timestamp, .. }
            | ClientMessage::VeryShortAdjustPosition { timestamp, .. } => *timestamp,
        }
    }

    pub fn is_correction(&self) -> bool {
        !matches!(self, ClientMessage::AckGoodMove { .. })
    }
}
