//! Session statistics: traffic, acknowledgements, corrections and drift.
//!
//! The fingerprint chains the authoritative state digests of every frame,
//! so two runs with the same config can be compared with one number.

use bevy::prelude::*;
use serde::Serialize;
use sha3::{Digest, Sha3_256};

#[derive(Resource, Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub frames: u64,
    pub messages_up: u64,
    pub bytes_up: u64,
    pub messages_down: u64,
    pub bytes_down: u64,
    pub acks: u64,
    pub corrections: u64,
    pub send_errors: u64,
    /// Largest predicted/authoritative distance seen at the end of a frame, in
    /// cm. While moving this includes the client's lead over the server.
    pub max_divergence: f32,
    pub final_divergence: f32,
    pub fingerprint: String,
    #[serde(skip)]
    chain: [u8; 32],
}

impl SessionStats {
    pub fn record_divergence(&mut self, distance: f32) {
        self.max_divergence = self.max_divergence.max(distance);
    }

    /// Folds one frame's authoritative digests into the run fingerprint
    pub fn chain_digests(&mut self, digests: &[u64]) {
        let mut hasher = Sha3_256::new();
        hasher.update(self.chain);
        for digest in digests {
            hasher.update(digest.to_le_bytes());
        }
        self.chain.copy_from_slice(&hasher.finalize());
        self.fingerprint = self.chain[..8].iter().map(|b| format!("{b:02x}")).collect();
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}
