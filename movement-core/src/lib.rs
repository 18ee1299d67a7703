//! Character Movement - Core Library
//!
//! Deterministic kinematic movement for capsule characters, plus the
//! networking protocol that keeps a predicting client and an authoritative
//! server in agreement:
//! - Movement modes (walking, falling, flying, swimming, custom) and their transitions
//! - Floor detection, perching and step traversal
//! - Movement bases with relative positioning
//! - Client prediction with saved moves, move combining and replay
//! - Server reconciliation with timestamp validation and corrections
//! - Wire messages, quantization and a bincode codec
//! - Avoidance hook and parallel multi-agent stepping

pub mod avoidance;
pub mod base;
pub mod config;
pub mod constants;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod movement;
pub mod net;
pub mod prediction;
pub mod reconciliation;
pub mod rotator;

pub use error::{CodecError, MovementError, MovementResult};
pub use geometry::{MoveContext, MovementScene};
pub use movement::{CharacterMovement, MovementMode, MovementPlugin};
pub use prediction::ClientPredictionData;
pub use reconciliation::ServerPredictionData;
