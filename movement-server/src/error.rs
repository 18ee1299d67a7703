//! Errors raised while configuring and running the host.

use thiserror::Error;

use movement_core::MovementError;

use crate::link::LinkError;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config ron error: {0}")]
    Ron(#[from] ron::error::SpannedError),

    #[error(transparent)]
    Movement(#[from] MovementError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("invalid host config: {0}")]
    InvalidConfig(String),
}

pub type HostResult<T> = Result<T, HostError>;
