//! Error types for the movement core.

use bevy::prelude::Vec3;
use thiserror::Error;

/// Errors raised by movement simulation and configuration loading
#[derive(Debug, Error)]
pub enum MovementError {
    #[error("non-finite {what}: {value:?}")]
    NonFinite { what: &'static str, value: Vec3 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config ron error: {0}")]
    Ron(#[from] ron::error::SpannedError),

    #[error("config json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by the wire codec and message channel
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(bincode::Error),

    #[error("decode failed: {0}")]
    Decode(bincode::Error),

    #[error("channel disconnected")]
    Disconnected,
}

pub type MovementResult<T> = Result<T, MovementError>;

/// Returns an error when any component of `value` is NaN or infinite
pub fn ensure_finite(what: &'static str, value: Vec3) -> MovementResult<Vec3> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MovementError::NonFinite { what, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_finite_passes_regular_values() {
        let v = Vec3::new(1.0, -2.0, 3.0);
        assert_eq!(ensure_finite("velocity", v).unwrap(), v);
    }

    #[test]
    fn test_ensure_finite_rejects_nan() {
        let err = ensure_finite("velocity", Vec3::new(f32::NAN, 0.0, 0.0)).unwrap_err();
        assert!(err.to_string().contains("velocity"));
    }

    #[test]
    fn test_ensure_finite_rejects_infinity() {
        assert!(ensure_finite("accel", Vec3::new(0.0, f32::INFINITY, 0.0)).is_err());
    }
}
