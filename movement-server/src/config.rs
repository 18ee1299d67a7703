//! Host configuration: simulation rate, link conditions and the movement settings.

use std::path::Path;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use movement_core::config::MovementSettings;

use crate::error::{HostError, HostResult};
use crate::link::LinkConfig;

#[derive(Resource, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Fixed simulation frames per second on both ends
    pub tick_rate: u32,
    /// Simulated seconds the binary runs before printing its report
    pub run_seconds: f32,
    /// Seed for the arena layout and the scripted input
    pub seed: u64,
    /// Client/server character pairs, each with its own link
    pub agents: u32,
    /// Platforms sliding back and forth through the arena
    pub moving_platforms: u32,
    pub link: LinkConfig,
    pub settings: MovementSettings,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            run_seconds: 10.0,
            seed: 42,
            agents: 4,
            moving_platforms: 1,
            link: LinkConfig::default(),
            settings: MovementSettings::default(),
        }
    }
}

impl HostConfig {
    pub fn delta_time(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    pub fn total_frames(&self) -> u64 {
        (self.run_seconds * self.tick_rate as f32).round() as u64
    }

    pub fn validate(&self) -> HostResult<()> {
        if self.tick_rate == 0 {
            return Err(HostError::InvalidConfig("tick_rate must be positive".into()));
        }
        if self.agents == 0 {
            return Err(HostError::InvalidConfig("at least one agent is required".into()));
        }
        if !(self.run_seconds >= 0.0) {
            return Err(HostError::InvalidConfig("run_seconds must be non-negative".into()));
        }
        self.link.validate()?;
        self.settings.validate()?;
        Ok(())
    }

    /// Reads a RON file; missing fields keep their defaults
    pub fn load(path: &Path) -> HostResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = ron::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = HostConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.total_frames(), 600);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.ron");
        std::fs::write(&path, "(tick_rate: 30, link: (latency: 0.1, loss: 0.05))").unwrap();
        let config = HostConfig::load(&path).unwrap();
        assert_eq!(config.tick_rate, 30);
        assert!((config.link.latency - 0.1).abs() < f32::EPSILON);
        assert_eq!(config.link.max_packet_size, 1200);
        assert_eq!(config.settings.network.max_saved_move_count, 96);
    }

    #[test]
    fn test_bad_link_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.ron");
        std::fs::write(&path, "(link: (loss: 2.0))").unwrap();
        assert!(matches!(
            HostConfig::load(&path),
            Err(HostError::Link(crate::link::LinkError::InvalidConfig(_)))
        ));
    }
}
