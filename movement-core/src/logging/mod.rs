//! Structured logging for movement simulation and netcode.
//!
//! Built on `tracing`:
//! - Per-module level filters (prediction and reconciliation are chatty at debug)
//! - Idempotent initialization, safe to call from tests and plugins alike
//! - `TimingSpan` guards for timing replays and large simulation batches

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber when the app is built
pub struct LoggingPlugin {
    pub config: TracingConfig,
}

impl Default for LoggingPlugin {
    fn default() -> Self {
        Self {
            config: TracingConfig::default(),
        }
    }
}

impl Plugin for LoggingPlugin {
    fn build(&self, _app: &mut App) {
        init_tracing(&self.config);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Configuration for tracing initialization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    pub default_level: LogLevel,
    pub module_filters: Vec<(String, LogLevel)>,
    pub show_thread_ids: bool,
    pub show_targets: bool,
    pub show_file_line: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_level: LogLevel::Info,
            module_filters: vec![
                ("movement_core::movement".to_string(), LogLevel::Info),
                ("movement_core::prediction".to_string(), LogLevel::Info),
                ("movement_core::reconciliation".to_string(), LogLevel::Info),
                ("movement_core::net".to_string(), LogLevel::Warn),
            ],
            show_thread_ids: false,
            show_targets: true,
            show_file_line: false,
        }
    }
}

impl TracingConfig {
    /// Override (or add) the level for one module path
    pub fn with_filter(mut self, module: &str, level: LogLevel) -> Self {
        match self.module_filters.iter_mut().find(|(m, _)| m == module) {
            Some(entry) => entry.1 = level,
            None => self.module_filters.push((module.to_string(), level)),
        }
        self
    }

    pub fn to_env_filter_string(&self) -> String {
        let mut parts = vec![self.default_level.as_str().to_string()];
        for (module, level) in &self.module_filters {
            parts.push(format!("{}={}", module, level.as_str()));
        }
        parts.join(",")
    }
}

static TRACING_INIT: Once = Once::new();

pub fn init_tracing_default() {
    init_tracing(&TracingConfig::default());
}

/// First call wins; `RUST_LOG` takes precedence over the configured filters.
pub fn init_tracing(config: &TracingConfig) {
    let filter_str = config.to_env_filter_string();
    let (targets, thread_ids, file_line) = (
        config.show_targets,
        config.show_thread_ids,
        config.show_file_line,
    );
    TRACING_INIT.call_once(move || {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(targets)
            .with_thread_ids(thread_ids)
            .with_file(file_line)
            .with_line_number(file_line)
            .compact();

        // A host (e.g. bevy's LogPlugin) may already own the global subscriber
        let _ = subscriber.try_init();
    });
}

/// Enters an info span for the lifetime of the guard
pub struct TimingSpan {
    _span: tracing::span::EnteredSpan,
}

impl TimingSpan {
    pub fn new(name: &str) -> Self {
        let span = tracing::info_span!("movement", name = name);
        Self {
            _span: span.entered(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("TRACE"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("loud"), None);
    }

    #[test]
    fn test_log_level_as_str() {
        assert_eq!(LogLevel::Debug.as_str(), "debug");
        assert_eq!(LogLevel::Error.as_str(), "error");
    }

    #[test]
    fn test_env_filter_string() {
        let filter = TracingConfig::default().to_env_filter_string();
        assert!(filter.starts_with("info"));
        assert!(filter.contains("movement_core::net=warn"));
    }

    #[test]
    fn test_with_filter_overrides_existing() {
        let config = TracingConfig::default()
            .with_filter("movement_core::prediction", LogLevel::Trace)
            .with_filter("my_game", LogLevel::Debug);
        let filter = config.to_env_filter_string();
        assert!(filter.contains("movement_core::prediction=trace"));
        assert!(!filter.contains("movement_core::prediction=info"));
        assert!(filter.contains("my_game=debug"));
    }

    #[test]
    fn test_tracing_config_json_roundtrip() {
        let config = TracingConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let restored: TracingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.default_level, config.default_level);
        assert_eq!(restored.module_filters.len(), config.module_filters.len());
    }

    #[test]
    fn test_init_tracing_idempotent() {
        init_tracing_default();
        init_tracing_default();
        init_tracing(&TracingConfig::default());
    }

    #[test]
    fn test_timing_span() {
        init_tracing_default();
        let _span = TimingSpan::new("replay");
        tracing::debug!("inside span");
    }
}
