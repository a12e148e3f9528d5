//! Configuration module for the Race Replay server.
//!
//! Provides configuration management via environment variables, CLI arguments,
//! and the fixed tuning constants of the replay pipeline.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Output cadence of the replay stream, in frames per second.
pub const OUTPUT_FPS: u32 = 25;

/// Tuning constants for the replay pipeline.
///
/// These govern frame derivation and caching behavior. Correctness does not
/// depend on the cache thresholds; the derivation constants change what the
/// viewer sees and should only be adjusted together with the client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Tuning {
    /// Seconds of stalled race distance before a driver is marked Retired.
    pub retirement_stall_seconds: f64,
    /// Race-time interval between gap recomputations.
    pub gap_refresh_seconds: f64,
    /// Lower bound on instantaneous speed used in the gap formula, m/s.
    pub speed_floor: f64,
    /// Upper bound on the playback speed multiplier.
    pub max_speed: f64,
    /// Sessions with at most this many frames are eagerly pre-encoded.
    pub small_session_threshold: usize,
    /// Capacity of the per-session encoded-frame LRU for large sessions.
    pub lru_capacity: usize,
    /// Bound between attachment and a terminal loading event.
    pub load_timeout: Duration,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            retirement_stall_seconds: 30.0,
            gap_refresh_seconds: 3.0,
            speed_floor: 5.0,
            max_speed: 8.0,
            small_session_threshold: 50_000,
            lru_capacity: 1_000,
            load_timeout: Duration::from_secs(300),
        }
    }
}

/// CLI arguments for the Race Replay server
#[derive(Parser, Debug, Clone)]
#[command(name = "race-replay-server")]
#[command(author = "Race Replay Team")]
#[command(version = "0.1.0")]
#[command(about = "Replay server for motorsport telemetry")]
pub struct CliArgs {
    /// Socket address to bind the HTTP/WebSocket listener to
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:8000")]
    pub bind_addr: SocketAddr,

    /// Base URL of the upstream telemetry provider
    #[arg(long, env = "UPSTREAM_URL", default_value = "http://localhost:8100")]
    pub upstream_url: String,

    /// Directory for persisted session artifacts (omit to disable the cache)
    #[arg(long, env = "ARTIFACT_DIR")]
    pub artifact_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Maximum playback speed multiplier accepted from clients
    #[arg(long, env = "MAX_SPEED", default_value = "8.0")]
    pub max_speed: f64,

    /// Frame-count threshold below which sessions are eagerly pre-encoded
    #[arg(long, env = "SMALL_SESSION_THRESHOLD", default_value = "50000")]
    pub small_session_threshold: usize,

    /// Capacity of the encoded-frame LRU for large sessions
    #[arg(long, env = "LRU_CAPACITY", default_value = "1000")]
    pub lru_capacity: usize,

    /// Seconds an attachment waits for a terminal loading event
    #[arg(long, env = "LOAD_TIMEOUT_SECONDS", default_value = "300")]
    pub load_timeout_seconds: u64,
}

impl CliArgs {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_speed <= 0.0 {
            return Err(ConfigError::InvalidMaxSpeed(self.max_speed));
        }

        if self.lru_capacity == 0 {
            return Err(ConfigError::InvalidLruCapacity);
        }

        if self.upstream_url.is_empty() {
            return Err(ConfigError::MissingUpstreamUrl);
        }

        Ok(())
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Listener bind address
    pub bind_addr: SocketAddr,
    /// Upstream telemetry provider base URL
    pub upstream_url: String,
    /// Artifact cache directory, if persistence is enabled
    pub artifact_dir: Option<PathBuf>,
    /// Log level
    pub log_level: String,
    /// Pipeline tuning constants
    pub tuning: Tuning,
}

impl Config {
    /// Create configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        args.validate()?;

        let tuning = Tuning {
            max_speed: args.max_speed,
            small_session_threshold: args.small_session_threshold,
            lru_capacity: args.lru_capacity,
            load_timeout: Duration::from_secs(args.load_timeout_seconds),
            ..Tuning::default()
        };

        Ok(Self {
            bind_addr: args.bind_addr,
            upstream_url: args.upstream_url,
            artifact_dir: args.artifact_dir,
            log_level: args.log_level,
            tuning,
        })
    }

    /// Load configuration from environment and CLI
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let args = CliArgs::parse();
        Self::from_args(args)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".parse().expect("valid literal"),
            upstream_url: "http://localhost:8100".to_string(),
            artifact_dir: None,
            log_level: "info".to_string(),
            tuning: Tuning::default(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid maximum playback speed: {0}. Must be positive")]
    InvalidMaxSpeed(f64),

    #[error("Encoded-frame LRU capacity must be non-zero")]
    InvalidLruCapacity,

    #[error("Upstream provider URL must not be empty")]
    MissingUpstreamUrl,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_args() -> CliArgs {
        CliArgs {
            bind_addr: "127.0.0.1:8000".parse().unwrap(),
            upstream_url: "http://localhost:8100".to_string(),
            artifact_dir: None,
            log_level: "info".to_string(),
            max_speed: 8.0,
            small_session_threshold: 50_000,
            lru_capacity: 1_000,
            load_timeout_seconds: 300,
        }
    }

    #[test]
    fn test_default_tuning() {
        let tuning = Tuning::default();
        assert_eq!(tuning.retirement_stall_seconds, 30.0);
        assert_eq!(tuning.gap_refresh_seconds, 3.0);
        assert_eq!(tuning.small_session_threshold, 50_000);
        assert_eq!(tuning.load_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_config_validation_invalid_speed() {
        let mut args = test_args();
        args.max_speed = 0.0;
        assert!(matches!(args.validate(), Err(ConfigError::InvalidMaxSpeed(_))));
    }

    #[test]
    fn test_config_validation_zero_lru() {
        let mut args = test_args();
        args.lru_capacity = 0;
        assert!(matches!(args.validate(), Err(ConfigError::InvalidLruCapacity)));
    }

    #[test]
    fn test_config_from_args_overrides_tuning() {
        let mut args = test_args();
        args.small_session_threshold = 10;
        args.load_timeout_seconds = 5;

        let config = Config::from_args(args).unwrap();
        assert_eq!(config.tuning.small_session_threshold, 10);
        assert_eq!(config.tuning.load_timeout, Duration::from_secs(5));
        // Untouched constants keep their defaults
        assert_eq!(config.tuning.speed_floor, 5.0);
    }
}
