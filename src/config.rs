//! Configuration management with environment variable support.
//!
//! This module provides centralized configuration for Flow Replay,
//! supporting:
//! - Environment variables for all configurable values
//! - Sensible defaults matching the recorder/player constants
//! - Builder-free settings structs for programmatic configuration
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `FLOW_REPLAY_IDLE_THRESHOLD_MS` | Quiet time before idle fires (ms) | `2000` |
//! | `FLOW_REPLAY_MIN_IDLE_MS` | Minimum idle window duration (ms) | `800` |
//! | `FLOW_REPLAY_STABILITY_MS` | Mutation stability window (ms) | `1500` |
//! | `FLOW_REPLAY_MAX_ASSERTIONS` | API assertions per idle window | `2` |
//! | `FLOW_REPLAY_STEP_TIMEOUT_MS` | Per-step driver timeout (ms) | `10000` |
//! | `FLOW_REPLAY_BASE_URL` | Base URL joined with recorded paths | none |
//! | `FLOW_REPLAY_SESSION_DIR` | Base directory for run artifacts | `/tmp/flow-replay` |

use std::env;
use std::sync::OnceLock;

// ============================================================================
// Default Values
// ============================================================================

/// Default quiet time after the last event before idle fires (ms)
pub const DEFAULT_IDLE_THRESHOLD_MS: i64 = 2000;

/// Default minimum idle window duration (ms)
pub const DEFAULT_MIN_IDLE_DURATION_MS: i64 = 800;

/// Default mutation stability window (ms)
pub const DEFAULT_STABILITY_THRESHOLD_MS: i64 = 1500;

/// Default cap on tracked mutations per stability report
pub const DEFAULT_MAX_TRACKED_MUTATIONS: usize = 3;

/// Default cap on API assertions per idle window
pub const DEFAULT_MAX_API_ASSERTIONS: usize = 2;

/// Default per-step driver timeout (ms)
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 10_000;

/// Default wait timeout for `assertApi` steps (ms)
pub const DEFAULT_API_WAIT_TIMEOUT_MS: u64 = 5_000;

/// Default session base directory
pub const DEFAULT_SESSION_DIR: &str = "/tmp/flow-replay";

/// Default viewport width (px)
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;

/// Default viewport height (px)
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 720;

/// Attribute that opts an element out of mutation tracking
pub const IGNORE_ATTRIBUTE: &str = "data-flow-replay-ignore";

// ============================================================================
// Environment Variable Names
// ============================================================================

/// Environment variable for the idle threshold
pub const ENV_IDLE_THRESHOLD_MS: &str = "FLOW_REPLAY_IDLE_THRESHOLD_MS";

/// Environment variable for the minimum idle duration
pub const ENV_MIN_IDLE_MS: &str = "FLOW_REPLAY_MIN_IDLE_MS";

/// Environment variable for the mutation stability window
pub const ENV_STABILITY_MS: &str = "FLOW_REPLAY_STABILITY_MS";

/// Environment variable for the assertion cap
pub const ENV_MAX_ASSERTIONS: &str = "FLOW_REPLAY_MAX_ASSERTIONS";

/// Environment variable for the per-step timeout
pub const ENV_STEP_TIMEOUT_MS: &str = "FLOW_REPLAY_STEP_TIMEOUT_MS";

/// Environment variable for the playback base URL
pub const ENV_BASE_URL: &str = "FLOW_REPLAY_BASE_URL";

/// Environment variable for the session directory
pub const ENV_SESSION_DIR: &str = "FLOW_REPLAY_SESSION_DIR";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration for Flow Replay
#[derive(Debug, Clone)]
pub struct Config {
    /// Recording-side settings
    pub record: RecordSettings,
    /// Playback-side settings
    pub playback: PlaybackSettings,
    /// Session configuration
    pub session: SessionSettings,
}

/// Recording-related settings
#[derive(Debug, Clone)]
pub struct RecordSettings {
    /// Quiet time before idle fires (ms)
    pub idle_threshold_ms: i64,
    /// Minimum idle window duration (ms)
    pub min_idle_duration_ms: i64,
    /// Mutation stability window (ms)
    pub stability_threshold_ms: i64,
    /// API assertions per idle window
    pub max_assertions: usize,
}

/// Playback-related settings
#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    /// Per-step driver timeout (ms)
    pub step_timeout_ms: u64,
    /// Base URL joined with recorded relative paths
    pub base_url: Option<String>,
}

/// Session-related settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Base directory for run-artifact storage
    pub base_dir: String,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            record: RecordSettings::from_env(),
            playback: PlaybackSettings::from_env(),
            session: SessionSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            record: RecordSettings::defaults(),
            playback: PlaybackSettings::defaults(),
            session: SessionSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RecordSettings {
    /// Create recording settings from environment variables
    pub fn from_env() -> Self {
        Self {
            idle_threshold_ms: parse_env(ENV_IDLE_THRESHOLD_MS, DEFAULT_IDLE_THRESHOLD_MS),
            min_idle_duration_ms: parse_env(ENV_MIN_IDLE_MS, DEFAULT_MIN_IDLE_DURATION_MS),
            stability_threshold_ms: parse_env(ENV_STABILITY_MS, DEFAULT_STABILITY_THRESHOLD_MS),
            max_assertions: parse_env(ENV_MAX_ASSERTIONS, DEFAULT_MAX_API_ASSERTIONS),
        }
    }

    /// Create recording settings with defaults
    pub fn defaults() -> Self {
        Self {
            idle_threshold_ms: DEFAULT_IDLE_THRESHOLD_MS,
            min_idle_duration_ms: DEFAULT_MIN_IDLE_DURATION_MS,
            stability_threshold_ms: DEFAULT_STABILITY_THRESHOLD_MS,
            max_assertions: DEFAULT_MAX_API_ASSERTIONS,
        }
    }
}

impl PlaybackSettings {
    /// Create playback settings from environment variables
    pub fn from_env() -> Self {
        Self {
            step_timeout_ms: parse_env(ENV_STEP_TIMEOUT_MS, DEFAULT_STEP_TIMEOUT_MS),
            base_url: env::var(ENV_BASE_URL).ok().filter(|s| !s.is_empty()),
        }
    }

    /// Create playback settings with defaults
    pub fn defaults() -> Self {
        Self {
            step_timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            base_url: None,
        }
    }
}

impl SessionSettings {
    /// Create session settings from environment variables
    pub fn from_env() -> Self {
        Self {
            base_dir: env::var(ENV_SESSION_DIR).unwrap_or_else(|_| DEFAULT_SESSION_DIR.to_string()),
        }
    }

    /// Create session settings with defaults
    pub fn defaults() -> Self {
        Self {
            base_dir: DEFAULT_SESSION_DIR.to_string(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Get session base directory (convenience function)
pub fn session_base_dir() -> String {
    get().session.base_dir.clone()
}

/// Get the per-step timeout (convenience function)
pub fn step_timeout_ms() -> u64 {
    get().playback.step_timeout_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::defaults();
        assert_eq!(config.record.idle_threshold_ms, 2000);
        assert_eq!(config.record.min_idle_duration_ms, 800);
        assert_eq!(config.record.stability_threshold_ms, 1500);
        assert_eq!(config.record.max_assertions, 2);
        assert_eq!(config.playback.step_timeout_ms, 10_000);
        assert_eq!(config.session.base_dir, DEFAULT_SESSION_DIR);
        assert!(config.playback.base_url.is_none());
    }

    #[test]
    fn test_parse_env_falls_back_on_garbage() {
        // Unset or malformed values fall back to the default.
        unsafe { env::set_var("FLOW_REPLAY_TEST_PARSE", "not-a-number") };
        let value: u64 = parse_env("FLOW_REPLAY_TEST_PARSE", 42);
        assert_eq!(value, 42);
        unsafe { env::remove_var("FLOW_REPLAY_TEST_PARSE") };
    }
}
