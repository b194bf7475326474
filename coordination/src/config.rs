//! Coordination configuration.
//!
//! All tunables recognized by the monitor, the signal protocol, and the
//! consensus validator live here, with their designed defaults. Values can
//! come from a TOML file, from environment variables, or from the defaults;
//! `validate()` must pass before any component is constructed.

use std::path::Path;

use serde::Deserialize;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no shared secret configured: set COORDINATION_SHARED_SECRET or the shared_secret option")]
    MissingSharedSecret,

    #[error("{field} = {value} is out of range (expected {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level coordination configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinationConfig {
    /// Heartbeat age before a warning is counted (default 120s).
    pub stale_threshold_ms: u64,
    /// Monitor sweep cadence (default 30s).
    pub monitor_interval_ms: u64,
    /// Stale warnings before a coordinator is declared dead (default 3).
    pub max_warnings: u32,
    /// TTL on persisted heartbeat records (default 5 min).
    pub heartbeat_ttl_secs: u64,
    /// TTL on undelivered signal envelopes (default 24 h).
    pub signal_ttl_secs: u64,
    /// TTL on acknowledgement envelopes (default 5 min).
    pub ack_ttl_secs: u64,
    /// How long `send_signal_with_ack` waits before giving up (default 5s).
    pub ack_timeout_ms: u64,
    /// Minimum votes required before consensus may be attempted (default 4).
    pub min_validators: usize,
    /// Byzantine bound: abort the round when the malicious fraction exceeds
    /// this ratio (default 0.33, f < n/3).
    pub max_malicious_ratio: f64,
    /// Pass ratio required for consensus (default 0.67).
    pub consensus_threshold: f64,
    /// Whether vote signatures are verified (default true).
    pub signature_validation: bool,
    /// Pre-shared secret for ACK and proof signatures. Required: there is no
    /// generated fallback, since a process-local secret would make
    /// cross-coordinator verification impossible.
    pub shared_secret: String,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            stale_threshold_ms: env_u64("COORDINATION_STALE_THRESHOLD_MS", 120_000),
            monitor_interval_ms: env_u64("COORDINATION_MONITOR_INTERVAL_MS", 30_000),
            max_warnings: env_u64("COORDINATION_MAX_WARNINGS", 3) as u32,
            heartbeat_ttl_secs: 300,
            signal_ttl_secs: 86_400,
            ack_ttl_secs: 300,
            ack_timeout_ms: env_u64("COORDINATION_ACK_TIMEOUT_MS", 5_000),
            min_validators: env_u64("COORDINATION_MIN_VALIDATORS", 4) as usize,
            max_malicious_ratio: 0.33,
            consensus_threshold: 0.67,
            signature_validation: true,
            shared_secret: std::env::var("COORDINATION_SHARED_SECRET").unwrap_or_default(),
        }
    }
}

fn env_u64(var: &str, default: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl CoordinationConfig {
    /// Load configuration from a TOML file, with defaults (and env overrides)
    /// filling any omitted options.
    pub fn from_toml_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Check every option against its allowed range.
    ///
    /// Fails fast on a missing shared secret rather than letting signature
    /// verification silently fail later.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.shared_secret.is_empty() {
            return Err(ConfigError::MissingSharedSecret);
        }
        for (field, value) in [
            ("stale_threshold_ms", self.stale_threshold_ms),
            ("monitor_interval_ms", self.monitor_interval_ms),
            ("heartbeat_ttl_secs", self.heartbeat_ttl_secs),
            ("signal_ttl_secs", self.signal_ttl_secs),
            ("ack_ttl_secs", self.ack_ttl_secs),
            ("ack_timeout_ms", self.ack_timeout_ms),
            ("max_warnings", self.max_warnings as u64),
            ("min_validators", self.min_validators as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        if !(self.max_malicious_ratio > 0.0 && self.max_malicious_ratio < 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "max_malicious_ratio",
                value: self.max_malicious_ratio,
                min: 0.0,
                max: 1.0,
            });
        }
        if !(self.consensus_threshold > 0.0 && self.consensus_threshold <= 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "consensus_threshold",
                value: self.consensus_threshold,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(())
    }

    /// A validated config with the given secret, for embedding and tests.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            shared_secret: secret.into(),
            ..Self::default()
        }
    }
}
