//! Pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default global slot limit.
fn default_max() -> u32 {
    6
}

/// Default idle time before a surplus worker is detached: 60 seconds.
fn default_max_idle_time_ms() -> u64 {
    60_000
}

/// Self-checking defaults to on; disable only to shave overhead in
/// production.
fn default_self_checking() -> bool {
    true
}

/// Configuration for a [`Pool`](crate::core::Pool).
///
/// # Example
///
/// ```rust
/// use procpool::config::PoolConfig;
///
/// let config = PoolConfig::new()
///     .with_max(12)
///     .with_max_idle_time_ms(30_000);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum worker slots across all groups.
    #[serde(default = "default_max")]
    pub max: u32,

    /// Workers idle longer than this are detached, down to each group's
    /// minimum. Zero disables idle eviction.
    #[serde(default = "default_max_idle_time_ms")]
    pub max_idle_time_ms: u64,

    /// Whether the invariant verifier runs on every public mutator.
    #[serde(default = "default_self_checking")]
    pub self_checking: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max: default_max(),
            max_idle_time_ms: default_max_idle_time_ms(),
            self_checking: default_self_checking(),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the global slot limit.
    #[must_use]
    pub fn with_max(mut self, max: u32) -> Self {
        self.max = max;
        self
    }

    /// Set the idle-eviction threshold in milliseconds.
    #[must_use]
    pub fn with_max_idle_time_ms(mut self, ms: u64) -> Self {
        self.max_idle_time_ms = ms;
        self
    }

    /// Toggle the invariant verifier.
    #[must_use]
    pub fn with_self_checking(mut self, enabled: bool) -> Self {
        self.self_checking = enabled;
        self
    }

    /// The idle-eviction threshold as a `Duration`.
    #[must_use]
    pub fn max_idle_time(&self) -> Duration {
        Duration::from_millis(self.max_idle_time_ms)
    }

    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max == 0 {
            return Err("max must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse a configuration from a JSON string and validate it.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation error description.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let config: PoolConfig =
            serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        config.validate()?;
        Ok(config)
    }
}
