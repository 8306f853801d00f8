//! Consensus configuration.

use serde::Deserialize;
use std::time::Duration;

/// Immutable consensus settings, assembled once at startup and passed into
/// component constructors.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base timeout for every phase, in milliseconds. Doubles on reduction
    /// timeouts and resets on success.
    pub default_timeout_ms: u64,

    /// Upper bound for the backed-off timeout, in milliseconds.
    pub max_timeout_ms: u64,

    /// Seats drawn per voting committee.
    pub committee_size: usize,

    /// Verification workers feeding each accumulator.
    pub accumulator_workers: usize,

    /// Default lock time applied to stakes and bids without an explicit one.
    pub default_lock_time: u64,

    /// Default amount used by the dev block generator's bid.
    pub default_amount: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5_000,
            max_timeout_ms: 60_000,
            committee_size: 64,
            accumulator_workers: 4,
            default_lock_time: 250_000,
            default_amount: 50,
        }
    }
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.max_timeout_ms)
    }

    /// A configuration with short timeouts for tests.
    pub fn mock() -> Self {
        Self {
            default_timeout_ms: 100,
            max_timeout_ms: 1_000,
            committee_size: 64,
            accumulator_workers: 2,
            default_lock_time: 1_000,
            default_amount: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.committee_size, 64);
    }

    #[test]
    fn deserializes_with_partial_fields() {
        let config: Config = toml::from_str("committee_size = 50").unwrap();
        assert_eq!(config.committee_size, 50);
        assert_eq!(config.default_timeout_ms, 5_000);
    }
}
