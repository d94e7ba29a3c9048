//! Node configuration.
//!
//! Every section has working defaults. [`NodeConfig::from_toml_str`] reads
//! the same structure from TOML, with durations given as `*_ms` integers:
//!
//! ```toml
//! [bft]
//! rpc_timeout_ms = 2000
//!
//! [two_pc]
//! decision_timeout_ms = 5000
//! participant_timeout_ms = 10000
//!
//! [retry]
//! interval_ms = 7000
//! stall_after_ms = 7000
//! ```

use byzshard_bft::BftConfig;
use byzshard_execution::SequencerConfig;
use byzshard_twopc::TwoPcConfig;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while reading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Configuration for the retry supervisor.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Whether the supervisor runs at all.
    pub enabled: bool,

    /// Time between two sweeps.
    pub interval: Duration,

    /// Age after which a transaction still pending consensus counts as stalled.
    pub stall_after: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(7),
            stall_after: Duration::from_secs(7),
        }
    }
}

impl RetryConfig {
    /// Supervisor switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Create a config with a custom sweep period and stall age.
    pub fn with_timing(interval: Duration, stall_after: Duration) -> Self {
        Self {
            enabled: true,
            interval,
            stall_after,
        }
    }
}

/// Configuration for catch-up.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Whether catch-up hints from the leader trigger a sync.
    pub enabled: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Everything a replica is configured with.
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    pub bft: BftConfig,
    pub two_pc: TwoPcConfig,
    pub sequencer: SequencerConfig,
    pub retry: RetryConfig,
    pub sync: SyncConfig,
}

impl NodeConfig {
    /// Set the PBFT configuration.
    pub fn with_bft(mut self, bft: BftConfig) -> Self {
        self.bft = bft;
        self
    }

    /// Set the 2PC configuration.
    pub fn with_two_pc(mut self, two_pc: TwoPcConfig) -> Self {
        self.two_pc = two_pc;
        self
    }

    /// Set the retry supervisor configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the catch-up configuration.
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Parse a configuration, filling missing fields with defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(text)?;
        file.into_config()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TOML layout
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    bft: BftSection,
    two_pc: TwoPcSection,
    sequencer: SequencerSection,
    retry: RetrySection,
    sync: SyncSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BftSection {
    rpc_timeout_ms: Option<u64>,
    majority_override: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TwoPcSection {
    decision_timeout_ms: Option<u64>,
    participant_timeout_ms: Option<u64>,
    rpc_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SequencerSection {
    signal_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RetrySection {
    enabled: Option<bool>,
    interval_ms: Option<u64>,
    stall_after_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SyncSection {
    enabled: Option<bool>,
}

fn millis(field: &'static str, value: Option<u64>, default: Duration) -> Result<Duration, ConfigError> {
    match value {
        Some(0) => Err(ConfigError::Zero { field }),
        Some(ms) => Ok(Duration::from_millis(ms)),
        None => Ok(default),
    }
}

impl FileConfig {
    fn into_config(self) -> Result<NodeConfig, ConfigError> {
        let defaults = NodeConfig::default();

        let bft = BftConfig {
            rpc_timeout: millis(
                "bft.rpc_timeout_ms",
                self.bft.rpc_timeout_ms,
                defaults.bft.rpc_timeout,
            )?,
            majority_override: match self.bft.majority_override {
                Some(0) => return Err(ConfigError::Zero { field: "bft.majority_override" }),
                other => other,
            },
        };

        let two_pc = TwoPcConfig {
            decision_timeout: millis(
                "two_pc.decision_timeout_ms",
                self.two_pc.decision_timeout_ms,
                defaults.two_pc.decision_timeout,
            )?,
            participant_timeout: millis(
                "two_pc.participant_timeout_ms",
                self.two_pc.participant_timeout_ms,
                defaults.two_pc.participant_timeout,
            )?,
            rpc_timeout: millis(
                "two_pc.rpc_timeout_ms",
                self.two_pc.rpc_timeout_ms,
                defaults.two_pc.rpc_timeout,
            )?,
        };

        let sequencer = match self.sequencer.signal_capacity {
            Some(0) => return Err(ConfigError::Zero { field: "sequencer.signal_capacity" }),
            Some(capacity) => SequencerConfig::with_signal_capacity(capacity),
            None => defaults.sequencer,
        };

        let retry = RetryConfig {
            enabled: self.retry.enabled.unwrap_or(defaults.retry.enabled),
            interval: millis(
                "retry.interval_ms",
                self.retry.interval_ms,
                defaults.retry.interval,
            )?,
            stall_after: millis(
                "retry.stall_after_ms",
                self.retry.stall_after_ms,
                defaults.retry.stall_after,
            )?,
        };

        let sync = SyncConfig {
            enabled: self.sync.enabled.unwrap_or(defaults.sync.enabled),
        };

        Ok(NodeConfig {
            bft,
            two_pc,
            sequencer,
            retry,
            sync,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = NodeConfig::from_toml_str("").unwrap();
        assert_eq!(config.bft.rpc_timeout, Duration::from_secs(2));
        assert_eq!(config.bft.majority_override, None);
        assert_eq!(config.two_pc.decision_timeout, Duration::from_secs(5));
        assert_eq!(config.two_pc.participant_timeout, Duration::from_secs(10));
        assert_eq!(config.sequencer.signal_capacity, 1024);
        assert!(config.retry.enabled);
        assert_eq!(config.retry.interval, Duration::from_secs(7));
        assert!(config.sync.enabled);
    }

    #[test]
    fn test_sections_override_fields() {
        let config = NodeConfig::from_toml_str(
            r#"
            [bft]
            rpc_timeout_ms = 250
            majority_override = 2

            [two_pc]
            decision_timeout_ms = 800

            [retry]
            enabled = false
            stall_after_ms = 1500

            [sync]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.bft.rpc_timeout, Duration::from_millis(250));
        assert_eq!(config.bft.majority_override, Some(2));
        assert_eq!(config.two_pc.decision_timeout, Duration::from_millis(800));
        assert_eq!(config.two_pc.participant_timeout, Duration::from_secs(10));
        assert!(!config.retry.enabled);
        assert_eq!(config.retry.stall_after, Duration::from_millis(1500));
        assert_eq!(config.retry.interval, Duration::from_secs(7));
        assert!(!config.sync.enabled);
    }

    #[test]
    fn test_zero_duration_rejected() {
        let err = NodeConfig::from_toml_str("[retry]\ninterval_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Zero { field: "retry.interval_ms" }));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = NodeConfig::from_toml_str("[bft]\nview_change_ms = 10\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
