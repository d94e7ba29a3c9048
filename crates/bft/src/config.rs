//! BFT configuration.

use std::time::Duration;

/// Configuration for PBFT rounds.
#[derive(Debug, Clone)]
pub struct BftConfig {
    /// Timeout of each phase call to each replica.
    ///
    /// A phase that has not gathered a quorum once every call has answered
    /// or timed out fails the round. There is no view change.
    pub rpc_timeout: Duration,

    /// Votes required per certificate, overriding the shard map.
    pub majority_override: Option<usize>,
}

impl Default for BftConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_secs(2),
            majority_override: None,
        }
    }
}

impl BftConfig {
    /// Create a config with a custom phase timeout.
    pub fn with_rpc_timeout(rpc_timeout: Duration) -> Self {
        Self {
            rpc_timeout,
            ..Default::default()
        }
    }

    /// Create a config with a fixed majority.
    pub fn with_majority(majority: usize) -> Self {
        Self {
            majority_override: Some(majority),
            ..Default::default()
        }
    }
}
