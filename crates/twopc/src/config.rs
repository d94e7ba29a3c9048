//! Configuration for cross-cluster commit.

use std::time::Duration;

/// Timeouts of the two sides of a cross-cluster transaction.
#[derive(Debug, Clone)]
pub struct TwoPcConfig {
    /// How long the coordinator leader waits for the participant's prepare
    /// response before deciding Abort.
    pub decision_timeout: Duration,

    /// How long the participant leader waits for the coordinator's decision
    /// after reporting ready before aborting its side.
    pub participant_timeout: Duration,

    /// Timeout of each cross-cluster call.
    pub rpc_timeout: Duration,
}

impl Default for TwoPcConfig {
    fn default() -> Self {
        Self {
            decision_timeout: Duration::from_secs(5),
            participant_timeout: Duration::from_secs(10),
            rpc_timeout: Duration::from_secs(2),
        }
    }
}

impl TwoPcConfig {
    /// Create a config with custom wait windows.
    pub fn with_timeouts(decision_timeout: Duration, participant_timeout: Duration) -> Self {
        Self {
            decision_timeout,
            participant_timeout,
            ..Default::default()
        }
    }
}
