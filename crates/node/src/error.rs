//! Errors raised while bringing a replica up.

use crate::config::ConfigError;
use thiserror::Error;

/// Errors that can occur when starting a replica.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("metrics setup failed: {0}")]
    Metrics(#[from] hdrhistogram::CreationError),

    #[error("{0} is not a member of any cluster")]
    NotInShardMap(byzshard_types::ReplicaId),
}
