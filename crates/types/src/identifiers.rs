//! Domain-specific identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Replica (server) number, unique across all clusters.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ReplicaId(pub u64);

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Replica({})", self.0)
    }
}

/// Cluster (shard) number. Clusters are numbered from 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ClusterId(pub u64);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cluster({})", self.0)
    }
}

/// Account identifier. Accounts are numbered from 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Account({})", self.0)
    }
}

/// Per-cluster sequence number assigned by the leader.
///
/// Zero means "not yet assigned"; the first assigned number is 1.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// The unassigned sequence number.
    pub const NONE: Self = SequenceNumber(0);

    /// First sequence number handed out in a cluster.
    pub const FIRST: Self = SequenceNumber(1);

    /// Get the next sequence number.
    pub fn next(self) -> Self {
        SequenceNumber(self.0 + 1)
    }

    /// Get the previous sequence number (saturating at zero).
    pub fn prev(self) -> Self {
        SequenceNumber(self.0.saturating_sub(1))
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

/// View number. The leader of a cluster is a function of the view.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ViewNumber(pub u64);

impl ViewNumber {
    /// View every replica starts in.
    pub const INITIAL: Self = ViewNumber(1);
}

impl Default for ViewNumber {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl fmt::Display for ViewNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "View({})", self.0)
    }
}

/// Client-generated transaction identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxnId(pub String);

impl TxnId {
    /// Create a transaction id.
    pub fn new(id: impl Into<String>) -> Self {
        TxnId(id.into())
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TxnId {
    fn from(id: &str) -> Self {
        TxnId(id.to_string())
    }
}

impl From<String> for TxnId {
    fn from(id: String) -> Self {
        TxnId(id)
    }
}
