//! Core types for sharded BFT transaction processing.
//!
//! Everything every other crate agrees on: identifiers, digests, keys,
//! domain-separated signing messages, transactions, votes, certificates and
//! the shard membership snapshot.

mod certificate;
mod consensus;
mod crypto;
mod hash;
mod identifiers;
pub mod signing;
mod topology;
mod transaction;

pub use certificate::QuorumCertificate;
pub use consensus::{ConsensusMessage, Phase, RoundKind};
pub use crypto::{KeyPair, PublicKey, Signature};
pub use hash::{Hash, HexError};
pub use identifiers::{AccountId, ClusterId, ReplicaId, SequenceNumber, TxnId, ViewNumber};
pub use topology::{
    default_majority, ReplicaInfo, ShardMap, SharedTopology, Topology, TopologyError,
};
pub use transaction::{unix_millis, Outcome, Transaction, TxnKind, TxnStatus};
