//! Error taxonomy for consensus, execution and 2PC.

use crate::store::StoreError;
use crate::transport::RpcError;
use byzshard_types::{
    AccountId, ClusterId, Phase, ReplicaId, SequenceNumber, TopologyError, TxnId, TxnStatus,
    ViewNumber,
};
use thiserror::Error;

/// The transaction itself is not acceptable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("insufficient balance in {account}: have {balance}, need {amount}")]
    InsufficientBalance {
        account: AccountId,
        balance: u64,
        amount: u64,
    },

    #[error("duplicate transaction id {0}")]
    DuplicateTxn(TxnId),

    #[error("digest does not match transaction fields")]
    DigestMismatch,

    #[error("view mismatch: expected {expected}, got {got}")]
    ViewMismatch { expected: ViewNumber, got: ViewNumber },

    #[error("sequence mismatch: expected {expected}, got {got}")]
    SequenceMismatch {
        expected: SequenceNumber,
        got: SequenceNumber,
    },

    #[error("unknown transaction {0}")]
    UnknownTxn(TxnId),

    #[error("not the leader (leader is {leader:?})")]
    NotLeader { leader: Option<ReplicaId> },

    #[error("transaction {0} is already {1}")]
    AlreadyFinal(TxnId, TxnStatus),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error(transparent)]
    Topology(#[from] TopologyError),
}

/// A vote, certificate or message could not be authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("bad signature from {0}")]
    BadSignature(ReplicaId),

    #[error("unknown signer {0}")]
    UnknownSigner(ReplicaId),

    #[error("{signer} is not a member of {cluster}")]
    ForeignSigner {
        signer: ReplicaId,
        cluster: ClusterId,
    },

    #[error("duplicate vote from {0}")]
    DuplicateSigner(ReplicaId),

    #[error("vote from {0} is about a different payload")]
    PayloadMismatch(ReplicaId),

    #[error("{got} is not the leader (expected {expected:?})")]
    WrongLeader {
        expected: Option<ReplicaId>,
        got: ReplicaId,
    },
}

/// Top-level error for every consensus-path operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),

    #[error("{phase} quorum not reached: {have} of {need} votes")]
    Quorum {
        phase: Phase,
        have: usize,
        need: usize,
    },

    #[error("lock on {0} is held by another transaction")]
    LockContention(AccountId),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("replica unavailable: {0}")]
    Unavailable(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    #[error("codec error: {0}")]
    Codec(String),
}

impl ConsensusError {
    /// Whether resubmitting the same transaction later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConsensusError::LockContention(_)
                | ConsensusError::Quorum { .. }
                | ConsensusError::Timeout(_)
                | ConsensusError::Rpc(_)
                | ConsensusError::Unavailable(_)
        )
    }
}

impl From<TopologyError> for ConsensusError {
    fn from(err: TopologyError) -> Self {
        ConsensusError::Validation(ValidationError::Topology(err))
    }
}

impl From<byzshard_messages::CodecError> for ConsensusError {
    fn from(err: byzshard_messages::CodecError) -> Self {
        ConsensusError::Codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ConsensusError::LockContention(AccountId(1)).is_retryable());
        assert!(ConsensusError::Quorum {
            phase: Phase::Prepare,
            have: 2,
            need: 3
        }
        .is_retryable());
        assert!(!ConsensusError::from(ValidationError::DigestMismatch).is_retryable());
        assert!(!ConsensusError::from(AuthError::BadSignature(ReplicaId(1))).is_retryable());
    }

    #[test]
    fn test_quorum_error_message() {
        let err = ConsensusError::Quorum {
            phase: Phase::PrePrepare,
            have: 2,
            need: 3,
        };
        assert_eq!(err.to_string(), "PrePrepare quorum not reached: 2 of 3 votes");
    }
}
