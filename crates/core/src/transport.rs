//! Replica-to-replica transport interface.
//!
//! The mechanism that carries a call to another replica is external. An
//! implementation only has to deliver each request to the named replica and
//! return its response or an [`RpcError`].

use async_trait::async_trait;
use byzshard_messages::{
    PbftReply, PbftRequest, ProcessTxnRequest, RoundFailed, SyncRequest, SyncResponse,
    TwoPcDecision, TwoPcMessage, TxnReply,
};
use byzshard_types::ReplicaId;
use thiserror::Error;

/// Errors carrying a call to another replica.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("{0} is unreachable")]
    Unreachable(ReplicaId),

    #[error("call to {0} timed out")]
    Timeout(ReplicaId),

    #[error("remote error: {0}")]
    Remote(String),
}

/// Outbound calls a replica makes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Forward a transaction to a replica's client entry point.
    async fn process_txn(&self, to: ReplicaId, request: ProcessTxnRequest)
        -> Result<(), RpcError>;

    /// PBFT pre-prepare.
    async fn pre_prepare(&self, to: ReplicaId, request: PbftRequest)
        -> Result<PbftReply, RpcError>;

    /// PBFT prepare.
    async fn prepare(&self, to: ReplicaId, request: PbftRequest) -> Result<PbftReply, RpcError>;

    /// PBFT commit.
    async fn commit(&self, to: ReplicaId, request: PbftRequest) -> Result<PbftReply, RpcError>;

    /// Round failure notice.
    async fn round_failed(&self, to: ReplicaId, notice: RoundFailed) -> Result<(), RpcError>;

    /// 2PC prepare request, coordinator to participant replicas.
    async fn two_pc_prepare_request(
        &self,
        to: ReplicaId,
        message: TwoPcMessage,
    ) -> Result<(), RpcError>;

    /// 2PC prepare response, participant leader to coordinator replicas.
    async fn two_pc_prepare_response(
        &self,
        to: ReplicaId,
        message: TwoPcMessage,
    ) -> Result<(), RpcError>;

    /// 2PC commit request, coordinator to participant replicas.
    async fn two_pc_commit_request(
        &self,
        to: ReplicaId,
        message: TwoPcMessage,
    ) -> Result<(), RpcError>;

    /// Outcome directive to a replica of the sender's own cluster.
    async fn two_pc_decision(&self, to: ReplicaId, decision: TwoPcDecision)
        -> Result<(), RpcError>;

    /// Catch-up.
    async fn sync(&self, to: ReplicaId, request: SyncRequest) -> Result<SyncResponse, RpcError>;

    /// Deliver the final answer to the submitting client.
    async fn reply_to_client(&self, reply: TxnReply);
}
