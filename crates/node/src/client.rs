//! Client entry point.
//!
//! The leader classifies a submitted transfer against the shard map and
//! starts its round in the background. Submissions it cannot take are
//! answered with a Failed reply and leave nothing behind.

use crate::replica::Replica;
use byzshard_bft::propose;
use byzshard_core::{ConsensusError, ValidationError};
use byzshard_messages::{Ack, ProcessTxnRequest, TxnReply};
use byzshard_types::{unix_millis, Topology, TopologyError, Transaction, TxnKind, TxnStatus};
use std::sync::Arc;
use tracing::{debug, info};

impl Replica {
    /// Accept a client transaction and begin consensus on it.
    ///
    /// Returns once the round is started; the outcome reaches the client
    /// through [`byzshard_core::Transport::reply_to_client`].
    pub async fn process_txn(
        self: &Arc<Self>,
        request: ProcessTxnRequest,
    ) -> Result<Ack, ConsensusError> {
        self.ensure_alive()?;
        let submitted = request.txn;
        debug!(txn_id = %submitted.id, sender = %submitted.sender, receiver = %submitted.receiver, amount = submitted.amount, "Client transaction received");

        let txn = match self.classify(&submitted) {
            Ok(txn) => txn,
            Err(err) => {
                self.reject(&submitted, &err).await;
                return Err(err);
            }
        };
        let Some(round) = self.active.enter(&txn.id) else {
            let err = ValidationError::DuplicateTxn(txn.id.clone()).into();
            self.reject(&submitted, &err).await;
            return Err(err);
        };

        info!(txn_id = %txn.id, kind = ?txn.kind, "Starting round");
        let this = self.clone();
        self.tasks.spawn(async move {
            let id = txn.id.clone();
            match propose(&this.ctx, txn.clone()).await {
                Ok(output) => {
                    debug!(txn_id = %id, seq = output.txn.seq.0, "Round committed")
                }
                Err(err @ ConsensusError::Validation(ValidationError::DuplicateTxn(_))) => {
                    this.reject(&txn, &err).await;
                }
                // The executor's Failed event answers the client.
                Err(err) => debug!(txn_id = %id, error = %err, "Round not committed"),
            }
            drop(round);
        });
        Ok(Ack)
    }

    /// Check that this leader can take `txn` and fill in its kind.
    fn classify(&self, submitted: &Transaction) -> Result<Transaction, ConsensusError> {
        let ctx = &self.ctx;
        if !ctx.is_leader() {
            return Err(ValidationError::NotLeader {
                leader: ctx.leader(),
            }
            .into());
        }
        if ctx.store().txn(&submitted.id)?.is_some() {
            return Err(ValidationError::DuplicateTxn(submitted.id.clone()).into());
        }
        let kind = self
            .topology
            .shard_map()
            .classify(submitted.sender, submitted.receiver, ctx.local_cluster()?)?;
        if kind == TxnKind::CrossShardReceiver {
            // The sender's cluster coordinates; it must receive the request.
            return Err(TopologyError::NotOwned(submitted.sender).into());
        }

        let mut txn = Transaction::new(
            submitted.id.clone(),
            submitted.sender,
            submitted.receiver,
            submitted.amount,
        );
        txn.kind = kind;
        if submitted.created_at_ms != 0 {
            txn.created_at_ms = submitted.created_at_ms;
        }
        Ok(txn)
    }

    /// Answer a submission that never entered consensus.
    async fn reject(&self, txn: &Transaction, err: &ConsensusError) {
        info!(txn_id = %txn.id, error = %err, "Rejecting client transaction");
        self.metrics.record(txn.created_at_ms, unix_millis());
        self.ctx
            .transport()
            .reply_to_client(TxnReply {
                txn_id: txn.id.clone(),
                status: TxnStatus::Failed,
                error: Some(err.to_string()),
            })
            .await;
    }
}
