//! Reactions to applied effects.
//!
//! Every execution event goes to the 2PC driver first. On the leader the
//! event may also end a client request:
//!
//! | Event                      | Client reply for              |
//! |----------------------------|-------------------------------|
//! | `Executed`                 | intra-shard transfers         |
//! | `Finalized`                | the sender side of a transfer |
//! | `Failed`                   | anything but the receiver side|
//!
//! The receiver side belongs to another cluster's client request, which is
//! answered by the coordinator.

use crate::metrics::Metrics;
use byzshard_bft::ConsensusContext;
use byzshard_execution::ExecutionEvent;
use byzshard_messages::TxnReply;
use byzshard_twopc::TwoPc;
use byzshard_types::{unix_millis, TxnKind};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Client reply an event calls for, if any.
pub fn client_reply(event: &ExecutionEvent) -> Option<TxnReply> {
    let txn = event.txn();
    let error = match event {
        ExecutionEvent::Executed(txn) if txn.kind == TxnKind::IntraShard => None,
        ExecutionEvent::Finalized { txn, .. } if txn.kind == TxnKind::CrossShardSender => None,
        ExecutionEvent::Failed { txn, reason } if txn.kind != TxnKind::CrossShardReceiver => {
            Some(reason.clone())
        }
        _ => return None,
    };
    Some(TxnReply {
        txn_id: txn.id.clone(),
        status: txn.status,
        error,
    })
}

/// Consumes the executor's event stream.
pub(crate) struct Dispatcher {
    pub ctx: Arc<ConsensusContext>,
    pub two_pc: Arc<TwoPc>,
    pub metrics: Arc<Metrics>,
}

impl Dispatcher {
    pub(crate) async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<ExecutionEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle(&event).await;
        }
        debug!("Dispatcher stopped");
    }

    async fn handle(&self, event: &ExecutionEvent) {
        self.two_pc.on_execution_event(event);
        if !self.ctx.is_leader() {
            return;
        }
        let Some(reply) = client_reply(event) else {
            return;
        };
        let started = event.txn().created_at_ms;
        self.metrics.record(started, unix_millis());
        info!(txn_id = %reply.txn_id, status = %reply.status, error = ?reply.error, "Replying to client");
        self.ctx.transport().reply_to_client(reply).await;
    }
}
