//! Cross-cluster commit driver of one replica.

use crate::config::TwoPcConfig;
use crate::evidence::verify_evidence;
use crate::session::SessionTable;
use byzshard_bft::{ConsensusContext, RoundOutput};
use byzshard_core::{fan_out, AuthError, ConsensusError, RpcError, Transport, ValidationError};
use byzshard_execution::ExecutionEvent;
use byzshard_messages::TwoPcDecision;
use byzshard_types::{Outcome, Phase, ReplicaId, Transaction, TxnId, TxnKind};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Transactions whose 2PC step is running on this replica.
#[derive(Debug, Default)]
pub(crate) struct Settling {
    ids: Mutex<HashSet<TxnId>>,
}

/// Membership in [`Settling`] for as long as it lives.
#[derive(Debug)]
pub(crate) struct SettlingGuard {
    settling: Arc<Settling>,
    id: TxnId,
}

impl Settling {
    pub(crate) fn enter(self: &Arc<Self>, id: &TxnId) -> Option<SettlingGuard> {
        if !self.ids.lock().insert(id.clone()) {
            return None;
        }
        Some(SettlingGuard {
            settling: self.clone(),
            id: id.clone(),
        })
    }

    fn contains(&self, id: &TxnId) -> bool {
        self.ids.lock().contains(id)
    }
}

impl Drop for SettlingGuard {
    fn drop(&mut self) {
        self.settling.ids.lock().remove(&self.id);
    }
}

/// Runs both sides of two-phase commit for the local cluster.
///
/// Only the current leader acts on execution events and answers; every
/// replica verifies and records the evidence it receives from the other
/// cluster.
pub struct TwoPc {
    pub(crate) config: TwoPcConfig,
    pub(crate) ctx: Arc<ConsensusContext>,
    pub(crate) sessions: SessionTable,
    pub(crate) settling: Arc<Settling>,
    pub(crate) tasks: TaskTracker,
}

impl std::fmt::Debug for TwoPc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoPc")
            .field("replica", &self.ctx.local())
            .field("open_sessions", &self.sessions.open_count())
            .finish()
    }
}

impl TwoPc {
    /// Create a driver whose background work runs on `tasks`.
    pub fn new(config: TwoPcConfig, ctx: Arc<ConsensusContext>, tasks: TaskTracker) -> Arc<Self> {
        Arc::new(Self {
            config,
            ctx,
            sessions: SessionTable::default(),
            settling: Arc::default(),
            tasks,
        })
    }

    /// Open decision sessions.
    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Configuration in use.
    pub fn config(&self) -> &TwoPcConfig {
        &self.config
    }

    /// Whether a coordinator, participant or resumed step for `id` is running.
    pub fn is_settling(&self, id: &TxnId) -> bool {
        self.settling.contains(id)
    }

    /// Start the 2PC step an execution event calls for.
    ///
    /// - provisional sender side → coordinate the decision
    /// - provisional receiver side → report ready and wait for the decision
    /// - failed receiver side → report Abort at once
    pub fn on_execution_event(self: &Arc<Self>, event: &ExecutionEvent) {
        if let ExecutionEvent::Failed { txn, .. } = event {
            // A decision held for this transaction has nothing left to resolve.
            self.sessions.close(&txn.id);
        }
        if !self.ctx.is_leader() {
            return;
        }
        match event {
            ExecutionEvent::Provisional(txn) if txn.kind.is_cross_shard() => {
                let Some(settling) = self.settling.enter(&txn.id) else {
                    debug!(txn_id = %txn.id, "2PC step already running");
                    return;
                };
                let this = self.clone();
                let txn = txn.clone();
                self.tasks.spawn(async move {
                    let id = txn.id.clone();
                    let result = if txn.kind == TxnKind::CrossShardSender {
                        this.coordinate(txn).await
                    } else {
                        this.participate(txn).await
                    };
                    if let Err(err) = result {
                        warn!(txn_id = %id, error = %err, "2PC step failed, left for the retry supervisor");
                    }
                    drop(settling);
                });
            }
            ExecutionEvent::Failed { txn, reason } if txn.kind == TxnKind::CrossShardReceiver => {
                let this = self.clone();
                let txn = txn.clone();
                let reason = reason.clone();
                self.tasks.spawn(async move {
                    if let Err(err) = this.respond_abort(&txn, &reason).await {
                        warn!(txn_id = %txn.id, error = %err, "Could not report abort");
                    }
                });
            }
            _ => {}
        }
    }

    /// Handle an outcome directive from the local leader.
    ///
    /// The directive's certificate proves the local cluster replicated the
    /// outcome; the outcome is then applied, or parked if this replica has
    /// not executed the transaction yet.
    pub fn on_decision(&self, decision: TwoPcDecision) -> Result<(), ConsensusError> {
        debug!(txn_id = %decision.txn_id, outcome = %decision.outcome, from = %decision.sender, "Decision received");
        let ctx = &self.ctx;
        let leader = ctx.leader();
        if leader != Some(decision.sender) {
            return Err(AuthError::WrongLeader {
                expected: leader,
                got: decision.sender,
            }
            .into());
        }
        let key = ctx
            .topology()
            .public_key(decision.sender)
            .ok_or(AuthError::UnknownSigner(decision.sender))?;
        if !decision.verify(&key) {
            return Err(AuthError::BadSignature(decision.sender).into());
        }
        let txn = ctx
            .store()
            .txn(&decision.txn_id)?
            .ok_or_else(|| ValidationError::UnknownTxn(decision.txn_id.clone()))?;
        if txn.digest != decision.digest {
            return Err(ValidationError::DigestMismatch.into());
        }
        verify_evidence(
            ctx,
            &decision.certificate,
            ctx.local_cluster()?,
            &txn,
            Some(decision.outcome),
            &[Phase::TwoPcCommit, Phase::TwoPcPrepare],
        )?;

        match ctx.executor().finalize(&decision.txn_id, decision.outcome) {
            Ok(_) => Ok(()),
            Err(ConsensusError::Validation(ValidationError::AlreadyFinal(id, status))) => {
                debug!(txn_id = %id, %status, "Decision already applied");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Delivery
    // ═══════════════════════════════════════════════════════════════════════

    /// Send one message to every target, returning how many accepted it.
    pub(crate) async fn deliver<M, F>(
        &self,
        targets: &[ReplicaId],
        txn_id: &TxnId,
        what: &'static str,
        message: M,
        call: F,
    ) -> usize
    where
        M: Clone + Send + 'static,
        F: Fn(Arc<dyn Transport>, ReplicaId, M) -> BoxFuture<'static, Result<(), RpcError>>,
    {
        let transport = self.ctx.transport().clone();
        let results = fan_out(targets, self.config.rpc_timeout, |to| {
            call(transport.clone(), to, message.clone())
        })
        .collect_all()
        .await;
        let mut delivered = 0;
        for (to, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(err) => debug!(txn_id = %txn_id, message = what, to = %to, error = %err, "Not delivered"),
            }
        }
        debug!(txn_id = %txn_id, message = what, delivered, targets = targets.len(), "Delivered");
        delivered
    }

    /// Send the outcome directive to local replicas missing from the
    /// outcome round's commit certificate.
    pub(crate) async fn notify_stragglers(
        &self,
        txn: &Transaction,
        outcome: Outcome,
        output: &RoundOutput,
    ) {
        let voted: HashSet<ReplicaId> = output
            .commit
            .as_ref()
            .map(|cert| cert.votes.iter().map(|v| v.sender).collect())
            .unwrap_or_default();
        let stragglers: Vec<ReplicaId> = self
            .ctx
            .topology()
            .local_peers()
            .into_iter()
            .filter(|r| !voted.contains(r))
            .collect();
        if stragglers.is_empty() {
            return;
        }
        let decision = TwoPcDecision::sign(
            self.ctx.keypair(),
            self.ctx.local(),
            txn.id.clone(),
            txn.digest,
            outcome,
            output.proof().clone(),
        );
        self.deliver(&stragglers, &txn.id, "decision", decision, |transport, to, decision| {
            async move { transport.two_pc_decision(to, decision).await }.boxed()
        })
        .await;
    }
}
