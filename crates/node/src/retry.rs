//! Periodic resubmission of stalled transactions.

use crate::config::RetryConfig;
use crate::replica::ServerState;
use byzshard_bft::{repropose, ConsensusContext};
use byzshard_twopc::TwoPc;
use byzshard_types::{unix_millis, Transaction, TxnId, TxnKind, TxnStatus};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Statuses of a transaction the cluster has not committed yet.
const STALLABLE: [TxnStatus; 3] = [TxnStatus::Init, TxnStatus::PrePrepared, TxnStatus::Prepared];

/// Statuses of a cross-shard transaction applied locally whose outcome is
/// not settled yet.
const UNSETTLED: [TxnStatus; 4] = [
    TxnStatus::PreparedToExecute,
    TxnStatus::TwoPcPrePrepared,
    TxnStatus::TwoPcPrepared,
    TxnStatus::TwoPcCommitted,
];

/// Transactions a leader is currently driving.
///
/// The supervisor never resubmits a transaction whose round is still running.
#[derive(Debug, Default)]
pub struct ActiveRounds {
    ids: Mutex<HashSet<TxnId>>,
}

/// Membership in [`ActiveRounds`] for as long as it lives.
#[derive(Debug)]
pub struct ActiveRound {
    rounds: Arc<ActiveRounds>,
    id: TxnId,
}

impl ActiveRounds {
    /// Register a round for `id`, or `None` if one is already running.
    pub fn enter(self: &Arc<Self>, id: &TxnId) -> Option<ActiveRound> {
        if !self.ids.lock().insert(id.clone()) {
            return None;
        }
        Some(ActiveRound {
            rounds: self.clone(),
            id: id.clone(),
        })
    }

    /// Whether a round for `id` is running.
    pub fn contains(&self, id: &TxnId) -> bool {
        self.ids.lock().contains(id)
    }

    /// Rounds running.
    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    /// Whether no round is running.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for ActiveRound {
    fn drop(&mut self) {
        self.rounds.ids.lock().remove(&self.id);
    }
}

/// Resubmits transactions that stopped short of commit and outcome rounds
/// that stopped short of quorum.
///
/// Runs only while the replica is alive and leads its cluster. Receiver-side
/// copies of cross-shard transfers are never resequenced; the coordinator
/// owns them until they are applied.
pub struct RetrySupervisor {
    config: RetryConfig,
    ctx: Arc<ConsensusContext>,
    two_pc: Arc<TwoPc>,
    state: Arc<ServerState>,
    active: Arc<ActiveRounds>,
}

impl RetrySupervisor {
    pub fn new(
        config: RetryConfig,
        ctx: Arc<ConsensusContext>,
        two_pc: Arc<TwoPc>,
        state: Arc<ServerState>,
        active: Arc<ActiveRounds>,
    ) -> Self {
        Self {
            config,
            ctx,
            two_pc,
            state,
            active,
        }
    }

    /// Sweep every interval until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
        debug!("Retry supervisor stopped");
    }

    /// Resubmit every stalled transaction and resume every unsettled
    /// outcome once. Returns how many rounds were started.
    pub async fn sweep(&self) -> usize {
        if !self.state.is_alive() || !self.ctx.is_leader() {
            return 0;
        }
        let retried = self.retry_stalled().await;
        let resumed = self.resume_unsettled().await;
        retried + resumed
    }

    fn older_than_stall(&self, statuses: &[TxnStatus]) -> Vec<Transaction> {
        let txns = match self.ctx.store().txns_by_status(statuses) {
            Ok(txns) => txns,
            Err(err) => {
                warn!(error = %err, "Could not scan for stalled transactions");
                return Vec::new();
            }
        };
        let now = unix_millis();
        let stall_ms = self.config.stall_after.as_millis() as u64;
        txns.into_iter()
            .filter(|txn| txn.age_ms(now) >= stall_ms)
            .collect()
    }

    async fn retry_stalled(&self) -> usize {
        let rounds: Vec<_> = self
            .older_than_stall(&STALLABLE)
            .into_iter()
            .filter(|txn| txn.kind != TxnKind::CrossShardReceiver)
            .filter_map(|txn| self.active.enter(&txn.id).map(|round| (txn, round)))
            .collect();
        if rounds.is_empty() {
            return 0;
        }
        info!(count = rounds.len(), "Retrying stalled transactions");

        let retried = rounds.len();
        let ctx = &self.ctx;
        futures::future::join_all(rounds.into_iter().map(|(txn, round)| async move {
            match repropose(ctx, &txn.id).await {
                Ok(output) => debug!(txn_id = %txn.id, seq = output.txn.seq.0, "Retry committed"),
                Err(err) => warn!(txn_id = %txn.id, error = %err, "Retry failed"),
            }
            drop(round);
        }))
        .await;
        retried
    }

    async fn resume_unsettled(&self) -> usize {
        let unsettled: Vec<_> = self
            .older_than_stall(&UNSETTLED)
            .into_iter()
            .filter(|txn| txn.kind.is_cross_shard())
            .collect();
        if unsettled.is_empty() {
            return 0;
        }
        let two_pc = &self.two_pc;
        let started = futures::future::join_all(unsettled.iter().map(|txn| async move {
            match two_pc.resume(txn).await {
                Ok(Some(outcome)) => {
                    debug!(txn_id = %txn.id, %outcome, "Outcome settled");
                    true
                }
                Ok(None) => false,
                Err(err) => {
                    warn!(txn_id = %txn.id, error = %err, "Outcome round failed again");
                    true
                }
            }
        }))
        .await
        .into_iter()
        .filter(|started| *started)
        .count();
        if started > 0 {
            info!(count = started, "Resumed unsettled outcomes");
        }
        started
    }
}
