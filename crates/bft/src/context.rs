//! Everything a replica's consensus code needs, bundled once.

use crate::config::BftConfig;
use byzshard_core::{ConsensusError, Store, Transport};
use byzshard_execution::{Executor, LockManager, Sequencer};
use byzshard_types::{
    ClusterId, ConsensusMessage, KeyPair, Outcome, Phase, ReplicaId, SequenceNumber, Topology,
    Transaction, TxnId, ViewNumber,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, trace};

/// Hands out strictly increasing sequence numbers.
///
/// Numbers observed from the leader advance the counter too, so a follower
/// promoted by a view change never reuses a number.
#[derive(Debug)]
pub struct SequenceAllocator {
    next: AtomicU64,
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(SequenceNumber::FIRST.0),
        }
    }
}

impl SequenceAllocator {
    /// Take the next number.
    pub fn allocate(&self) -> SequenceNumber {
        SequenceNumber(self.next.fetch_add(1, Ordering::SeqCst))
    }

    /// Record a number assigned elsewhere.
    pub fn observe(&self, seq: SequenceNumber) {
        self.next.fetch_max(seq.0 + 1, Ordering::SeqCst);
    }

    /// Number the next call to [`SequenceAllocator::allocate`] returns.
    pub fn peek(&self) -> SequenceNumber {
        SequenceNumber(self.next.load(Ordering::SeqCst))
    }
}

/// Request to catch up from a replica that is ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchUpHint {
    /// Replica known to be ahead.
    pub from: ReplicaId,
    /// Its last executed sequence number.
    pub last_executed: SequenceNumber,
}

/// Per-transaction admission gates.
///
/// Phase requests for the same transaction can race on a follower; the gate
/// makes admission of one transaction sequential.
#[derive(Debug, Default)]
struct TxnGates {
    gates: Mutex<HashMap<TxnId, Weak<AsyncMutex<()>>>>,
}

impl TxnGates {
    async fn enter(&self, id: &TxnId) -> OwnedMutexGuard<()> {
        let gate = {
            let mut gates = self.gates.lock();
            gates.retain(|_, gate| gate.strong_count() > 0);
            match gates.get(id).and_then(Weak::upgrade) {
                Some(gate) => gate,
                None => {
                    let gate = Arc::new(AsyncMutex::new(()));
                    gates.insert(id.clone(), Arc::downgrade(&gate));
                    gate
                }
            }
        };
        gate.lock_owned().await
    }
}

/// Shared consensus state of one replica.
pub struct ConsensusContext {
    config: BftConfig,
    keypair: KeyPair,
    topology: Arc<dyn Topology>,
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    sequencer: Arc<Sequencer>,
    executor: Arc<Executor>,
    seqs: SequenceAllocator,
    view: AtomicU64,
    catch_up: mpsc::UnboundedSender<CatchUpHint>,
    gates: TxnGates,
}

impl std::fmt::Debug for ConsensusContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusContext")
            .field("replica", &self.local())
            .field("view", &self.view())
            .field("next_seq", &self.seqs.peek())
            .finish()
    }
}

impl ConsensusContext {
    /// Assemble a context. Returns the receiving end of catch-up hints.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: BftConfig,
        keypair: KeyPair,
        topology: Arc<dyn Topology>,
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        sequencer: Arc<Sequencer>,
        executor: Arc<Executor>,
    ) -> (Self, mpsc::UnboundedReceiver<CatchUpHint>) {
        let (catch_up, hints) = mpsc::unbounded_channel();
        (
            Self {
                config,
                keypair,
                topology,
                store,
                transport,
                sequencer,
                executor,
                seqs: SequenceAllocator::default(),
                view: AtomicU64::new(ViewNumber::INITIAL.0),
                catch_up,
                gates: TxnGates::default(),
            },
            hints,
        )
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    /// Consensus configuration.
    pub fn config(&self) -> &BftConfig {
        &self.config
    }

    /// Signing key of this replica.
    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    /// Membership view.
    pub fn topology(&self) -> &Arc<dyn Topology> {
        &self.topology
    }

    /// Record store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Outbound transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Account lock table.
    pub fn locks(&self) -> &Arc<LockManager> {
        self.executor.locks()
    }

    /// Execution order.
    pub fn sequencer(&self) -> &Arc<Sequencer> {
        &self.sequencer
    }

    /// Balance effects.
    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// This replica's id.
    pub fn local(&self) -> ReplicaId {
        self.topology.local_replica()
    }

    /// This replica's cluster.
    pub fn local_cluster(&self) -> Result<ClusterId, ConsensusError> {
        self.topology.local_cluster().ok_or_else(|| {
            ConsensusError::Unavailable(format!("{} is not in the shard map", self.local()))
        })
    }

    /// Votes required for a certificate of `cluster`.
    pub fn majority(&self, cluster: ClusterId) -> usize {
        self.config
            .majority_override
            .unwrap_or_else(|| self.topology.majority(cluster))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // View and leadership
    // ═══════════════════════════════════════════════════════════════════════

    /// Current view.
    pub fn view(&self) -> ViewNumber {
        ViewNumber(self.view.load(Ordering::SeqCst))
    }

    /// Move to another view.
    pub fn set_view(&self, view: ViewNumber) {
        self.view.store(view.0, Ordering::SeqCst);
        debug!(view = view.0, "View set");
    }

    /// Leader of the local cluster in the current view.
    pub fn leader(&self) -> Option<ReplicaId> {
        self.topology
            .local_cluster()
            .and_then(|cluster| self.topology.leader(cluster, self.view()))
    }

    /// Whether this replica leads its cluster in the current view.
    pub fn is_leader(&self) -> bool {
        self.leader() == Some(self.local())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Sequencing
    // ═══════════════════════════════════════════════════════════════════════

    /// Assign the next sequence number.
    pub fn allocate_seq(&self) -> SequenceNumber {
        self.seqs.allocate()
    }

    /// Record a sequence number assigned by the leader.
    pub fn observe_seq(&self, seq: SequenceNumber) {
        self.seqs.observe(seq);
    }

    /// Ask the node to catch up if `leader_executed` is ahead and the local
    /// sequencer is stuck on a gap.
    pub fn hint_catch_up(&self, from: ReplicaId, leader_executed: SequenceNumber) {
        if leader_executed > self.sequencer.last_executed() && self.sequencer.has_gap() {
            trace!(from = %from, leader_executed = leader_executed.0, "Catch-up hinted");
            let _ = self.catch_up.send(CatchUpHint {
                from,
                last_executed: leader_executed,
            });
        }
    }

    /// Sign this replica's vote for `phase` on `txn`.
    pub fn sign_vote(
        &self,
        phase: Phase,
        txn: &Transaction,
        outcome: Option<Outcome>,
    ) -> ConsensusMessage {
        ConsensusMessage::sign(&self.keypair, self.local(), phase, txn, outcome)
    }

    /// Serialize admission of one transaction.
    pub(crate) async fn admission_gate(&self, id: &TxnId) -> OwnedMutexGuard<()> {
        self.gates.enter(id).await
    }
}
