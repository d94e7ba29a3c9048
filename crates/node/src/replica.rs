//! One replica with its background workers and its full RPC surface.
//!
//! ```text
//!                 ┌──────────────────────────────────────────────┐
//!   RPC ────────▶ │ Replica (alive / byzantine gate)             │
//!                 │   ├─ bft handlers ─▶ Sequencer ─▶ Executor   │
//!                 │   ├─ TwoPc                    │              │
//!                 │   ├─ sync                     ▼              │
//!                 │   └─ admin          Dispatcher (events)      │
//!                 │                       ├─ TwoPc               │
//!                 │                       └─ client replies      │
//!                 │  RetrySupervisor, catch-up worker            │
//!                 └──────────────────────────────────────────────┘
//! ```

use crate::config::NodeConfig;
use crate::dispatcher::Dispatcher;
use crate::error::NodeError;
use crate::metrics::Metrics;
use crate::retry::{ActiveRounds, RetrySupervisor};
use crate::sync;
use byzshard_bft::{on_commit, on_pre_prepare, on_prepare, on_round_failed, ConsensusContext};
use byzshard_core::{ConsensusError, Store, Transport};
use byzshard_execution::{Executor, LockManager, Sequencer};
use byzshard_messages::{
    Ack, PbftReply, PbftRequest, RoundFailed, SyncRequest, SyncResponse, TwoPcDecision,
    TwoPcMessage,
};
use byzshard_twopc::TwoPc;
use byzshard_types::{KeyPair, ReplicaId, SharedTopology, Topology};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Fault-injection flags of a replica.
#[derive(Debug)]
pub struct ServerState {
    alive: AtomicBool,
    byzantine: AtomicBool,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            alive: AtomicBool::new(true),
            byzantine: AtomicBool::new(false),
        }
    }
}

impl ServerState {
    /// Whether the replica answers RPCs.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Whether the replica refuses pre-prepare.
    pub fn is_byzantine(&self) -> bool {
        self.byzantine.load(Ordering::SeqCst)
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    pub fn set_byzantine(&self, byzantine: bool) {
        self.byzantine.store(byzantine, Ordering::SeqCst);
    }
}

/// A running replica.
pub struct Replica {
    pub(crate) config: NodeConfig,
    pub(crate) ctx: Arc<ConsensusContext>,
    pub(crate) topology: Arc<SharedTopology>,
    pub(crate) two_pc: Arc<TwoPc>,
    pub(crate) state: Arc<ServerState>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) active: Arc<ActiveRounds>,
    pub(crate) tasks: TaskTracker,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("id", &self.ctx.local())
            .field("view", &self.ctx.view())
            .field("alive", &self.state.is_alive())
            .field("byzantine", &self.state.is_byzantine())
            .field("active_rounds", &self.active.len())
            .finish()
    }
}

impl Replica {
    /// Assemble a replica and spawn its workers on the current runtime.
    pub fn start(
        config: NodeConfig,
        keypair: KeyPair,
        topology: Arc<SharedTopology>,
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>, NodeError> {
        let local = topology.local_replica();
        if topology.local_cluster().is_none() {
            return Err(NodeError::NotInShardMap(local));
        }
        let metrics = Arc::new(Metrics::new()?);
        let tasks = TaskTracker::new();
        let cancel = CancellationToken::new();

        let locks = Arc::new(LockManager::new(topology.shard_map().shard_size()));
        let (executor, events) = Executor::new(store.clone(), locks);
        let executor = Arc::new(executor);
        let (sequencer, worker) = Sequencer::new(&config.sequencer);
        tasks.spawn(worker.run(executor.clone(), cancel.clone()));

        let (ctx, hints) = ConsensusContext::new(
            config.bft.clone(),
            keypair,
            topology.clone(),
            store,
            transport,
            sequencer,
            executor,
        );
        let ctx = Arc::new(ctx);
        let two_pc = TwoPc::new(config.two_pc.clone(), ctx.clone(), tasks.clone());
        let state = Arc::new(ServerState::default());
        let active = Arc::new(ActiveRounds::default());

        let dispatcher = Dispatcher {
            ctx: ctx.clone(),
            two_pc: two_pc.clone(),
            metrics: metrics.clone(),
        };
        tasks.spawn(dispatcher.run(events, cancel.clone()));

        if config.retry.enabled {
            let supervisor = RetrySupervisor::new(
                config.retry.clone(),
                ctx.clone(),
                two_pc.clone(),
                state.clone(),
                active.clone(),
            );
            tasks.spawn(supervisor.run(cancel.clone()));
        }
        if config.sync.enabled {
            tasks.spawn(sync::run_catch_up(
                ctx.clone(),
                state.clone(),
                hints,
                cancel.clone(),
            ));
        }

        info!(replica = %local, leader = ctx.is_leader(), "Replica started");
        Ok(Arc::new(Self {
            config,
            ctx,
            topology,
            two_pc,
            state,
            metrics,
            active,
            tasks,
            cancel,
        }))
    }

    /// Stop every worker and wait for running rounds to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!(replica = %self.id(), "Replica stopped");
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    /// This replica's id.
    pub fn id(&self) -> ReplicaId {
        self.ctx.local()
    }

    /// Consensus state.
    pub fn context(&self) -> &Arc<ConsensusContext> {
        &self.ctx
    }

    /// Cross-cluster commit driver.
    pub fn two_pc(&self) -> &Arc<TwoPc> {
        &self.two_pc
    }

    /// Fault-injection flags.
    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Request latency recorder.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Configuration in use.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Rounds this replica is currently driving as leader.
    pub fn active_rounds(&self) -> &Arc<ActiveRounds> {
        &self.active
    }

    /// Retry supervisor bound to this replica, for driving sweeps by hand.
    pub fn retry_supervisor(&self) -> RetrySupervisor {
        RetrySupervisor::new(
            self.config.retry.clone(),
            self.ctx.clone(),
            self.two_pc.clone(),
            self.state.clone(),
            self.active.clone(),
        )
    }

    pub(crate) fn ensure_alive(&self) -> Result<(), ConsensusError> {
        if self.state.is_alive() {
            Ok(())
        } else {
            Err(ConsensusError::Unavailable(format!("{} is down", self.id())))
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Consensus RPCs
    // ═══════════════════════════════════════════════════════════════════════

    /// PrePrepare from the leader. Refused outright by a byzantine replica.
    pub async fn pre_prepare(&self, request: PbftRequest) -> Result<PbftReply, ConsensusError> {
        self.ensure_alive()?;
        if self.state.is_byzantine() {
            debug!(replica = %self.id(), txn_id = %request.txn.id, "Byzantine replica refusing pre-prepare");
            return Err(ConsensusError::Unavailable(format!(
                "{} is byzantine",
                self.id()
            )));
        }
        on_pre_prepare(&self.ctx, request).await
    }

    /// Prepare certificate from the leader.
    pub async fn prepare(&self, request: PbftRequest) -> Result<PbftReply, ConsensusError> {
        self.ensure_alive()?;
        on_prepare(&self.ctx, request).await
    }

    /// Commit certificate from the leader.
    pub async fn commit(&self, request: PbftRequest) -> Result<PbftReply, ConsensusError> {
        self.ensure_alive()?;
        on_commit(&self.ctx, request).await
    }

    /// Notice that the leader abandoned a round.
    pub fn round_failed(&self, notice: RoundFailed) -> Result<Ack, ConsensusError> {
        self.ensure_alive()?;
        on_round_failed(&self.ctx, notice)?;
        Ok(Ack)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Cross-cluster RPCs
    // ═══════════════════════════════════════════════════════════════════════

    pub fn two_pc_prepare_request(&self, message: TwoPcMessage) -> Result<Ack, ConsensusError> {
        self.ensure_alive()?;
        self.two_pc.on_prepare_request(message)?;
        Ok(Ack)
    }

    pub fn two_pc_prepare_response(&self, message: TwoPcMessage) -> Result<Ack, ConsensusError> {
        self.ensure_alive()?;
        self.two_pc.on_prepare_response(message)?;
        Ok(Ack)
    }

    pub fn two_pc_commit_request(&self, message: TwoPcMessage) -> Result<Ack, ConsensusError> {
        self.ensure_alive()?;
        self.two_pc.on_commit_request(message)?;
        Ok(Ack)
    }

    /// Outcome directive from the local leader.
    pub fn two_pc_decision(&self, decision: TwoPcDecision) -> Result<Ack, ConsensusError> {
        self.ensure_alive()?;
        self.two_pc.on_decision(decision)?;
        Ok(Ack)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Sync
    // ═══════════════════════════════════════════════════════════════════════

    /// Serve a lagging peer.
    pub fn sync(&self, request: SyncRequest) -> Result<SyncResponse, ConsensusError> {
        self.ensure_alive()?;
        sync::serve(&self.ctx, &request)
    }

    /// Catch up from `from` now, regardless of hints.
    pub async fn catch_up(&self, from: ReplicaId) -> Result<usize, ConsensusError> {
        self.ensure_alive()?;
        sync::catch_up(&self.ctx, from).await
    }
}

impl Drop for Replica {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
