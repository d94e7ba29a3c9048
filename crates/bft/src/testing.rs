//! In-process cluster for round tests.

use crate::{on_commit, on_pre_prepare, on_prepare, on_round_failed, BftConfig, ConsensusContext};
use async_trait::async_trait;
use byzshard_core::{RpcError, Store, Transport};
use byzshard_execution::{Executor, LockManager, Sequencer, SequencerConfig};
use byzshard_messages::{
    PbftReply, PbftRequest, ProcessTxnRequest, RoundFailed, SyncRequest, SyncResponse,
    TwoPcDecision, TwoPcMessage, TxnReply,
};
use byzshard_storage::MemoryStore;
use byzshard_test_helpers::{keypair_for, test_shard_map, TEST_SHARD_SIZE};
use byzshard_types::{AccountId, ReplicaId, SharedTopology, TxnId, TxnStatus};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Routes PBFT calls straight into the target replica's handlers.
#[derive(Default)]
pub(crate) struct Loopback {
    replicas: RwLock<HashMap<ReplicaId, Arc<ConsensusContext>>>,
    down: RwLock<HashSet<ReplicaId>>,
}

impl Loopback {
    fn target(&self, to: ReplicaId) -> Result<Arc<ConsensusContext>, RpcError> {
        if self.down.read().contains(&to) {
            return Err(RpcError::Unreachable(to));
        }
        self.replicas
            .read()
            .get(&to)
            .cloned()
            .ok_or(RpcError::Unreachable(to))
    }
}

fn remote(err: impl std::fmt::Display) -> RpcError {
    RpcError::Remote(err.to_string())
}

#[async_trait]
impl Transport for Loopback {
    async fn process_txn(&self, to: ReplicaId, _: ProcessTxnRequest) -> Result<(), RpcError> {
        Err(RpcError::Unreachable(to))
    }

    async fn pre_prepare(&self, to: ReplicaId, request: PbftRequest) -> Result<PbftReply, RpcError> {
        let ctx = self.target(to)?;
        on_pre_prepare(&ctx, request).await.map_err(remote)
    }

    async fn prepare(&self, to: ReplicaId, request: PbftRequest) -> Result<PbftReply, RpcError> {
        let ctx = self.target(to)?;
        on_prepare(&ctx, request).await.map_err(remote)
    }

    async fn commit(&self, to: ReplicaId, request: PbftRequest) -> Result<PbftReply, RpcError> {
        let ctx = self.target(to)?;
        on_commit(&ctx, request).await.map_err(remote)
    }

    async fn round_failed(&self, to: ReplicaId, notice: RoundFailed) -> Result<(), RpcError> {
        let ctx = self.target(to)?;
        on_round_failed(&ctx, notice).map_err(remote)
    }

    async fn two_pc_prepare_request(&self, to: ReplicaId, _: TwoPcMessage) -> Result<(), RpcError> {
        Err(RpcError::Unreachable(to))
    }

    async fn two_pc_prepare_response(&self, to: ReplicaId, _: TwoPcMessage) -> Result<(), RpcError> {
        Err(RpcError::Unreachable(to))
    }

    async fn two_pc_commit_request(&self, to: ReplicaId, _: TwoPcMessage) -> Result<(), RpcError> {
        Err(RpcError::Unreachable(to))
    }

    async fn two_pc_decision(&self, to: ReplicaId, _: TwoPcDecision) -> Result<(), RpcError> {
        Err(RpcError::Unreachable(to))
    }

    async fn sync(&self, to: ReplicaId, _: SyncRequest) -> Result<SyncResponse, RpcError> {
        Err(RpcError::Unreachable(to))
    }

    async fn reply_to_client(&self, _: TxnReply) {}
}

/// One four-replica cluster owning accounts `1..=10` with 100 each.
pub(crate) struct TestCluster {
    pub transport: Arc<Loopback>,
    pub contexts: Vec<Arc<ConsensusContext>>,
    pub stores: Vec<Arc<MemoryStore>>,
    cancel: CancellationToken,
}

impl TestCluster {
    pub fn new() -> Self {
        let transport = Arc::new(Loopback::default());
        let map = test_shard_map(1, 4, TEST_SHARD_SIZE);
        let cancel = CancellationToken::new();
        let mut contexts = Vec::new();
        let mut stores = Vec::new();

        for replica in 1..=4u64 {
            let store = Arc::new(MemoryStore::with_accounts(
                (1..=10).map(|a| (AccountId(a), 100)),
            ));
            let locks = Arc::new(LockManager::new(TEST_SHARD_SIZE));
            let (executor, _events) = Executor::new(store.clone(), locks);
            let executor = Arc::new(executor);
            let (sequencer, worker) = Sequencer::new(&SequencerConfig::default());
            tokio::spawn(worker.run(executor.clone(), cancel.clone()));
            let (ctx, _hints) = ConsensusContext::new(
                BftConfig::with_rpc_timeout(Duration::from_millis(500)),
                keypair_for(replica),
                SharedTopology::new(ReplicaId(replica), map.clone()).into_arc(),
                store.clone(),
                transport.clone(),
                sequencer,
                executor,
            );
            let ctx = Arc::new(ctx);
            transport.replicas.write().insert(ReplicaId(replica), ctx.clone());
            contexts.push(ctx);
            stores.push(store);
        }

        Self {
            transport,
            contexts,
            stores,
            cancel,
        }
    }

    pub fn leader(&self) -> &ConsensusContext {
        &self.contexts[0]
    }

    pub fn take_down(&self, replica: u64) {
        self.transport.down.write().insert(ReplicaId(replica));
    }

    pub fn bring_up(&self, replica: u64) {
        self.transport.down.write().remove(&ReplicaId(replica));
    }

    /// Wait until every replica's record of `id` reaches `status`.
    pub async fn wait_for_status(&self, id: &str, status: TxnStatus) {
        for index in 0..self.stores.len() {
            self.wait_for_status_on(index, id, status).await;
        }
    }

    /// Wait until the record of `id` at replica index `index` reaches `status`.
    pub async fn wait_for_status_on(&self, index: usize, id: &str, status: TxnStatus) {
        let id = TxnId::new(id);
        for _ in 0..200 {
            if matches!(self.stores[index].txn(&id), Ok(Some(txn)) if txn.status == status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{} never reached {} at replica index {}", id, status, index);
    }
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
