//! Multi-cluster harness.

use crate::network::{LocalNetwork, NetworkConfig};
use byzshard_core::{RpcError, Store, Transport};
use byzshard_messages::{PrintBalanceRequest, ProcessTxnRequest, TxnReply, UpdateServerState};
use byzshard_node::{NodeConfig, Replica};
use byzshard_storage::MemoryStore;
use byzshard_test_helpers::{keypair_for, test_shard_map};
use byzshard_types::{
    AccountId, ClusterId, ReplicaId, SharedTopology, ShardMap, Transaction, TxnId,
    TxnStatus, ViewNumber,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Configuration for a simulated deployment.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Number of clusters.
    pub clusters: u64,

    /// Replicas per cluster.
    pub replicas_per_cluster: u64,

    /// Accounts per cluster.
    pub shard_size: u64,

    /// Starting balance of every account.
    pub initial_balance: u64,

    /// Configuration of every replica.
    pub node: NodeConfig,

    /// Network behaviour.
    pub network: NetworkConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            clusters: 1,
            replicas_per_cluster: 4,
            shard_size: 1000,
            initial_balance: 100,
            node: NodeConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Create a configuration with `clusters` clusters of four replicas.
    pub fn new(clusters: u64) -> Self {
        Self {
            clusters,
            ..Default::default()
        }
    }

    /// Set the replica configuration.
    pub fn with_node(mut self, node: NodeConfig) -> Self {
        self.node = node;
        self
    }

    /// Set the number of accounts per cluster.
    pub fn with_shard_size(mut self, shard_size: u64) -> Self {
        self.shard_size = shard_size;
        self
    }

    /// Set the per-call network latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.network.latency = latency;
        self
    }
}

/// Running replicas of every cluster on one [`LocalNetwork`].
pub struct SimCluster {
    config: SimulationConfig,
    map: ShardMap,
    network: Arc<LocalNetwork>,
    replicas: BTreeMap<ReplicaId, Arc<Replica>>,
    stores: BTreeMap<ReplicaId, Arc<MemoryStore>>,
}

impl std::fmt::Debug for SimCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimCluster")
            .field("clusters", &self.config.clusters)
            .field("replicas", &self.replicas.len())
            .finish()
    }
}

/// How long helpers wait for a state before giving up.
const WAIT: Duration = Duration::from_secs(10);

impl SimCluster {
    /// Start every replica. Must run inside a Tokio runtime.
    pub fn start(config: SimulationConfig) -> Self {
        let map = test_shard_map(
            config.clusters,
            config.replicas_per_cluster,
            config.shard_size,
        );
        let network = Arc::new(LocalNetwork::new(config.network.clone()));
        let mut replicas = BTreeMap::new();
        let mut stores = BTreeMap::new();

        for cluster in map.clusters().collect::<Vec<_>>() {
            let first = (cluster.0 - 1) * config.shard_size + 1;
            for &replica in map.members(cluster) {
                let store = Arc::new(MemoryStore::with_accounts(
                    (first..first + config.shard_size)
                        .map(|account| (AccountId(account), config.initial_balance)),
                ));
                let node = Replica::start(
                    config.node.clone(),
                    keypair_for(replica.0),
                    SharedTopology::new(replica, map.clone()).into_arc(),
                    store.clone(),
                    network.clone(),
                )
                .unwrap_or_else(|e| panic!("replica {} failed to start: {}", replica, e));
                network.register(node.clone());
                replicas.insert(replica, node);
                stores.insert(replica, store);
            }
        }
        info!(
            clusters = config.clusters,
            replicas = replicas.len(),
            "Simulation started"
        );

        Self {
            config,
            map,
            network,
            replicas,
            stores,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lookup
    // ═══════════════════════════════════════════════════════════════════════

    pub fn network(&self) -> &Arc<LocalNetwork> {
        &self.network
    }

    pub fn replica(&self, id: u64) -> &Arc<Replica> {
        &self.replicas[&ReplicaId(id)]
    }

    pub fn store(&self, id: u64) -> &Arc<MemoryStore> {
        &self.stores[&ReplicaId(id)]
    }

    /// Members of a cluster.
    pub fn members(&self, cluster: u64) -> Vec<ReplicaId> {
        self.map.members(ClusterId(cluster)).to_vec()
    }

    /// Current leader of a cluster, as its first member sees it.
    pub fn leader_of(&self, cluster: u64) -> &Arc<Replica> {
        let first = self.members(cluster)[0];
        let view = self.replicas[&first].context().view();
        let leader = self
            .map
            .leader(ClusterId(cluster), view)
            .unwrap_or(first);
        &self.replicas[&leader]
    }

    /// Leader of the cluster owning `account`.
    pub fn leader_for(&self, account: AccountId) -> &Arc<Replica> {
        let cluster = self
            .map
            .cluster_of_account(account)
            .unwrap_or_else(|| panic!("{} is not owned by any cluster", account));
        self.leader_of(cluster.0)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Client operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Submit a transfer to the leader of the sender's cluster.
    pub async fn submit(&self, txn: Transaction) -> Result<(), RpcError> {
        let to = self.leader_for(txn.sender).id();
        self.submit_to(to.0, txn).await
    }

    /// Submit a transfer to a specific replica.
    pub async fn submit_to(&self, replica: u64, txn: Transaction) -> Result<(), RpcError> {
        self.network
            .process_txn(ReplicaId(replica), ProcessTxnRequest { txn })
            .await
    }

    /// Submit a transfer and wait for its terminal reply.
    pub async fn transfer(&self, id: &str, sender: u64, receiver: u64, amount: u64) -> TxnReply {
        let txn = Transaction::new(id, AccountId(sender), AccountId(receiver), amount);
        // A rejected submission still produces a Failed reply.
        let _ = self.submit(txn).await;
        self.wait_for_reply(id).await
    }

    /// Wait for the first terminal reply to `id`.
    pub async fn wait_for_reply(&self, id: &str) -> TxnReply {
        self.network
            .wait_for_reply(&TxnId::new(id), WAIT, |r| r.status.is_terminal())
            .await
            .unwrap_or_else(|| panic!("no reply for {}", id))
    }

    /// Balance of `account` on every replica of its cluster.
    pub fn balances(&self, account: u64) -> BTreeMap<ReplicaId, Option<u64>> {
        let account = AccountId(account);
        let Some(cluster) = self.map.cluster_of_account(account) else {
            return BTreeMap::new();
        };
        self.map
            .members(cluster)
            .iter()
            .filter_map(|id| {
                self.replicas[id]
                    .print_balance(PrintBalanceRequest { account })
                    .ok()
                    .map(|report| (report.replica, report.balance))
            })
            .collect()
    }

    /// Wait until `id` has `status` on replica `replica`.
    pub async fn wait_for_status(&self, replica: u64, id: &str, status: TxnStatus) {
        let store = self.store(replica);
        let id = TxnId::new(id);
        let deadline = tokio::time::Instant::now() + WAIT;
        while tokio::time::Instant::now() < deadline {
            if matches!(store.txn(&id), Ok(Some(txn)) if txn.status == status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let current = store.txn(&id).ok().flatten().map(|t| t.status);
        panic!(
            "{} on replica {} never reached {} (now {:?})",
            id, replica, status, current
        );
    }

    /// Wait until `id` has `status` on every replica of `cluster`.
    pub async fn wait_for_cluster_status(&self, cluster: u64, id: &str, status: TxnStatus) {
        for replica in self.members(cluster) {
            self.wait_for_status(replica.0, id, status).await;
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Fault injection
    // ═══════════════════════════════════════════════════════════════════════

    pub fn set_alive(&self, replica: u64, alive: bool) {
        self.replica(replica)
            .update_server_state(UpdateServerState::alive(alive));
    }

    pub fn set_byzantine(&self, replica: u64, byzantine: bool) {
        self.replica(replica)
            .update_server_state(UpdateServerState::byzantine(byzantine));
    }

    /// Move every replica of `cluster` to `view`.
    pub fn set_view(&self, cluster: u64, view: u64) {
        for replica in self.members(cluster) {
            self.replicas[&replica].set_view(ViewNumber(view));
        }
    }

    /// Stop every replica and break the network's references to them.
    pub async fn shutdown(self) {
        for replica in self.replicas.values() {
            replica.shutdown().await;
        }
        self.network.clear();
    }
}
