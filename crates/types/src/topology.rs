//! Shard membership and the topology read interface.
//!
//! A [`ShardMap`] is an immutable snapshot of cluster membership, replica keys
//! and the account-to-cluster mapping. Replicas read it through the
//! [`Topology`] trait; the only writer is the administrative
//! `UpdateServerState` call, which swaps in a whole new snapshot.

use crate::{AccountId, ClusterId, PublicKey, ReplicaId, TxnKind, ViewNumber};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Static information about one replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaInfo {
    /// Replica number.
    pub id: ReplicaId,
    /// Network address, opaque to the consensus core.
    pub address: String,
    /// Key used to verify this replica's signatures.
    pub public_key: PublicKey,
}

/// Default majority for a cluster of `n` replicas: `⌈(n + f + 1) / 2⌉` with
/// `f = ⌊(n − 1) / 3⌋`.
pub fn default_majority(n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    let f = (n - 1) / 3;
    (n + f + 2) / 2
}

/// Immutable snapshot of shard membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardMap {
    /// Ordered replica list per cluster. Order decides leadership.
    clusters: BTreeMap<ClusterId, Vec<ReplicaId>>,
    /// Replica details.
    replicas: BTreeMap<ReplicaId, ReplicaInfo>,
    /// Accounts per cluster.
    shard_size: u64,
    /// Per-cluster majority overrides.
    majority_overrides: BTreeMap<ClusterId, usize>,
}

impl ShardMap {
    /// Create an empty map with `shard_size` accounts per cluster.
    pub fn new(shard_size: u64) -> Self {
        Self {
            clusters: BTreeMap::new(),
            replicas: BTreeMap::new(),
            shard_size: shard_size.max(1),
            majority_overrides: BTreeMap::new(),
        }
    }

    /// Add a cluster with its ordered members.
    pub fn with_cluster(mut self, cluster: ClusterId, members: Vec<ReplicaInfo>) -> Self {
        let ids = members.iter().map(|r| r.id).collect();
        for info in members {
            self.replicas.insert(info.id, info);
        }
        self.clusters.insert(cluster, ids);
        self
    }

    /// Override the majority threshold of a cluster.
    pub fn with_majority(mut self, cluster: ClusterId, majority: usize) -> Self {
        self.majority_overrides.insert(cluster, majority);
        self
    }

    /// Replace the number of accounts per cluster.
    pub fn with_shard_size(mut self, shard_size: u64) -> Self {
        self.shard_size = shard_size.max(1);
        self
    }

    /// Accounts per cluster.
    pub fn shard_size(&self) -> u64 {
        self.shard_size
    }

    /// All cluster ids in order.
    pub fn clusters(&self) -> impl Iterator<Item = ClusterId> + '_ {
        self.clusters.keys().copied()
    }

    /// Ordered members of a cluster (empty if unknown).
    pub fn members(&self, cluster: ClusterId) -> &[ReplicaId] {
        self.clusters
            .get(&cluster)
            .map(|m| m.as_slice())
            .unwrap_or(&[])
    }

    /// Details of a replica.
    pub fn replica(&self, id: ReplicaId) -> Option<&ReplicaInfo> {
        self.replicas.get(&id)
    }

    /// Public key of a replica.
    pub fn public_key(&self, id: ReplicaId) -> Option<&PublicKey> {
        self.replicas.get(&id).map(|r| &r.public_key)
    }

    /// Cluster a replica belongs to.
    pub fn cluster_of_replica(&self, id: ReplicaId) -> Option<ClusterId> {
        self.clusters
            .iter()
            .find(|(_, members)| members.contains(&id))
            .map(|(cluster, _)| *cluster)
    }

    /// Cluster owning an account: `⌈account / shard_size⌉`.
    ///
    /// Returns `None` if that cluster is not in the map.
    pub fn cluster_of_account(&self, account: AccountId) -> Option<ClusterId> {
        let cluster = ClusterId(account.0.div_ceil(self.shard_size));
        self.clusters.contains_key(&cluster).then_some(cluster)
    }

    /// Votes needed for a certificate in `cluster`.
    pub fn majority(&self, cluster: ClusterId) -> usize {
        self.majority_overrides
            .get(&cluster)
            .copied()
            .unwrap_or_else(|| default_majority(self.members(cluster).len()))
    }

    /// Leader of a cluster in a view: `members[(view − 1) mod n]`.
    pub fn leader(&self, cluster: ClusterId, view: ViewNumber) -> Option<ReplicaId> {
        let members = self.members(cluster);
        if members.is_empty() {
            return None;
        }
        let index = (view.0.saturating_sub(1) % members.len() as u64) as usize;
        Some(members[index])
    }

    /// Classify a transfer relative to `local` cluster.
    pub fn classify(
        &self,
        sender: AccountId,
        receiver: AccountId,
        local: ClusterId,
    ) -> Result<TxnKind, TopologyError> {
        let sender_cluster = self
            .cluster_of_account(sender)
            .ok_or(TopologyError::UnknownAccount(sender))?;
        let receiver_cluster = self
            .cluster_of_account(receiver)
            .ok_or(TopologyError::UnknownAccount(receiver))?;

        if sender_cluster == receiver_cluster {
            if sender_cluster == local {
                Ok(TxnKind::IntraShard)
            } else {
                Err(TopologyError::NotOwned(sender))
            }
        } else if sender_cluster == local {
            Ok(TxnKind::CrossShardSender)
        } else if receiver_cluster == local {
            Ok(TxnKind::CrossShardReceiver)
        } else {
            Err(TopologyError::NotOwned(sender))
        }
    }
}

/// Narrow read interface over shard membership.
pub trait Topology: Send + Sync {
    /// The local replica's id.
    fn local_replica(&self) -> ReplicaId;

    /// Current membership snapshot.
    fn shard_map(&self) -> Arc<ShardMap>;

    // Derived methods

    /// Cluster of the local replica.
    fn local_cluster(&self) -> Option<ClusterId> {
        self.shard_map().cluster_of_replica(self.local_replica())
    }

    /// Ordered members of a cluster.
    fn members(&self, cluster: ClusterId) -> Vec<ReplicaId> {
        self.shard_map().members(cluster).to_vec()
    }

    /// Members of the local cluster other than the local replica.
    fn local_peers(&self) -> Vec<ReplicaId> {
        let local = self.local_replica();
        match self.local_cluster() {
            Some(cluster) => self
                .members(cluster)
                .into_iter()
                .filter(|r| *r != local)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Votes needed for a certificate in `cluster`.
    fn majority(&self, cluster: ClusterId) -> usize {
        self.shard_map().majority(cluster)
    }

    /// Public key of a replica.
    fn public_key(&self, replica: ReplicaId) -> Option<PublicKey> {
        self.shard_map().public_key(replica).cloned()
    }

    /// Leader of a cluster in a view.
    fn leader(&self, cluster: ClusterId, view: ViewNumber) -> Option<ReplicaId> {
        self.shard_map().leader(cluster, view)
    }

    /// Whether the local replica leads its cluster in `view`.
    fn is_local_leader(&self, view: ViewNumber) -> bool {
        self.local_cluster()
            .and_then(|cluster| self.leader(cluster, view))
            .is_some_and(|leader| leader == self.local_replica())
    }

    /// Cluster owning an account.
    fn cluster_of_account(&self, account: AccountId) -> Option<ClusterId> {
        self.shard_map().cluster_of_account(account)
    }
}

/// Topology whose snapshot can be swapped atomically by the admin path.
#[derive(Debug)]
pub struct SharedTopology {
    local: ReplicaId,
    map: ArcSwap<ShardMap>,
}

impl SharedTopology {
    /// Create a topology for `local` over an initial snapshot.
    pub fn new(local: ReplicaId, map: ShardMap) -> Self {
        Self {
            local,
            map: ArcSwap::from_pointee(map),
        }
    }

    /// Create a topology as an Arc.
    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Replace the membership snapshot.
    pub fn replace(&self, map: ShardMap) {
        self.map.store(Arc::new(map));
    }
}

impl Topology for SharedTopology {
    fn local_replica(&self) -> ReplicaId {
        self.local
    }

    fn shard_map(&self) -> Arc<ShardMap> {
        self.map.load_full()
    }
}

/// Errors that can occur when resolving accounts against the shard map.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    /// No cluster in the map owns this account.
    #[error("{0} is not owned by any cluster")]
    UnknownAccount(AccountId),

    /// The account is owned by another cluster.
    #[error("{0} is not owned by this cluster")]
    NotOwned(AccountId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyPair;

    fn info(id: u64) -> ReplicaInfo {
        ReplicaInfo {
            id: ReplicaId(id),
            address: format!("replica-{}", id),
            public_key: KeyPair::from_seed(&[id as u8; 32]).public_key(),
        }
    }

    fn two_clusters() -> ShardMap {
        ShardMap::new(1000)
            .with_cluster(ClusterId(1), (1..=4).map(info).collect())
            .with_cluster(ClusterId(2), (5..=8).map(info).collect())
    }

    #[test]
    fn test_default_majority() {
        assert_eq!(default_majority(1), 1);
        assert_eq!(default_majority(3), 2);
        assert_eq!(default_majority(4), 3);
        assert_eq!(default_majority(7), 5);
    }

    #[test]
    fn test_majority_override() {
        let map = two_clusters().with_majority(ClusterId(2), 4);
        assert_eq!(map.majority(ClusterId(1)), 3);
        assert_eq!(map.majority(ClusterId(2)), 4);
    }

    #[test]
    fn test_account_to_cluster() {
        let map = two_clusters();
        assert_eq!(map.cluster_of_account(AccountId(1)), Some(ClusterId(1)));
        assert_eq!(map.cluster_of_account(AccountId(1000)), Some(ClusterId(1)));
        assert_eq!(map.cluster_of_account(AccountId(1001)), Some(ClusterId(2)));
        assert_eq!(map.cluster_of_account(AccountId(0)), None);
        assert_eq!(map.cluster_of_account(AccountId(2001)), None);
    }

    #[test]
    fn test_leader_rotation() {
        let map = two_clusters();
        assert_eq!(map.leader(ClusterId(1), ViewNumber(1)), Some(ReplicaId(1)));
        assert_eq!(map.leader(ClusterId(1), ViewNumber(2)), Some(ReplicaId(2)));
        assert_eq!(map.leader(ClusterId(1), ViewNumber(5)), Some(ReplicaId(1)));
        assert_eq!(map.leader(ClusterId(2), ViewNumber(1)), Some(ReplicaId(5)));
        assert_eq!(map.leader(ClusterId(3), ViewNumber(1)), None);
    }

    #[test]
    fn test_classify() {
        let map = two_clusters();
        let c1 = ClusterId(1);
        let c2 = ClusterId(2);

        assert_eq!(
            map.classify(AccountId(1), AccountId(2), c1),
            Ok(TxnKind::IntraShard)
        );
        assert_eq!(
            map.classify(AccountId(1), AccountId(1500), c1),
            Ok(TxnKind::CrossShardSender)
        );
        assert_eq!(
            map.classify(AccountId(1), AccountId(1500), c2),
            Ok(TxnKind::CrossShardReceiver)
        );
        assert_eq!(
            map.classify(AccountId(1), AccountId(2), c2),
            Err(TopologyError::NotOwned(AccountId(1)))
        );
        assert_eq!(
            map.classify(AccountId(1), AccountId(9000), c1),
            Err(TopologyError::UnknownAccount(AccountId(9000)))
        );
    }

    #[test]
    fn test_shared_topology_replace() {
        let topology = SharedTopology::new(ReplicaId(2), two_clusters());
        assert_eq!(topology.local_cluster(), Some(ClusterId(1)));
        assert!(!topology.is_local_leader(ViewNumber(1)));
        assert!(topology.is_local_leader(ViewNumber(2)));
        assert_eq!(
            topology.local_peers(),
            vec![ReplicaId(1), ReplicaId(3), ReplicaId(4)]
        );

        topology.replace(ShardMap::new(10).with_cluster(ClusterId(1), vec![info(2)]));
        assert!(topology.is_local_leader(ViewNumber(1)));
        assert_eq!(topology.shard_map().shard_size(), 10);
        assert!(topology.local_peers().is_empty());
    }
}
