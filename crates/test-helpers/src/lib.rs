//! Deterministic fixtures for tests.
//!
//! Keys are derived from replica ids so any test can recompute the key of
//! any replica without sharing state. Every vote and certificate built here
//! carries a real signature.

use byzshard_types::{
    ClusterId, ConsensusMessage, KeyPair, Outcome, Phase, QuorumCertificate, ReplicaId,
    ReplicaInfo, SequenceNumber, ShardMap, Transaction, TxnKind,
};

/// Default accounts per cluster in fixtures.
pub const TEST_SHARD_SIZE: u64 = 1000;

/// Deterministic signing key of a replica.
pub fn keypair_for(replica: u64) -> KeyPair {
    let mut seed = [0u8; 32];
    seed[..8].copy_from_slice(&replica.to_le_bytes());
    seed[31] = 0xB5;
    KeyPair::from_seed(&seed)
}

/// Membership entry for a replica with its deterministic key.
pub fn replica_info(replica: u64) -> ReplicaInfo {
    ReplicaInfo {
        id: ReplicaId(replica),
        address: format!("127.0.0.1:{}", 7000 + replica),
        public_key: keypair_for(replica).public_key(),
    }
}

/// Shard map with `clusters` clusters of `per_cluster` replicas each.
///
/// Replica ids are assigned contiguously from 1, so cluster 1 holds
/// replicas `1..=per_cluster`, cluster 2 the next block, and so on.
pub fn test_shard_map(clusters: u64, per_cluster: u64, shard_size: u64) -> ShardMap {
    (1..=clusters).fold(ShardMap::new(shard_size), |map, cluster| {
        let first = (cluster - 1) * per_cluster + 1;
        let members = (first..first + per_cluster).map(replica_info).collect();
        map.with_cluster(ClusterId(cluster), members)
    })
}

/// Intra-shard transaction already assigned a sequence number.
pub fn sequenced_txn(id: &str, sender: u64, receiver: u64, amount: u64, seq: u64) -> Transaction {
    let mut txn = Transaction::new(
        id,
        byzshard_types::AccountId(sender),
        byzshard_types::AccountId(receiver),
        amount,
    );
    txn.seq = SequenceNumber(seq);
    txn
}

/// Same as [`sequenced_txn`] with an explicit kind.
pub fn sequenced_txn_of_kind(
    id: &str,
    sender: u64,
    receiver: u64,
    amount: u64,
    seq: u64,
    kind: TxnKind,
) -> Transaction {
    let mut txn = sequenced_txn(id, sender, receiver, amount, seq);
    txn.kind = kind;
    txn
}

/// Vote signed by `replica`'s deterministic key.
pub fn signed_vote(
    replica: u64,
    phase: Phase,
    txn: &Transaction,
    outcome: Option<Outcome>,
) -> ConsensusMessage {
    ConsensusMessage::sign(&keypair_for(replica), ReplicaId(replica), phase, txn, outcome)
}

/// Certificate assembled by the first voter over votes from every voter.
pub fn certificate(
    cluster: u64,
    voters: &[u64],
    phase: Phase,
    txn: &Transaction,
    outcome: Option<Outcome>,
) -> QuorumCertificate {
    let assembler = voters.first().copied().unwrap_or(1);
    let votes = voters
        .iter()
        .map(|r| signed_vote(*r, phase, txn, outcome))
        .collect();
    QuorumCertificate::assemble(
        &keypair_for(assembler),
        ReplicaId(assembler),
        ClusterId(cluster),
        txn.id.clone(),
        phase,
        txn.view,
        txn.seq,
        txn.digest,
        outcome,
        votes,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_stable_and_distinct() {
        assert_eq!(keypair_for(1).public_key(), keypair_for(1).public_key());
        assert_ne!(keypair_for(1).public_key(), keypair_for(2).public_key());
    }

    #[test]
    fn test_shard_map_layout() {
        let map = test_shard_map(2, 4, TEST_SHARD_SIZE);
        assert_eq!(
            map.members(ClusterId(2)),
            &[ReplicaId(5), ReplicaId(6), ReplicaId(7), ReplicaId(8)]
        );
        assert_eq!(map.cluster_of_replica(ReplicaId(4)), Some(ClusterId(1)));
    }

    #[test]
    fn test_certificate_signatures_verify() {
        let txn = sequenced_txn("t1", 1, 2, 5, 1);
        let cert = certificate(1, &[1, 2, 3], Phase::Prepare, &txn, None);
        assert!(cert.verify_assembler(&keypair_for(1).public_key()));
        assert!(cert
            .votes
            .iter()
            .all(|v| v.verify(&keypair_for(v.sender.0).public_key())));
    }
}
