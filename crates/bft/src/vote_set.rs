//! Vote collection for one phase of one round.

use byzshard_core::AuthError;
use byzshard_types::{
    ClusterId, ConsensusMessage, Hash, KeyPair, Outcome, Phase, QuorumCertificate, ReplicaId,
    SequenceNumber, Transaction, TxnId, ViewNumber,
};
use indexmap::IndexMap;

/// Collects matching votes for a phase and forms the certificate.
///
/// Only votes about the exact (phase, view, seq, digest, outcome) of the
/// round are accepted, at most one per replica. Signature checks happen
/// before a vote is added.
#[derive(Debug)]
pub struct VoteSet {
    txn_id: TxnId,
    phase: Phase,
    view: ViewNumber,
    seq: SequenceNumber,
    digest: Hash,
    outcome: Option<Outcome>,
    /// Votes in arrival order.
    votes: IndexMap<ReplicaId, ConsensusMessage>,
    /// Votes required for a certificate.
    quorum: usize,
}

impl VoteSet {
    /// Create a vote set for `phase` of a round on `txn`.
    pub fn new(phase: Phase, txn: &Transaction, outcome: Option<Outcome>, quorum: usize) -> Self {
        Self {
            txn_id: txn.id.clone(),
            phase,
            view: txn.view,
            seq: txn.seq,
            digest: txn.digest,
            outcome,
            votes: IndexMap::new(),
            quorum,
        }
    }

    /// Add a vote whose signature has already been checked.
    pub fn add(&mut self, vote: ConsensusMessage) -> Result<(), AuthError> {
        if vote.txn_id != self.txn_id
            || !vote.matches(self.phase, self.view, self.seq, &self.digest, self.outcome)
        {
            return Err(AuthError::PayloadMismatch(vote.sender));
        }
        if self.votes.contains_key(&vote.sender) {
            return Err(AuthError::DuplicateSigner(vote.sender));
        }
        self.votes.insert(vote.sender, vote);
        Ok(())
    }

    /// Phase being collected.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of votes collected.
    pub fn len(&self) -> usize {
        self.votes.len()
    }

    /// Whether no vote has been collected.
    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// Votes required.
    pub fn quorum_needed(&self) -> usize {
        self.quorum
    }

    /// Check if quorum is reached.
    pub fn has_quorum(&self) -> bool {
        self.votes.len() >= self.quorum
    }

    /// Bundle the collected votes into a signed certificate.
    pub fn into_certificate(
        self,
        keypair: &KeyPair,
        assembler: ReplicaId,
        cluster: ClusterId,
    ) -> QuorumCertificate {
        QuorumCertificate::assemble(
            keypair,
            assembler,
            cluster,
            self.txn_id,
            self.phase,
            self.view,
            self.seq,
            self.digest,
            self.outcome,
            self.votes.into_values().collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byzshard_test_helpers::{keypair_for, sequenced_txn, signed_vote};

    #[test]
    fn test_quorum_after_distinct_votes() {
        let txn = sequenced_txn("t1", 1, 2, 5, 1);
        let mut votes = VoteSet::new(Phase::Prepare, &txn, None, 3);

        votes.add(signed_vote(1, Phase::Prepare, &txn, None)).unwrap();
        votes.add(signed_vote(2, Phase::Prepare, &txn, None)).unwrap();
        assert!(!votes.has_quorum());

        assert_eq!(
            votes.add(signed_vote(2, Phase::Prepare, &txn, None)),
            Err(AuthError::DuplicateSigner(ReplicaId(2)))
        );
        votes.add(signed_vote(3, Phase::Prepare, &txn, None)).unwrap();
        assert!(votes.has_quorum());

        let cert = votes.into_certificate(&keypair_for(1), ReplicaId(1), ClusterId(1));
        assert_eq!(cert.votes.len(), 3);
        assert!(cert.verify_assembler(&keypair_for(1).public_key()));
    }

    #[test]
    fn test_rejects_vote_for_other_payload() {
        let txn = sequenced_txn("t1", 1, 2, 5, 1);
        let other = sequenced_txn("t1", 1, 2, 5, 2);
        let mut votes = VoteSet::new(Phase::Commit, &txn, None, 3);

        assert_eq!(
            votes.add(signed_vote(2, Phase::Commit, &other, None)),
            Err(AuthError::PayloadMismatch(ReplicaId(2)))
        );
        assert_eq!(
            votes.add(signed_vote(2, Phase::Prepare, &txn, None)),
            Err(AuthError::PayloadMismatch(ReplicaId(2)))
        );
        assert_eq!(
            votes.add(signed_vote(2, Phase::Commit, &txn, Some(Outcome::Commit))),
            Err(AuthError::PayloadMismatch(ReplicaId(2)))
        );
        assert!(votes.is_empty());
    }
}
