//! Consensus phases and signed votes.

use crate::{
    signing, unix_millis, Hash, KeyPair, Outcome, PublicKey, ReplicaId, SequenceNumber,
    Signature, Transaction, TxnId, TxnStatus, ViewNumber,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Consensus message type.
///
/// The first six are voting phases. The last three label evidence received
/// from the other cluster of a cross-shard transaction; those are never
/// signed under their own tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    PrePrepare,
    Prepare,
    Commit,
    TwoPcPrePrepare,
    TwoPcPrepare,
    TwoPcCommit,
    TwoPcPrepareFromCoordinator,
    TwoPcPrepareFromParticipant,
    TwoPcCommitFromCoordinator,
}

impl Phase {
    /// Domain tag used when signing a vote of this phase.
    pub fn domain(self) -> &'static [u8] {
        match self {
            Phase::PrePrepare => signing::DOMAIN_PRE_PREPARE,
            Phase::Prepare => signing::DOMAIN_PREPARE,
            Phase::Commit => signing::DOMAIN_COMMIT,
            Phase::TwoPcPrePrepare => signing::DOMAIN_TWO_PC_PRE_PREPARE,
            Phase::TwoPcPrepare => signing::DOMAIN_TWO_PC_PREPARE,
            Phase::TwoPcCommit => signing::DOMAIN_TWO_PC_COMMIT,
            Phase::TwoPcPrepareFromCoordinator => signing::DOMAIN_EVIDENCE_FROM_COORDINATOR,
            Phase::TwoPcPrepareFromParticipant => signing::DOMAIN_EVIDENCE_FROM_PARTICIPANT,
            Phase::TwoPcCommitFromCoordinator => signing::DOMAIN_DECISION_FROM_COORDINATOR,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Which of the two round flavours a PBFT round runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoundKind {
    /// Agree on the transaction itself and its sequence number.
    Transaction,
    /// Agree on the 2PC outcome of an already sequenced transaction.
    Outcome(Outcome),
}

impl RoundKind {
    /// Outcome bound into every vote of this round, if any.
    pub fn outcome(self) -> Option<Outcome> {
        match self {
            RoundKind::Transaction => None,
            RoundKind::Outcome(outcome) => Some(outcome),
        }
    }

    /// The three voting phases of this round, in order.
    pub fn phases(self) -> [Phase; 3] {
        match self {
            RoundKind::Transaction => [Phase::PrePrepare, Phase::Prepare, Phase::Commit],
            RoundKind::Outcome(_) => [
                Phase::TwoPcPrePrepare,
                Phase::TwoPcPrepare,
                Phase::TwoPcCommit,
            ],
        }
    }

    /// Status recorded after each of the three phases.
    pub fn statuses(self) -> [TxnStatus; 3] {
        match self {
            RoundKind::Transaction => [
                TxnStatus::PrePrepared,
                TxnStatus::Prepared,
                TxnStatus::Committed,
            ],
            RoundKind::Outcome(_) => [
                TxnStatus::TwoPcPrePrepared,
                TxnStatus::TwoPcPrepared,
                TxnStatus::TwoPcCommitted,
            ],
        }
    }
}

impl fmt::Display for RoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundKind::Transaction => f.write_str("transaction"),
            RoundKind::Outcome(outcome) => write!(f, "outcome({})", outcome),
        }
    }
}

/// One replica's signed vote for a phase on a transaction digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusMessage {
    /// Transaction voted on.
    pub txn_id: TxnId,
    /// Phase of the vote.
    pub phase: Phase,
    /// Voting replica.
    pub sender: ReplicaId,
    /// View the vote was cast in.
    pub view: ViewNumber,
    /// Sequence number voted on.
    pub seq: SequenceNumber,
    /// Transaction digest voted on.
    pub digest: Hash,
    /// Outcome bound into outcome-round votes.
    pub outcome: Option<Outcome>,
    /// Signature over [`ConsensusMessage::payload`].
    pub signature: Signature,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl ConsensusMessage {
    /// Sign a vote for `phase` on `txn`.
    pub fn sign(
        keypair: &KeyPair,
        sender: ReplicaId,
        phase: Phase,
        txn: &Transaction,
        outcome: Option<Outcome>,
    ) -> Self {
        let payload = signing::vote_message(phase, txn.view, txn.seq, &txn.digest, outcome);
        Self {
            txn_id: txn.id.clone(),
            phase,
            sender,
            view: txn.view,
            seq: txn.seq,
            digest: txn.digest,
            outcome,
            signature: keypair.sign(&payload),
            timestamp_ms: unix_millis(),
        }
    }

    /// The signed payload.
    pub fn payload(&self) -> Vec<u8> {
        signing::vote_message(self.phase, self.view, self.seq, &self.digest, self.outcome)
    }

    /// Verify the signature against the sender's public key.
    pub fn verify(&self, public_key: &PublicKey) -> bool {
        public_key.verify(&self.payload(), &self.signature)
    }

    /// Whether this vote is about the same (phase, view, seq, digest, outcome).
    pub fn matches(
        &self,
        phase: Phase,
        view: ViewNumber,
        seq: SequenceNumber,
        digest: &Hash,
        outcome: Option<Outcome>,
    ) -> bool {
        self.phase == phase
            && self.view == view
            && self.seq == seq
            && &self.digest == digest
            && self.outcome == outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AccountId;

    #[test]
    fn test_vote_verifies_with_signer_key() {
        let keypair = KeyPair::from_seed(&[3u8; 32]);
        let mut txn = Transaction::new("t1", AccountId(1), AccountId(2), 5);
        txn.seq = SequenceNumber(4);

        let vote = ConsensusMessage::sign(&keypair, ReplicaId(1), Phase::Prepare, &txn, None);

        assert!(vote.verify(&keypair.public_key()));
        assert!(vote.matches(Phase::Prepare, txn.view, txn.seq, &txn.digest, None));
        assert!(!vote.matches(Phase::Commit, txn.view, txn.seq, &txn.digest, None));
    }

    #[test]
    fn test_tampered_vote_fails_verification() {
        let keypair = KeyPair::from_seed(&[3u8; 32]);
        let txn = Transaction::new("t1", AccountId(1), AccountId(2), 5);

        let mut vote =
            ConsensusMessage::sign(&keypair, ReplicaId(1), Phase::PrePrepare, &txn, None);
        vote.seq = SequenceNumber(99);
        assert!(!vote.verify(&keypair.public_key()));
    }

    #[test]
    fn test_outcome_is_bound_into_vote() {
        let keypair = KeyPair::from_seed(&[3u8; 32]);
        let txn = Transaction::new("t1", AccountId(1), AccountId(2), 5);

        let mut vote = ConsensusMessage::sign(
            &keypair,
            ReplicaId(1),
            Phase::TwoPcCommit,
            &txn,
            Some(Outcome::Commit),
        );
        vote.outcome = Some(Outcome::Abort);
        assert!(!vote.verify(&keypair.public_key()));
    }

    #[test]
    fn test_round_kind_phases() {
        assert_eq!(RoundKind::Transaction.phases()[0], Phase::PrePrepare);
        assert_eq!(
            RoundKind::Outcome(Outcome::Abort).phases()[2],
            Phase::TwoPcCommit
        );
        assert_eq!(RoundKind::Transaction.outcome(), None);
    }
}
