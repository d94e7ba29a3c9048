//! PBFT phase requests.

use crate::response::{Ack, PbftReply};
use crate::{NetworkMessage, Request};
use byzshard_types::{
    signing, ConsensusMessage, Hash, KeyPair, PublicKey, QuorumCertificate, ReplicaId,
    RoundKind, SequenceNumber, Signature, Transaction, TxnId, ViewNumber,
};
use serde::{Deserialize, Serialize};

/// Evidence carried by a phase request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PbftBody {
    /// The leader's own signed pre-prepare vote.
    Proposal(ConsensusMessage),
    /// Certificate of the previous phase's votes.
    Certificate(QuorumCertificate),
}

/// PrePrepare, Prepare and Commit payload.
///
/// The transaction travels with every phase so a follower that missed an
/// earlier phase can still validate the digest and admit it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PbftRequest {
    /// Leader sending the request.
    pub sender: ReplicaId,
    /// The transaction as sequenced by the leader.
    pub txn: Transaction,
    /// Transaction round or outcome round.
    pub kind: RoundKind,
    /// Leader's last executed sequence number (catch-up hint, unsigned).
    pub last_executed: SequenceNumber,
    /// Proposal or certificate.
    pub body: PbftBody,
}

impl PbftRequest {
    /// Build a pre-prepare request.
    pub fn proposal(
        sender: ReplicaId,
        txn: Transaction,
        kind: RoundKind,
        last_executed: SequenceNumber,
        vote: ConsensusMessage,
    ) -> Self {
        Self {
            sender,
            txn,
            kind,
            last_executed,
            body: PbftBody::Proposal(vote),
        }
    }

    /// Same request with a certificate body, for the next phase.
    pub fn with_certificate(&self, certificate: QuorumCertificate) -> Self {
        Self {
            sender: self.sender,
            txn: self.txn.clone(),
            kind: self.kind,
            last_executed: self.last_executed,
            body: PbftBody::Certificate(certificate),
        }
    }

    /// The proposal vote, if this is a pre-prepare.
    pub fn proposal_vote(&self) -> Option<&ConsensusMessage> {
        match &self.body {
            PbftBody::Proposal(vote) => Some(vote),
            PbftBody::Certificate(_) => None,
        }
    }

    /// The certificate, if this is a prepare or commit.
    pub fn certificate(&self) -> Option<&QuorumCertificate> {
        match &self.body {
            PbftBody::Proposal(_) => None,
            PbftBody::Certificate(cert) => Some(cert),
        }
    }
}

impl NetworkMessage for PbftRequest {
    fn message_type_id() -> &'static str {
        "pbft.request"
    }
}

impl Request for PbftRequest {
    type Response = PbftReply;
}

/// Signed notice that a round was abandoned by the leader.
///
/// Followers release locks, mark the transaction failed and skip the
/// sequence slot so their execution order does not stall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundFailed {
    /// Leader that abandoned the round.
    pub sender: ReplicaId,
    /// Transaction of the round.
    pub txn_id: TxnId,
    /// Round flavour.
    pub kind: RoundKind,
    /// View of the round.
    pub view: ViewNumber,
    /// Sequence slot of the round.
    pub seq: SequenceNumber,
    /// Digest of the round.
    pub digest: Hash,
    /// Human-readable cause.
    pub reason: String,
    /// Leader's signature.
    pub signature: Signature,
}

impl RoundFailed {
    /// Build and sign a notice for `txn`.
    pub fn sign(
        keypair: &KeyPair,
        sender: ReplicaId,
        txn: &Transaction,
        kind: RoundKind,
        reason: impl Into<String>,
    ) -> Self {
        let message =
            signing::round_failed_message(&txn.id, txn.view, txn.seq, &txn.digest, kind.outcome());
        Self {
            sender,
            txn_id: txn.id.clone(),
            kind,
            view: txn.view,
            seq: txn.seq,
            digest: txn.digest,
            reason: reason.into(),
            signature: keypair.sign(&message),
        }
    }

    /// Verify the leader's signature.
    pub fn verify(&self, public_key: &PublicKey) -> bool {
        let message = signing::round_failed_message(
            &self.txn_id,
            self.view,
            self.seq,
            &self.digest,
            self.kind.outcome(),
        );
        public_key.verify(&message, &self.signature)
    }
}

impl NetworkMessage for RoundFailed {
    fn message_type_id() -> &'static str {
        "pbft.round_failed"
    }
}

impl Request for RoundFailed {
    type Response = Ack;
}

#[cfg(test)]
mod tests {
    use super::*;
    use byzshard_types::{AccountId, Outcome, Phase};

    #[test]
    fn test_with_certificate_keeps_header() {
        let keypair = KeyPair::from_seed(&[1u8; 32]);
        let txn = Transaction::new("t1", AccountId(1), AccountId(2), 5);
        let vote = ConsensusMessage::sign(&keypair, ReplicaId(1), Phase::PrePrepare, &txn, None);
        let request = PbftRequest::proposal(
            ReplicaId(1),
            txn.clone(),
            RoundKind::Transaction,
            SequenceNumber(3),
            vote.clone(),
        );
        assert_eq!(request.proposal_vote(), Some(&vote));
        assert!(request.certificate().is_none());

        let cert = QuorumCertificate::assemble(
            &keypair,
            ReplicaId(1),
            byzshard_types::ClusterId(1),
            txn.id.clone(),
            Phase::PrePrepare,
            txn.view,
            txn.seq,
            txn.digest,
            None,
            vec![vote],
        );
        let prepare = request.with_certificate(cert.clone());
        assert_eq!(prepare.txn, txn);
        assert_eq!(prepare.last_executed, SequenceNumber(3));
        assert_eq!(prepare.certificate(), Some(&cert));
    }

    #[test]
    fn test_round_failed_signature() {
        let keypair = KeyPair::from_seed(&[1u8; 32]);
        let txn = Transaction::new("t1", AccountId(1), AccountId(2), 5);

        let mut notice = RoundFailed::sign(
            &keypair,
            ReplicaId(1),
            &txn,
            RoundKind::Outcome(Outcome::Commit),
            "quorum not reached",
        );
        assert!(notice.verify(&keypair.public_key()));

        notice.kind = RoundKind::Outcome(Outcome::Abort);
        assert!(!notice.verify(&keypair.public_key()));
    }
}
