//! Cross-cluster two-phase commit messages.

use crate::response::Ack;
use crate::{NetworkMessage, Request};
use byzshard_types::{
    signing, Hash, KeyPair, Outcome, PublicKey, QuorumCertificate, ReplicaId, Signature,
    Transaction, TxnId,
};
use serde::{Deserialize, Serialize};

/// Which step of the cross-cluster exchange a [`TwoPcMessage`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TwoPcKind {
    /// Coordinator → participant replicas: "my cluster committed this".
    PrepareRequest,
    /// Participant leader → coordinator replicas: "my cluster is ready" or not.
    PrepareResponse,
    /// Coordinator → participant replicas: the decided outcome.
    CommitRequest,
}

impl TwoPcKind {
    fn domain(self) -> &'static [u8] {
        match self {
            TwoPcKind::PrepareRequest => signing::DOMAIN_TWO_PC_PREPARE_REQUEST,
            TwoPcKind::PrepareResponse => signing::DOMAIN_TWO_PC_PREPARE_RESPONSE,
            TwoPcKind::CommitRequest => signing::DOMAIN_TWO_PC_COMMIT_REQUEST,
        }
    }
}

fn certificate_hash(certificate: Option<&QuorumCertificate>) -> Option<Hash> {
    certificate.map(|cert| Hash::from_bytes(&cert.signing_message()))
}

/// A signed cross-cluster 2PC message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoPcMessage {
    /// Exchange step.
    pub kind: TwoPcKind,
    /// Sending replica (a member of the other cluster).
    pub sender: ReplicaId,
    /// The transaction as stored by the sender's cluster.
    pub txn: Transaction,
    /// Outcome claimed by the sender.
    pub outcome: Outcome,
    /// Proof from the sender's cluster. Absent on an abort response.
    pub certificate: Option<QuorumCertificate>,
    /// Sender's signature.
    pub signature: Signature,
}

impl TwoPcMessage {
    /// Build and sign a message.
    pub fn sign(
        keypair: &KeyPair,
        kind: TwoPcKind,
        sender: ReplicaId,
        txn: Transaction,
        outcome: Outcome,
        certificate: Option<QuorumCertificate>,
    ) -> Self {
        let message = signing::two_pc_message(
            kind.domain(),
            &txn.id,
            &txn.digest,
            outcome,
            certificate_hash(certificate.as_ref()).as_ref(),
        );
        Self {
            kind,
            sender,
            txn,
            outcome,
            certificate,
            signature: keypair.sign(&message),
        }
    }

    /// Verify the sender's signature.
    pub fn verify(&self, public_key: &PublicKey) -> bool {
        let message = signing::two_pc_message(
            self.kind.domain(),
            &self.txn.id,
            &self.txn.digest,
            self.outcome,
            certificate_hash(self.certificate.as_ref()).as_ref(),
        );
        public_key.verify(&message, &self.signature)
    }
}

impl NetworkMessage for TwoPcMessage {
    fn message_type_id() -> &'static str {
        "twopc.message"
    }
}

impl Request for TwoPcMessage {
    type Response = Ack;
}

/// Outcome directive from a leader to replicas of its own cluster.
///
/// Sent to replicas that did not acknowledge the outcome round, carrying the
/// round's certificate so they can apply the outcome without trusting the
/// leader alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoPcDecision {
    /// Leader sending the directive.
    pub sender: ReplicaId,
    /// Transaction decided.
    pub txn_id: TxnId,
    /// Digest of the transaction.
    pub digest: Hash,
    /// Decided outcome.
    pub outcome: Outcome,
    /// Certificate of the cluster's outcome round.
    pub certificate: QuorumCertificate,
    /// Leader's signature.
    pub signature: Signature,
}

impl TwoPcDecision {
    /// Build and sign a directive.
    pub fn sign(
        keypair: &KeyPair,
        sender: ReplicaId,
        txn_id: TxnId,
        digest: Hash,
        outcome: Outcome,
        certificate: QuorumCertificate,
    ) -> Self {
        let message = signing::two_pc_message(
            signing::DOMAIN_TWO_PC_DECISION,
            &txn_id,
            &digest,
            outcome,
            certificate_hash(Some(&certificate)).as_ref(),
        );
        Self {
            sender,
            txn_id,
            digest,
            outcome,
            certificate,
            signature: keypair.sign(&message),
        }
    }

    /// Verify the leader's signature.
    pub fn verify(&self, public_key: &PublicKey) -> bool {
        let message = signing::two_pc_message(
            signing::DOMAIN_TWO_PC_DECISION,
            &self.txn_id,
            &self.digest,
            self.outcome,
            certificate_hash(Some(&self.certificate)).as_ref(),
        );
        public_key.verify(&message, &self.signature)
    }
}

impl NetworkMessage for TwoPcDecision {
    fn message_type_id() -> &'static str {
        "twopc.decision"
    }
}

impl Request for TwoPcDecision {
    type Response = Ack;
}

#[cfg(test)]
mod tests {
    use super::*;
    use byzshard_types::AccountId;

    #[test]
    fn test_kind_is_bound_into_signature() {
        let keypair = KeyPair::from_seed(&[4u8; 32]);
        let txn = Transaction::new("t1", AccountId(1), AccountId(1500), 5);

        let mut message = TwoPcMessage::sign(
            &keypair,
            TwoPcKind::PrepareResponse,
            ReplicaId(5),
            txn,
            Outcome::Abort,
            None,
        );
        assert!(message.verify(&keypair.public_key()));

        message.kind = TwoPcKind::CommitRequest;
        assert!(!message.verify(&keypair.public_key()));
    }

    #[test]
    fn test_outcome_is_bound_into_signature() {
        let keypair = KeyPair::from_seed(&[4u8; 32]);
        let txn = Transaction::new("t1", AccountId(1), AccountId(1500), 5);

        let mut message = TwoPcMessage::sign(
            &keypair,
            TwoPcKind::PrepareResponse,
            ReplicaId(5),
            txn,
            Outcome::Abort,
            None,
        );
        message.outcome = Outcome::Commit;
        assert!(!message.verify(&keypair.public_key()));
    }
}
