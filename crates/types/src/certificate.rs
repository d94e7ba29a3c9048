//! Quorum certificates.

use crate::{
    signing, ClusterId, ConsensusMessage, Hash, KeyPair, Outcome, Phase, PublicKey, ReplicaId,
    SequenceNumber, Signature, TxnId, ViewNumber,
};
use serde::{Deserialize, Serialize};

/// A signed bundle of same-phase votes, forwarded as proof to the next phase.
///
/// The certificate itself only claims what the votes prove. Whether it holds
/// enough valid votes is decided by the verifier against the shard map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumCertificate {
    /// Transaction the votes are about.
    pub txn_id: TxnId,
    /// Cluster whose replicas cast the votes.
    pub cluster: ClusterId,
    /// Phase of every vote.
    pub phase: Phase,
    /// View of every vote.
    pub view: ViewNumber,
    /// Sequence number of every vote.
    pub seq: SequenceNumber,
    /// Digest of every vote.
    pub digest: Hash,
    /// Outcome of every vote (outcome rounds only).
    pub outcome: Option<Outcome>,
    /// The votes, at most one per replica.
    pub votes: Vec<ConsensusMessage>,
    /// Replica that assembled the certificate.
    pub assembler: ReplicaId,
    /// Assembler's signature over [`QuorumCertificate::signing_message`].
    pub signature: Signature,
}

impl QuorumCertificate {
    /// Bundle votes and sign the bundle.
    ///
    /// The caller is responsible for only passing votes that match the
    /// certificate header.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        keypair: &KeyPair,
        assembler: ReplicaId,
        cluster: ClusterId,
        txn_id: TxnId,
        phase: Phase,
        view: ViewNumber,
        seq: SequenceNumber,
        digest: Hash,
        outcome: Option<Outcome>,
        votes: Vec<ConsensusMessage>,
    ) -> Self {
        let mut cert = Self {
            txn_id,
            cluster,
            phase,
            view,
            seq,
            digest,
            outcome,
            votes,
            assembler,
            signature: Signature::zero(),
        };
        cert.signature = keypair.sign(&cert.signing_message());
        cert
    }

    /// Bytes signed by the assembler.
    pub fn signing_message(&self) -> Vec<u8> {
        let signers: Vec<ReplicaId> = self.votes.iter().map(|v| v.sender).collect();
        signing::certificate_message(
            self.cluster,
            self.phase,
            self.view,
            self.seq,
            &self.digest,
            self.outcome,
            &signers,
        )
    }

    /// Verify the assembler's signature only.
    pub fn verify_assembler(&self, public_key: &PublicKey) -> bool {
        public_key.verify(&self.signing_message(), &self.signature)
    }

    /// Replicas whose votes are bundled.
    pub fn signers(&self) -> impl Iterator<Item = ReplicaId> + '_ {
        self.votes.iter().map(|v| v.sender)
    }
}
