//! Vote and certificate verification against the shard map.
//!
//! A certificate is accepted iff it holds at least `need` distinct votes
//! that are each signed by a member of the certificate's cluster and are
//! each about the expected transaction, phase, view, sequence and outcome.
//! Invalid votes inside a certificate are dropped and logged; they only
//! fail the certificate if what remains is below `need`.

use byzshard_core::{AuthError, ConsensusError};
use byzshard_types::{
    ClusterId, ConsensusMessage, Outcome, Phase, QuorumCertificate, ShardMap, Transaction,
};
use std::collections::HashSet;
use tracing::warn;

/// Check a single vote's signer membership and signature.
pub fn verify_vote(
    map: &ShardMap,
    cluster: ClusterId,
    vote: &ConsensusMessage,
) -> Result<(), AuthError> {
    if !map.members(cluster).contains(&vote.sender) {
        return Err(AuthError::ForeignSigner {
            signer: vote.sender,
            cluster,
        });
    }
    let public_key = map
        .public_key(vote.sender)
        .ok_or(AuthError::UnknownSigner(vote.sender))?;
    if !vote.verify(public_key) {
        return Err(AuthError::BadSignature(vote.sender));
    }
    Ok(())
}

/// What a certificate must prove.
#[derive(Debug, Clone, Copy)]
pub struct Expected<'a> {
    /// Cluster whose members must have voted.
    pub cluster: ClusterId,
    /// Phase of every vote.
    pub phase: Phase,
    /// Transaction as known to the verifier.
    pub txn: &'a Transaction,
    /// Outcome bound into every vote.
    pub outcome: Option<Outcome>,
    /// Votes required.
    pub need: usize,
}

/// Verify a certificate. Returns the number of valid votes.
pub fn verify_certificate(
    map: &ShardMap,
    cert: &QuorumCertificate,
    expected: Expected<'_>,
) -> Result<usize, ConsensusError> {
    let txn = expected.txn;
    if cert.cluster != expected.cluster
        || cert.phase != expected.phase
        || cert.txn_id != txn.id
        || cert.view != txn.view
        || cert.seq != txn.seq
        || cert.digest != txn.digest
        || cert.outcome != expected.outcome
    {
        return Err(AuthError::PayloadMismatch(cert.assembler).into());
    }

    if !map.members(expected.cluster).contains(&cert.assembler) {
        return Err(AuthError::ForeignSigner {
            signer: cert.assembler,
            cluster: expected.cluster,
        }
        .into());
    }
    let assembler_key = map
        .public_key(cert.assembler)
        .ok_or(AuthError::UnknownSigner(cert.assembler))?;
    if !cert.verify_assembler(assembler_key) {
        return Err(AuthError::BadSignature(cert.assembler).into());
    }

    let mut seen = HashSet::new();
    let mut valid = 0;
    for vote in &cert.votes {
        if !seen.insert(vote.sender) {
            warn!(txn_id = %txn.id, signer = %vote.sender, "Duplicate vote in certificate");
            continue;
        }
        if vote.txn_id != txn.id
            || !vote.matches(expected.phase, txn.view, txn.seq, &txn.digest, expected.outcome)
        {
            warn!(txn_id = %txn.id, signer = %vote.sender, "Certificate vote about another payload");
            continue;
        }
        if let Err(err) = verify_vote(map, expected.cluster, vote) {
            warn!(txn_id = %txn.id, error = %err, "Invalid vote in certificate");
            continue;
        }
        valid += 1;
    }

    if valid < expected.need {
        return Err(ConsensusError::Quorum {
            phase: expected.phase,
            have: valid,
            need: expected.need,
        });
    }
    Ok(valid)
}
