//! Checks on messages and certificates that come from another cluster.

use byzshard_bft::{verify_certificate, ConsensusContext, Expected};
use byzshard_core::{AuthError, ConsensusError, ValidationError};
use byzshard_messages::{TwoPcKind, TwoPcMessage};
use byzshard_types::{
    AccountId, ClusterId, Outcome, Phase, QuorumCertificate, Topology, TopologyError, Transaction,
};

/// Cluster owning `account` in the current shard map.
pub(crate) fn owner(topology: &dyn Topology, account: AccountId) -> Result<ClusterId, ConsensusError> {
    topology
        .cluster_of_account(account)
        .ok_or_else(|| TopologyError::UnknownAccount(account).into())
}

/// The local cluster must own `account`.
pub(crate) fn require_local(ctx: &ConsensusContext, account: AccountId) -> Result<(), ConsensusError> {
    if owner(ctx.topology().as_ref(), account)? != ctx.local_cluster()? {
        return Err(ValidationError::Topology(TopologyError::NotOwned(account)).into());
    }
    Ok(())
}

/// The message must be the expected exchange step.
pub(crate) fn expect_kind(message: &TwoPcMessage, kind: TwoPcKind) -> Result<(), ConsensusError> {
    if message.kind != kind {
        return Err(ValidationError::Malformed(format!(
            "{:?} sent as {:?}",
            message.kind, kind
        ))
        .into());
    }
    Ok(())
}

/// Authenticate a 2PC message as sent by a member of `cluster`.
pub(crate) fn verify_message(
    ctx: &ConsensusContext,
    message: &TwoPcMessage,
    cluster: ClusterId,
) -> Result<(), ConsensusError> {
    if !ctx.topology().members(cluster).contains(&message.sender) {
        return Err(AuthError::ForeignSigner {
            signer: message.sender,
            cluster,
        }
        .into());
    }
    let key = ctx
        .topology()
        .public_key(message.sender)
        .ok_or(AuthError::UnknownSigner(message.sender))?;
    if !message.verify(&key) {
        return Err(AuthError::BadSignature(message.sender).into());
    }
    if !message.txn.digest_matches() {
        return Err(ValidationError::DigestMismatch.into());
    }
    Ok(())
}

/// Verify a certificate of `cluster` about `txn`, accepting any of `phases`.
pub(crate) fn verify_evidence(
    ctx: &ConsensusContext,
    cert: &QuorumCertificate,
    cluster: ClusterId,
    txn: &Transaction,
    outcome: Option<Outcome>,
    phases: &[Phase],
) -> Result<(), ConsensusError> {
    if !phases.contains(&cert.phase) {
        return Err(AuthError::PayloadMismatch(cert.assembler).into());
    }
    let map = ctx.topology().shard_map();
    verify_certificate(
        &map,
        cert,
        Expected {
            cluster,
            phase: cert.phase,
            txn,
            outcome,
            need: ctx.majority(cluster),
        },
    )?;
    Ok(())
}

/// Keep the votes of another cluster's certificate under `label`.
pub(crate) fn store_evidence(
    ctx: &ConsensusContext,
    label: Phase,
    cert: &QuorumCertificate,
) -> Result<(), ConsensusError> {
    for vote in &cert.votes {
        ctx.store().append_message(label, vote)?;
    }
    Ok(())
}
