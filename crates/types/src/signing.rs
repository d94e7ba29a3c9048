//! Domain-separated signing for cryptographic operations.
//!
//! Every signed byte string starts with a domain tag unique to its purpose,
//! so a signature produced in one context can never be replayed in another
//! (a prepare vote cannot stand in for a commit vote, a sync response cannot
//! stand in for a 2PC decision).
//!
//! # Domain Tags
//!
//! | Tag | Purpose |
//! |-----|---------|
//! | `txn_digest:` | Transaction digest (hashed, not signed) |
//! | `pbft_pre_prepare:` / `pbft_prepare:` / `pbft_commit:` | Transaction round votes |
//! | `twopc_pre_prepare:` / `twopc_prepare:` / `twopc_commit:` | Outcome round votes |
//! | `certificate:` | Certificate assembler signature |
//! | `twopc_prepare_request:` / `twopc_prepare_response:` / `twopc_commit_request:` | Cross-cluster 2PC messages |
//! | `twopc_decision:` | Outcome directive to lagging replicas |
//! | `round_failed:` | Round failure notice |
//! | `sync_request:` / `sync_response:` | Catch-up |
//!
//! All integers are encoded little-endian; variable-length fields are
//! length-prefixed.

use crate::{ClusterId, Hash, Outcome, Phase, ReplicaId, SequenceNumber, TxnId, ViewNumber};

/// Domain tag for the transaction digest.
///
/// Format: `txn_digest:` || sender || receiver || amount
pub const DOMAIN_TXN_DIGEST: &[u8] = b"txn_digest:";

/// Domain tags for votes, one per phase.
///
/// Format: tag || view || seq || digest || outcome
pub const DOMAIN_PRE_PREPARE: &[u8] = b"pbft_pre_prepare:";
pub const DOMAIN_PREPARE: &[u8] = b"pbft_prepare:";
pub const DOMAIN_COMMIT: &[u8] = b"pbft_commit:";
pub const DOMAIN_TWO_PC_PRE_PREPARE: &[u8] = b"twopc_pre_prepare:";
pub const DOMAIN_TWO_PC_PREPARE: &[u8] = b"twopc_prepare:";
pub const DOMAIN_TWO_PC_COMMIT: &[u8] = b"twopc_commit:";
pub const DOMAIN_EVIDENCE_FROM_COORDINATOR: &[u8] = b"evidence_from_coordinator:";
pub const DOMAIN_EVIDENCE_FROM_PARTICIPANT: &[u8] = b"evidence_from_participant:";
pub const DOMAIN_DECISION_FROM_COORDINATOR: &[u8] = b"decision_from_coordinator:";

/// Domain tag for certificate assembler signatures.
///
/// Format: `certificate:` || cluster || vote fields || signer count || signers
pub const DOMAIN_CERTIFICATE: &[u8] = b"certificate:";

/// Domain tags for cross-cluster 2PC messages.
///
/// Format: tag || txn_id || digest || outcome || certificate hash
pub const DOMAIN_TWO_PC_PREPARE_REQUEST: &[u8] = b"twopc_prepare_request:";
pub const DOMAIN_TWO_PC_PREPARE_RESPONSE: &[u8] = b"twopc_prepare_response:";
pub const DOMAIN_TWO_PC_COMMIT_REQUEST: &[u8] = b"twopc_commit_request:";

/// Domain tag for the outcome directive a leader sends to its own replicas.
///
/// Format: `twopc_decision:` || txn_id || digest || outcome || certificate hash
pub const DOMAIN_TWO_PC_DECISION: &[u8] = b"twopc_decision:";

/// Domain tag for round failure notices.
///
/// Format: `round_failed:` || txn_id || view || seq || digest || outcome
pub const DOMAIN_ROUND_FAILED: &[u8] = b"round_failed:";

/// Domain tags for catch-up.
///
/// Request format: `sync_request:` || requester || last_executed
/// Response format: `sync_response:` || responder || last_executed || records hash
pub const DOMAIN_SYNC_REQUEST: &[u8] = b"sync_request:";
pub const DOMAIN_SYNC_RESPONSE: &[u8] = b"sync_response:";

fn outcome_byte(outcome: Option<Outcome>) -> u8 {
    outcome.map(Outcome::tag).unwrap_or(0)
}

fn push_txn_id(message: &mut Vec<u8>, txn_id: &TxnId) {
    let bytes = txn_id.as_str().as_bytes();
    message.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    message.extend_from_slice(bytes);
}

/// Build the signing message for a vote.
pub fn vote_message(
    phase: Phase,
    view: ViewNumber,
    seq: SequenceNumber,
    digest: &Hash,
    outcome: Option<Outcome>,
) -> Vec<u8> {
    let tag = phase.domain();
    let mut message = Vec::with_capacity(tag.len() + 49);
    message.extend_from_slice(tag);
    message.extend_from_slice(&view.0.to_le_bytes());
    message.extend_from_slice(&seq.0.to_le_bytes());
    message.extend_from_slice(digest.as_bytes());
    message.push(outcome_byte(outcome));
    message
}

/// Build the signing message for a certificate.
pub fn certificate_message(
    cluster: ClusterId,
    phase: Phase,
    view: ViewNumber,
    seq: SequenceNumber,
    digest: &Hash,
    outcome: Option<Outcome>,
    signers: &[ReplicaId],
) -> Vec<u8> {
    let mut message = Vec::with_capacity(128 + signers.len() * 8);
    message.extend_from_slice(DOMAIN_CERTIFICATE);
    message.extend_from_slice(&cluster.0.to_le_bytes());
    message.extend_from_slice(&vote_message(phase, view, seq, digest, outcome));
    message.extend_from_slice(&(signers.len() as u64).to_le_bytes());
    for signer in signers {
        message.extend_from_slice(&signer.0.to_le_bytes());
    }
    message
}

/// Build the signing message for a cross-cluster 2PC message or decision.
///
/// `domain` must be one of the `DOMAIN_TWO_PC_*` tags.
pub fn two_pc_message(
    domain: &[u8],
    txn_id: &TxnId,
    digest: &Hash,
    outcome: Outcome,
    certificate: Option<&Hash>,
) -> Vec<u8> {
    let mut message = Vec::with_capacity(domain.len() + 96);
    message.extend_from_slice(domain);
    push_txn_id(&mut message, txn_id);
    message.extend_from_slice(digest.as_bytes());
    message.push(outcome.tag());
    match certificate {
        Some(hash) => {
            message.push(1);
            message.extend_from_slice(hash.as_bytes());
        }
        None => message.push(0),
    }
    message
}

/// Build the signing message for a round failure notice.
pub fn round_failed_message(
    txn_id: &TxnId,
    view: ViewNumber,
    seq: SequenceNumber,
    digest: &Hash,
    outcome: Option<Outcome>,
) -> Vec<u8> {
    let mut message = Vec::with_capacity(96);
    message.extend_from_slice(DOMAIN_ROUND_FAILED);
    push_txn_id(&mut message, txn_id);
    message.extend_from_slice(&view.0.to_le_bytes());
    message.extend_from_slice(&seq.0.to_le_bytes());
    message.extend_from_slice(digest.as_bytes());
    message.push(outcome_byte(outcome));
    message
}

/// Build the signing message for a sync request.
pub fn sync_request_message(requester: ReplicaId, last_executed: SequenceNumber) -> Vec<u8> {
    let mut message = Vec::with_capacity(32);
    message.extend_from_slice(DOMAIN_SYNC_REQUEST);
    message.extend_from_slice(&requester.0.to_le_bytes());
    message.extend_from_slice(&last_executed.0.to_le_bytes());
    message
}

/// Build the signing message for a sync response.
pub fn sync_response_message(
    responder: ReplicaId,
    last_executed: SequenceNumber,
    records_hash: &Hash,
) -> Vec<u8> {
    let mut message = Vec::with_capacity(64);
    message.extend_from_slice(DOMAIN_SYNC_RESPONSE);
    message.extend_from_slice(&responder.0.to_le_bytes());
    message.extend_from_slice(&last_executed.0.to_le_bytes());
    message.extend_from_slice(records_hash.as_bytes());
    message
}
