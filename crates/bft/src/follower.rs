//! Follower side of a PBFT round.
//!
//! Every request must come from the current leader of the local cluster and
//! carry a transaction whose digest matches its fields. PrePrepare carries
//! the leader's own signed vote; Prepare and Commit carry the certificate of
//! the previous phase, which is re-verified vote by vote.
//!
//! A follower that rejects a proposal (lock contention, insufficient funds)
//! only withholds its vote; the transaction stays open until the leader
//! either commits it with a quorum or announces the round failed.

use crate::context::ConsensusContext;
use crate::leader::{advance, advance_outcome, commit_locally, lock_accounts, validate_balance};
use crate::verify::{verify_certificate, Expected};
use byzshard_core::{AuthError, ConsensusError, ValidationError};
use byzshard_messages::{PbftReply, PbftRequest, RoundFailed};
use byzshard_types::{RoundKind, SequenceNumber, Transaction, TxnStatus};
use tracing::{debug, warn};

/// How strictly a transaction is admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Fresh proposal: take locks in the kind's mode and check the balance.
    Proposal,
    /// Already certified by a quorum: take what locks are free, skip checks.
    Certified,
}

/// Check sender leadership, view and digest of a phase request.
fn check_header(ctx: &ConsensusContext, req: &PbftRequest) -> Result<(), ConsensusError> {
    let leader = ctx.leader();
    if leader != Some(req.sender) {
        return Err(AuthError::WrongLeader {
            expected: leader,
            got: req.sender,
        }
        .into());
    }
    let view = ctx.view();
    if req.txn.view != view {
        return Err(ValidationError::ViewMismatch {
            expected: view,
            got: req.txn.view,
        }
        .into());
    }
    if req.txn.seq == SequenceNumber::NONE {
        return Err(ValidationError::Malformed("unsequenced transaction".into()).into());
    }
    if !req.txn.digest_matches() {
        return Err(ValidationError::DigestMismatch.into());
    }
    Ok(())
}

/// Handle a PrePrepare.
pub async fn on_pre_prepare(
    ctx: &ConsensusContext,
    req: PbftRequest,
) -> Result<PbftReply, ConsensusError> {
    debug!(txn_id = %req.txn.id, seq = req.txn.seq.0, kind = %req.kind, from = %req.sender, "PrePrepare received");
    check_header(ctx, &req)?;
    let phase = req.kind.phases()[0];
    let proposal = req
        .proposal_vote()
        .ok_or_else(|| ValidationError::Malformed("pre-prepare without proposal".into()))?;
    if proposal.sender != req.sender
        || proposal.txn_id != req.txn.id
        || !proposal.matches(
            phase,
            req.txn.view,
            req.txn.seq,
            &req.txn.digest,
            req.kind.outcome(),
        )
    {
        return Err(AuthError::PayloadMismatch(proposal.sender).into());
    }
    let leader_key = ctx
        .topology()
        .public_key(req.sender)
        .ok_or(AuthError::UnknownSigner(req.sender))?;
    if !proposal.verify(&leader_key) {
        return Err(AuthError::BadSignature(req.sender).into());
    }

    match req.kind {
        RoundKind::Transaction => {
            let stored = admit(ctx, &req.txn, Admission::Proposal).await?;
            if stored.status.is_terminal() {
                return Err(ValidationError::AlreadyFinal(stored.id, stored.status).into());
            }
        }
        RoundKind::Outcome(_) => {
            require_same_slot(ctx, &req.txn)?;
            advance_outcome(ctx.store().as_ref(), &req.txn.id, req.kind.statuses()[0])?;
        }
    }
    ctx.store().append_message(phase, proposal)?;
    let vote = ctx.sign_vote(phase, &req.txn, req.kind.outcome());
    ctx.store().append_message(phase, &vote)?;
    ctx.hint_catch_up(req.sender, req.last_executed);
    Ok(PbftReply { vote })
}

/// Handle a Prepare carrying the PrePrepare certificate.
pub async fn on_prepare(
    ctx: &ConsensusContext,
    req: PbftRequest,
) -> Result<PbftReply, ConsensusError> {
    debug!(txn_id = %req.txn.id, seq = req.txn.seq.0, kind = %req.kind, "Prepare received");
    on_certified(ctx, req, 1).await
}

/// Handle a Commit carrying the Prepare certificate.
///
/// The transaction is committed locally before the vote is returned.
pub async fn on_commit(
    ctx: &ConsensusContext,
    req: PbftRequest,
) -> Result<PbftReply, ConsensusError> {
    debug!(txn_id = %req.txn.id, seq = req.txn.seq.0, kind = %req.kind, "Commit received");
    on_certified(ctx, req, 2).await
}

async fn on_certified(
    ctx: &ConsensusContext,
    req: PbftRequest,
    index: usize,
) -> Result<PbftReply, ConsensusError> {
    check_header(ctx, &req)?;
    let phases = req.kind.phases();
    let cert = req
        .certificate()
        .ok_or_else(|| ValidationError::Malformed("phase request without certificate".into()))?;
    let cluster = ctx.local_cluster()?;
    let expected = Expected {
        cluster,
        phase: phases[index - 1],
        txn: &req.txn,
        outcome: req.kind.outcome(),
        need: ctx.majority(cluster),
    };
    let map = ctx.topology().shard_map();
    if let Err(err) = verify_certificate(&map, cert, expected) {
        warn!(txn_id = %req.txn.id, phase = %phases[index], error = %err, "Certificate rejected");
        if req.kind == RoundKind::Transaction {
            reject_certificate(ctx, &req.txn, &err);
        }
        return Err(err);
    }
    for vote in &cert.votes {
        ctx.store().append_message(cert.phase, vote)?;
    }

    match req.kind {
        RoundKind::Transaction => {
            let stored = admit(ctx, &req.txn, Admission::Certified).await?;
            if stored.status == TxnStatus::Failed {
                if index == 2 && stored.seq == req.txn.seq {
                    warn!(txn_id = %stored.id, seq = stored.seq.0, "Cluster committed a transaction failed here, skipping its slot");
                    ctx.sequencer().skip(stored.seq);
                }
                return Err(ValidationError::AlreadyFinal(stored.id, stored.status).into());
            }
            if index == 2 {
                commit_locally(ctx, &req.txn.id, req.kind)?;
            } else {
                advance(ctx.store().as_ref(), &req.txn.id, req.kind.statuses()[index])?;
            }
        }
        RoundKind::Outcome(_) => {
            require_same_slot(ctx, &req.txn)?;
            if index == 2 {
                commit_locally(ctx, &req.txn.id, req.kind)?;
            } else {
                advance_outcome(ctx.store().as_ref(), &req.txn.id, req.kind.statuses()[index])?;
            }
        }
    }

    let vote = ctx.sign_vote(phases[index], &req.txn, req.kind.outcome());
    ctx.store().append_message(phases[index], &vote)?;
    ctx.hint_catch_up(req.sender, req.last_executed);
    Ok(PbftReply { vote })
}

/// Outcome rounds run only on transactions this replica already sequenced
/// under the same number.
fn require_same_slot(ctx: &ConsensusContext, txn: &Transaction) -> Result<(), ConsensusError> {
    let stored = ctx
        .store()
        .txn(&txn.id)?
        .ok_or_else(|| ValidationError::UnknownTxn(txn.id.clone()))?;
    if stored.seq != txn.seq {
        return Err(ValidationError::SequenceMismatch {
            expected: stored.seq,
            got: txn.seq,
        }
        .into());
    }
    Ok(())
}

/// A certificate from the leader did not verify: fail the transaction here.
fn reject_certificate(ctx: &ConsensusContext, txn: &Transaction, err: &ConsensusError) {
    match ctx.store().txn(&txn.id) {
        Ok(Some(stored)) if stored.seq == txn.seq && stored.status.is_pending_consensus() => {
            if let Err(abandon_err) = ctx.executor().abandon(&txn.id, &err.to_string()) {
                warn!(txn_id = %txn.id, error = %abandon_err, "Could not mark transaction failed");
            }
            ctx.sequencer().skip(txn.seq);
        }
        Ok(_) => {}
        Err(store_err) => warn!(txn_id = %txn.id, error = %store_err, "Store unavailable"),
    }
}

/// Make the leader's transaction known locally under the leader's sequence
/// number, holding its locks.
///
/// A transaction already admitted under the same number is returned as is.
/// One stored under an older number is being retried: its stale votes are
/// dropped, its old slot skipped and it is reset before admission.
async fn admit(
    ctx: &ConsensusContext,
    txn: &Transaction,
    mode: Admission,
) -> Result<Transaction, ConsensusError> {
    let _gate = ctx.admission_gate(&txn.id).await;
    let store = ctx.store();

    match store.txn(&txn.id)? {
        Some(stored) if stored.status.is_terminal() => return Ok(stored),
        Some(stored) if stored.seq == txn.seq && stored.status != TxnStatus::Init => {
            return Ok(stored);
        }
        Some(stored) if stored.seq != txn.seq => {
            if !stored.status.is_pending_consensus() {
                return Err(ValidationError::AlreadyFinal(stored.id, stored.status).into());
            }
            debug!(txn_id = %txn.id, old_seq = stored.seq.0, seq = txn.seq.0, "Leader retried transaction");
            store.delete_messages(&txn.id)?;
            ctx.sequencer().skip(stored.seq);
            store.reset_for_retry(&txn.id, txn.seq, txn.view)?;
        }
        Some(_) => {}
        None => {
            let mut fresh = txn.clone();
            fresh.status = TxnStatus::Init;
            fresh.error = None;
            store.insert_txn(&fresh)?;
        }
    }
    ctx.observe_seq(txn.seq);

    match mode {
        Admission::Proposal => {
            let checked = async {
                lock_accounts(ctx, txn).await?;
                validate_balance(store.as_ref(), txn)
            }
            .await;
            if let Err(err) = checked {
                ctx.locks().release(&txn.id);
                debug!(txn_id = %txn.id, error = %err, "Proposal rejected");
                return Err(err);
            }
        }
        Admission::Certified => {
            if let Err(err) = ctx.locks().try_acquire(&txn.id, &txn.local_accounts()) {
                debug!(txn_id = %txn.id, error = %err, "Admitting certified transaction without its locks");
            }
        }
    }

    Ok(advance(store.as_ref(), &txn.id, TxnStatus::PrePrepared)?)
}

/// Handle a round-failure notice from the leader.
pub fn on_round_failed(ctx: &ConsensusContext, notice: RoundFailed) -> Result<(), ConsensusError> {
    debug!(txn_id = %notice.txn_id, seq = notice.seq.0, reason = %notice.reason, "Round failure notice received");
    let leader = ctx.leader();
    if leader != Some(notice.sender) {
        return Err(AuthError::WrongLeader {
            expected: leader,
            got: notice.sender,
        }
        .into());
    }
    let key = ctx
        .topology()
        .public_key(notice.sender)
        .ok_or(AuthError::UnknownSigner(notice.sender))?;
    if !notice.verify(&key) {
        return Err(AuthError::BadSignature(notice.sender).into());
    }

    match notice.kind {
        RoundKind::Transaction => {
            if let Some(stored) = ctx.store().txn(&notice.txn_id)? {
                if stored.seq == notice.seq && stored.status.is_pending_consensus() {
                    ctx.executor()
                        .abandon(&notice.txn_id, &format!("round failed: {}", notice.reason))?;
                }
            }
            ctx.observe_seq(notice.seq);
            ctx.sequencer().skip(notice.seq);
        }
        RoundKind::Outcome(outcome) => {
            warn!(txn_id = %notice.txn_id, %outcome, "Leader's outcome round failed");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestCluster;
    use byzshard_core::Store;
    use byzshard_test_helpers::{certificate, keypair_for, sequenced_txn, signed_vote};
    use byzshard_types::{AccountId, Phase, ReplicaId, TxnId};

    fn proposal(leader: u64, txn: &Transaction) -> PbftRequest {
        PbftRequest::proposal(
            ReplicaId(leader),
            txn.clone(),
            RoundKind::Transaction,
            SequenceNumber::NONE,
            signed_vote(leader, Phase::PrePrepare, txn, None),
        )
    }

    #[tokio::test]
    async fn test_pre_prepare_from_non_leader_is_refused() {
        let cluster = TestCluster::new();
        let txn = sequenced_txn("t1", 1, 2, 5, 1);
        let err = on_pre_prepare(&cluster.contexts[1], proposal(3, &txn))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AuthError::WrongLeader {
                expected: Some(ReplicaId(1)),
                got: ReplicaId(3)
            }
            .into()
        );
    }

    #[tokio::test]
    async fn test_tampered_amount_fails_digest_check() {
        let cluster = TestCluster::new();
        let mut txn = sequenced_txn("t1", 1, 2, 5, 1);
        let request = {
            let mut request = proposal(1, &txn);
            txn.amount = 50;
            request.txn = txn;
            request
        };
        let err = on_pre_prepare(&cluster.contexts[1], request)
            .await
            .unwrap_err();
        assert_eq!(err, ValidationError::DigestMismatch.into());
    }

    #[tokio::test]
    async fn test_pre_prepare_admits_locks_and_votes() {
        let cluster = TestCluster::new();
        let follower = &cluster.contexts[1];
        let txn = sequenced_txn("t1", 1, 2, 5, 4);

        let reply = on_pre_prepare(follower, proposal(1, &txn)).await.unwrap();

        assert_eq!(reply.vote.sender, ReplicaId(2));
        assert!(reply.vote.verify(&keypair_for(2).public_key()));
        let stored = cluster.stores[1].txn(&txn.id).unwrap().unwrap();
        assert_eq!(stored.status, TxnStatus::PrePrepared);
        assert!(follower.locks().is_held_by(&txn.id));
        assert_eq!(
            cluster.stores[1].messages(&txn.id, Phase::PrePrepare).unwrap().len(),
            2
        );
        // The leader's number advances the follower's allocator.
        assert_eq!(follower.allocate_seq(), SequenceNumber(5));
    }

    #[tokio::test]
    async fn test_overdraft_withholds_vote_without_failing() {
        let cluster = TestCluster::new();
        let follower = &cluster.contexts[1];
        let txn = sequenced_txn("t1", 1, 2, 500, 1);

        let err = on_pre_prepare(follower, proposal(1, &txn)).await.unwrap_err();
        assert!(matches!(
            err,
            ConsensusError::Validation(ValidationError::InsufficientBalance { .. })
        ));
        let stored = cluster.stores[1].txn(&txn.id).unwrap().unwrap();
        assert_eq!(stored.status, TxnStatus::Init);
        assert!(!follower.locks().is_held_by(&txn.id));
    }

    #[tokio::test]
    async fn test_commit_with_valid_certificate_admits_unseen_txn() {
        let cluster = TestCluster::new();
        let follower = &cluster.contexts[3];
        let txn = sequenced_txn("t1", 1, 2, 5, 1);
        let cert = certificate(1, &[1, 2, 3], Phase::Prepare, &txn, None);

        let reply = on_commit(follower, proposal(1, &txn).with_certificate(cert))
            .await
            .unwrap();

        assert_eq!(reply.vote.phase, Phase::Commit);
        cluster.wait_for_status_on(3, "t1", TxnStatus::Executed).await;
        assert_eq!(cluster.stores[3].balance(AccountId(1)).unwrap(), Some(95));
    }

    #[tokio::test]
    async fn test_short_certificate_fails_the_txn() {
        let cluster = TestCluster::new();
        let follower = &cluster.contexts[1];
        let txn = sequenced_txn("t1", 1, 2, 5, 1);
        on_pre_prepare(follower, proposal(1, &txn)).await.unwrap();

        let cert = certificate(1, &[1, 2], Phase::PrePrepare, &txn, None);
        let err = on_prepare(follower, proposal(1, &txn).with_certificate(cert))
            .await
            .unwrap_err();

        assert!(matches!(err, ConsensusError::Quorum { have: 2, need: 3, .. }));
        let stored = cluster.stores[1].txn(&txn.id).unwrap().unwrap();
        assert_eq!(stored.status, TxnStatus::Failed);
        assert!(!follower.locks().is_held_by(&txn.id));
        for _ in 0..200 {
            if follower.sequencer().last_executed() == SequenceNumber(1) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(follower.sequencer().last_executed(), SequenceNumber(1));
    }

    #[tokio::test]
    async fn test_round_failed_notice_releases_and_skips() {
        let cluster = TestCluster::new();
        let follower = &cluster.contexts[2];
        let txn = sequenced_txn("t1", 1, 2, 5, 1);
        on_pre_prepare(follower, proposal(1, &txn)).await.unwrap();

        let notice = RoundFailed::sign(
            &keypair_for(1),
            ReplicaId(1),
            &txn,
            RoundKind::Transaction,
            "quorum",
        );
        on_round_failed(follower, notice).unwrap();

        let stored = cluster.stores[2].txn(&TxnId::new("t1")).unwrap().unwrap();
        assert_eq!(stored.status, TxnStatus::Failed);
        assert!(stored.error.unwrap().contains("quorum"));
        assert!(!follower.locks().is_held_by(&txn.id));
        assert!(!follower.sequencer().has_gap());
    }

    #[tokio::test]
    async fn test_round_failed_from_follower_is_ignored() {
        let cluster = TestCluster::new();
        let txn = sequenced_txn("t1", 1, 2, 5, 1);
        let notice = RoundFailed::sign(
            &keypair_for(2),
            ReplicaId(2),
            &txn,
            RoundKind::Transaction,
            "forged",
        );
        assert!(matches!(
            on_round_failed(&cluster.contexts[2], notice),
            Err(ConsensusError::Authentication(AuthError::WrongLeader { .. }))
        ));
    }
}
