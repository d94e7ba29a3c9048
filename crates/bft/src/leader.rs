//! Leader side of a PBFT round.
//!
//! ```text
//! propose ─→ lock ─→ assign seq/view ─→ persist Init ─→ validate balance
//!        ─→ PrePrepare ─→ Prepare ─→ Commit ─→ sequencer
//!
//! decide_outcome ─→ TwoPcPrePrepare ─→ TwoPcPrepare ─→ TwoPcCommit ─→ finalize
//! ```
//!
//! PrePrepare and Prepare stop waiting as soon as a quorum of valid votes is
//! in; Commit waits for every replica to answer or time out, then commits
//! locally. A PrePrepare or Prepare that cannot reach quorum fails the round.

use crate::context::ConsensusContext;
use crate::verify::verify_vote;
use crate::vote_set::VoteSet;
use byzshard_core::{fan_out, ConsensusError, Store, StoreError, ValidationError};
use byzshard_execution::Slot;
use byzshard_messages::{PbftReply, PbftRequest, RoundFailed};
use byzshard_types::{
    ConsensusMessage, Outcome, QuorumCertificate, RoundKind, Transaction, TxnId, TxnKind,
    TxnStatus,
};
use futures::FutureExt;
use tracing::{debug, info, warn};

/// Certificates produced by a successful round.
#[derive(Debug, Clone)]
pub struct RoundOutput {
    /// Transaction as stored after the round.
    pub txn: Transaction,
    /// Certificate of the prepare votes.
    pub prepare: QuorumCertificate,
    /// Certificate of the commit votes, if a quorum of them arrived.
    pub commit: Option<QuorumCertificate>,
}

impl RoundOutput {
    /// Strongest proof of the round: the commit certificate if formed,
    /// otherwise the prepare certificate.
    pub fn proof(&self) -> &QuorumCertificate {
        self.commit.as_ref().unwrap_or(&self.prepare)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    PrePrepare,
    Prepare,
    Commit,
}

impl Step {
    fn index(self) -> usize {
        match self {
            Step::PrePrepare => 0,
            Step::Prepare => 1,
            Step::Commit => 2,
        }
    }
}

/// Move a transaction forward if the state machine allows it.
///
/// Statuses already at or past `next` are left alone.
pub(crate) fn advance(
    store: &dyn Store,
    id: &TxnId,
    next: TxnStatus,
) -> Result<Transaction, ConsensusError> {
    let current = store.require_txn(id)?;
    if current.status == next || !current.status.can_transition_to(next) {
        return Ok(current);
    }
    Ok(store.transition(id, next, None)?)
}

/// Advance the status for an outcome round, only while the transaction is
/// provisionally applied.
pub(crate) fn advance_outcome(
    store: &dyn Store,
    id: &TxnId,
    next: TxnStatus,
) -> Result<Transaction, ConsensusError> {
    let current = store.require_txn(id)?;
    if current.status.is_provisional() {
        advance(store, id, next)
    } else {
        Ok(current)
    }
}

/// Check that the local side of `txn` can be paid for.
pub(crate) fn validate_balance(store: &dyn Store, txn: &Transaction) -> Result<(), ConsensusError> {
    if txn.kind.debits_sender() {
        let balance = store
            .balance(txn.sender)?
            .ok_or(StoreError::UnknownAccount(txn.sender))?;
        if balance < txn.amount {
            return Err(ValidationError::InsufficientBalance {
                account: txn.sender,
                balance,
                amount: txn.amount,
            }
            .into());
        }
    }
    if txn.kind.credits_receiver() && store.balance(txn.receiver)?.is_none() {
        return Err(StoreError::UnknownAccount(txn.receiver).into());
    }
    Ok(())
}

/// Take the transaction's account locks in the mode its kind requires.
///
/// Intra-shard transfers wait; cross-shard transfers fail fast so a cluster
/// never blocks on a lock held while another cluster is being waited on.
pub(crate) async fn lock_accounts(
    ctx: &ConsensusContext,
    txn: &Transaction,
) -> Result<(), ConsensusError> {
    let accounts = txn.local_accounts();
    if txn.kind == TxnKind::IntraShard {
        ctx.locks().acquire(&txn.id, &accounts).await;
        Ok(())
    } else {
        ctx.locks().try_acquire(&txn.id, &accounts)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Transaction rounds
// ═══════════════════════════════════════════════════════════════════════════

/// Sequence a new client transaction and drive it to commit.
///
/// Only the leader calls this. A duplicate id is rejected before anything is
/// persisted; any later failure marks the transaction failed, releases its
/// locks, skips its sequence slot and notifies the followers.
///
/// Locks are taken before the sequence number is assigned: a round waiting
/// on a lock holds no number.
pub async fn propose(
    ctx: &ConsensusContext,
    mut txn: Transaction,
) -> Result<RoundOutput, ConsensusError> {
    if ctx.store().txn(&txn.id)?.is_some() {
        return Err(ValidationError::DuplicateTxn(txn.id).into());
    }
    let locked = lock_accounts(ctx, &txn).await;

    txn.seq = ctx.allocate_seq();
    txn.view = ctx.view();
    txn.digest = txn.compute_digest();
    txn.status = TxnStatus::Init;
    txn.error = None;
    if let Err(err) = ctx.store().insert_txn(&txn) {
        let err = match err {
            StoreError::Duplicate(id) => ValidationError::DuplicateTxn(id).into(),
            other => {
                ctx.locks().release(&txn.id);
                ConsensusError::from(other)
            }
        };
        release_slot(ctx, &txn, RoundKind::Transaction, &err.to_string()).await;
        return Err(err);
    }
    info!(txn_id = %txn.id, seq = txn.seq.0, view = txn.view.0, kind = ?txn.kind, "Proposing");
    drive(ctx, txn, locked).await
}

/// Run a stalled transaction again under a fresh sequence number.
///
/// Its stale votes are discarded and its old slot is skipped. Locks it
/// already holds are kept.
pub async fn repropose(ctx: &ConsensusContext, id: &TxnId) -> Result<RoundOutput, ConsensusError> {
    let stale = ctx.store().require_txn(id)?;
    let locked = lock_accounts(ctx, &stale).await;
    let removed = ctx.store().delete_messages(id)?;
    ctx.sequencer().skip(stale.seq);
    let seq = ctx.allocate_seq();
    let txn = ctx.store().reset_for_retry(id, seq, ctx.view())?;
    info!(
        txn_id = %id,
        old_seq = stale.seq.0,
        seq = seq.0,
        removed_messages = removed,
        "Retrying stalled transaction"
    );
    drive(ctx, txn, locked).await
}

async fn drive(
    ctx: &ConsensusContext,
    txn: Transaction,
    locked: Result<(), ConsensusError>,
) -> Result<RoundOutput, ConsensusError> {
    let result: Result<RoundOutput, ConsensusError> = async {
        locked?;
        validate_balance(ctx.store().as_ref(), &txn)?;
        let mut output = run_round(ctx, &txn, RoundKind::Transaction).await?;
        output.txn = commit_locally(ctx, &txn.id, RoundKind::Transaction)?;
        Ok(output)
    }
    .await;

    if let Err(err) = &result {
        fail_round(ctx, &txn, RoundKind::Transaction, err).await;
    }
    result
}

// ═══════════════════════════════════════════════════════════════════════════
// Outcome rounds
// ═══════════════════════════════════════════════════════════════════════════

/// Replicate a 2PC outcome through the local cluster and apply it.
///
/// A failed outcome round leaves the transaction provisionally applied with
/// the leader's vote recorded; running it again with the same outcome is
/// safe on every replica.
pub async fn decide_outcome(
    ctx: &ConsensusContext,
    id: &TxnId,
    outcome: Outcome,
) -> Result<RoundOutput, ConsensusError> {
    let txn = ctx.store().require_txn(id)?;
    let kind = RoundKind::Outcome(outcome);
    info!(txn_id = %id, %outcome, "Replicating 2PC outcome");
    match run_round(ctx, &txn, kind).await {
        Ok(mut output) => {
            output.txn = commit_locally(ctx, id, kind)?;
            Ok(output)
        }
        Err(err) => {
            fail_round(ctx, &txn, kind, &err).await;
            Err(err)
        }
    }
}

/// Outcome this replica already voted for in an outcome round of `txn`.
///
/// The leader signs its own vote before broadcasting, so a decided outcome
/// is known here even when its round never reached quorum.
pub fn recorded_outcome(
    ctx: &ConsensusContext,
    txn: &Transaction,
) -> Result<Option<Outcome>, ConsensusError> {
    let local = ctx.local();
    for phase in RoundKind::Outcome(Outcome::Abort).phases() {
        let outcome = ctx
            .store()
            .messages(&txn.id, phase)?
            .into_iter()
            .filter(|vote| vote.sender == local && vote.seq == txn.seq)
            .find_map(|vote| vote.outcome);
        if outcome.is_some() {
            return Ok(outcome);
        }
    }
    Ok(None)
}

// ═══════════════════════════════════════════════════════════════════════════
// Round machinery
// ═══════════════════════════════════════════════════════════════════════════

/// Drive the three phases of one round for `txn`.
pub async fn run_round(
    ctx: &ConsensusContext,
    txn: &Transaction,
    kind: RoundKind,
) -> Result<RoundOutput, ConsensusError> {
    let cluster = ctx.local_cluster()?;
    let phases = kind.phases();
    let statuses = kind.statuses();
    let outcome = kind.outcome();

    let own = ctx.sign_vote(phases[0], txn, outcome);
    ctx.store().append_message(phases[0], &own)?;
    set_status(ctx, txn, kind, statuses[0])?;

    let proposal = PbftRequest::proposal(
        ctx.local(),
        txn.clone(),
        kind,
        ctx.sequencer().last_executed(),
        own.clone(),
    );
    let pre_prepared = collect(ctx, &proposal, txn, kind, Step::PrePrepare, own)
        .await?
        .into_quorum_certificate(ctx, cluster)?;
    debug!(txn_id = %txn.id, %kind, "Pre-prepare quorum reached");

    set_status(ctx, txn, kind, statuses[1])?;
    let own = ctx.sign_vote(phases[1], txn, outcome);
    ctx.store().append_message(phases[1], &own)?;
    let prepared = collect(
        ctx,
        &proposal.with_certificate(pre_prepared),
        txn,
        kind,
        Step::Prepare,
        own,
    )
    .await?
    .into_quorum_certificate(ctx, cluster)?;
    debug!(txn_id = %txn.id, %kind, "Prepare quorum reached");

    let own = ctx.sign_vote(phases[2], txn, outcome);
    ctx.store().append_message(phases[2], &own)?;
    let commit_votes = collect(
        ctx,
        &proposal.with_certificate(prepared.clone()),
        txn,
        kind,
        Step::Commit,
        own,
    )
    .await?;
    let committed = match commit_votes.into_quorum_certificate(ctx, cluster) {
        Ok(cert) => Some(cert),
        Err(err) => {
            warn!(txn_id = %txn.id, %kind, error = %err, "Committing on prepare certificate");
            None
        }
    };

    Ok(RoundOutput {
        txn: ctx.store().require_txn(&txn.id)?,
        prepare: prepared,
        commit: committed,
    })
}

impl VoteSet {
    fn into_quorum_certificate(
        self,
        ctx: &ConsensusContext,
        cluster: byzshard_types::ClusterId,
    ) -> Result<QuorumCertificate, ConsensusError> {
        if !self.has_quorum() {
            return Err(ConsensusError::Quorum {
                phase: self.phase(),
                have: self.len(),
                need: self.quorum_needed(),
            });
        }
        Ok(self.into_certificate(ctx.keypair(), ctx.local(), cluster))
    }
}

fn set_status(
    ctx: &ConsensusContext,
    txn: &Transaction,
    kind: RoundKind,
    next: TxnStatus,
) -> Result<(), ConsensusError> {
    match kind {
        RoundKind::Transaction => advance(ctx.store().as_ref(), &txn.id, next)?,
        RoundKind::Outcome(_) => advance_outcome(ctx.store().as_ref(), &txn.id, next)?,
    };
    Ok(())
}

/// Broadcast one phase and gather the followers' votes.
///
/// PrePrepare and Prepare return as soon as a quorum is in; Commit waits for
/// every replica.
async fn collect(
    ctx: &ConsensusContext,
    request: &PbftRequest,
    txn: &Transaction,
    kind: RoundKind,
    step: Step,
    own: ConsensusMessage,
) -> Result<VoteSet, ConsensusError> {
    let cluster = ctx.local_cluster()?;
    let phase = kind.phases()[step.index()];
    let mut votes = VoteSet::new(phase, txn, kind.outcome(), ctx.majority(cluster));
    votes.add(own)?;

    let peers = ctx.topology().local_peers();
    let transport = ctx.transport().clone();
    let mut replies = fan_out(&peers, ctx.config().rpc_timeout, |to| {
        let transport = transport.clone();
        let request = request.clone();
        async move {
            match step {
                Step::PrePrepare => transport.pre_prepare(to, request).await,
                Step::Prepare => transport.prepare(to, request).await,
                Step::Commit => transport.commit(to, request).await,
            }
        }
        .boxed()
    });

    let map = ctx.topology().shard_map();
    while let Some((from, reply)) = replies.next().await {
        match reply {
            Ok(PbftReply { vote }) => {
                if vote.sender != from {
                    warn!(txn_id = %txn.id, %phase, from = %from, signer = %vote.sender, "Vote signed by another replica");
                    continue;
                }
                let accepted = verify_vote(&map, cluster, &vote).and_then(|_| votes.add(vote.clone()));
                match accepted {
                    Ok(()) => ctx.store().append_message(phase, &vote)?,
                    Err(err) => warn!(txn_id = %txn.id, %phase, error = %err, "Rejected vote"),
                }
            }
            Err(err) => debug!(txn_id = %txn.id, %phase, from = %from, error = %err, "No vote"),
        }
        if step != Step::Commit && votes.has_quorum() {
            break;
        }
    }

    Ok(votes)
}

/// Rebuild the strongest certificate of a finished round from stored votes.
///
/// Used when the proof is needed after the round itself returned, such as
/// when the 2PC coordinator forwards its commit evidence.
pub fn stored_certificate(
    ctx: &ConsensusContext,
    txn: &Transaction,
    kind: RoundKind,
) -> Result<QuorumCertificate, ConsensusError> {
    let cluster = ctx.local_cluster()?;
    let need = ctx.majority(cluster);
    let phases = kind.phases();
    let mut shortfall = None;
    for phase in [phases[2], phases[1]] {
        let mut votes = VoteSet::new(phase, txn, kind.outcome(), need);
        for vote in ctx.store().messages(&txn.id, phase)? {
            if let Err(err) = votes.add(vote) {
                debug!(txn_id = %txn.id, %phase, error = %err, "Stored vote not usable");
            }
        }
        match votes.into_quorum_certificate(ctx, cluster) {
            Ok(cert) => return Ok(cert),
            Err(err) => shortfall = Some(err),
        }
    }
    Err(shortfall.unwrap_or(ConsensusError::Quorum {
        phase: phases[1],
        have: 0,
        need,
    }))
}

/// Apply the consequence of a committed round on this replica.
///
/// Shared by the leader and the followers.
pub fn commit_locally(
    ctx: &ConsensusContext,
    id: &TxnId,
    kind: RoundKind,
) -> Result<Transaction, ConsensusError> {
    match kind {
        RoundKind::Transaction => {
            let txn = advance(ctx.store().as_ref(), id, TxnStatus::Committed)?;
            if txn.status == TxnStatus::Committed {
                ctx.sequencer().submit(txn.seq, Slot::Execute(txn.clone()));
                debug!(txn_id = %id, seq = txn.seq.0, "Committed");
            }
            Ok(txn)
        }
        RoundKind::Outcome(outcome) => {
            advance_outcome(ctx.store().as_ref(), id, TxnStatus::TwoPcCommitted)?;
            match ctx.executor().finalize(id, outcome) {
                Ok(_) => {}
                Err(ConsensusError::Validation(ValidationError::AlreadyFinal(_, status))) => {
                    debug!(txn_id = %id, %status, "Outcome already applied");
                }
                Err(err) => return Err(err),
            }
            Ok(ctx.store().require_txn(id)?)
        }
    }
}

/// Clean up after a round that did not commit.
async fn fail_round(ctx: &ConsensusContext, txn: &Transaction, kind: RoundKind, err: &ConsensusError) {
    let reason = err.to_string();
    match kind {
        RoundKind::Transaction => {
            if let Err(abandon_err) = ctx.executor().abandon(&txn.id, &reason) {
                warn!(txn_id = %txn.id, error = %abandon_err, "Could not mark round failed");
            }
            release_slot(ctx, txn, kind, &reason).await;
        }
        RoundKind::Outcome(outcome) => {
            warn!(
                txn_id = %txn.id,
                %outcome,
                error = %reason,
                "Outcome round failed, transaction stays provisional until resumed"
            );
        }
    }
}

/// Skip the round's sequence slot here and on every follower.
async fn release_slot(ctx: &ConsensusContext, txn: &Transaction, kind: RoundKind, reason: &str) {
    ctx.sequencer().skip(txn.seq);
    let notice = RoundFailed::sign(ctx.keypair(), ctx.local(), txn, kind, reason);
    let transport = ctx.transport().clone();
    let replies = fan_out(&ctx.topology().local_peers(), ctx.config().rpc_timeout, |to| {
        let transport = transport.clone();
        let notice = notice.clone();
        async move { transport.round_failed(to, notice).await }.boxed()
    });
    let undelivered = replies
        .collect_all()
        .await
        .into_iter()
        .filter(|(_, r)| r.is_err())
        .count();
    if undelivered > 0 {
        debug!(txn_id = %txn.id, seq = txn.seq.0, undelivered, "Round failure notice not delivered everywhere");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestCluster;
    use byzshard_types::{AccountId, ReplicaId};
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn test_round_commits_and_executes_everywhere() {
        let cluster = TestCluster::new();
        let txn = Transaction::new("t1", AccountId(1), AccountId(2), 5);

        let output = propose(cluster.leader(), txn).await.unwrap();
        assert!(output.commit.is_some());
        assert!(output.prepare.votes.len() >= 3);

        cluster.wait_for_status("t1", TxnStatus::Executed).await;
        for store in &cluster.stores {
            assert_eq!(store.balance(AccountId(1)).unwrap(), Some(95));
            assert_eq!(store.balance(AccountId(2)).unwrap(), Some(105));
        }
        for ctx in &cluster.contexts {
            assert_eq!(ctx.locks().holder_count(), 0);
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_one_silent_replica_still_commits() {
        let cluster = TestCluster::new();
        cluster.take_down(4);

        propose(cluster.leader(), Transaction::new("t1", AccountId(1), AccountId(2), 5))
            .await
            .unwrap();

        let id = TxnId::new("t1");
        for store in &cluster.stores[..3] {
            for _ in 0..200 {
                if store.txn(&id).unwrap().unwrap().status == TxnStatus::Executed {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
            assert_eq!(store.balance(AccountId(1)).unwrap(), Some(95));
        }
        assert!(cluster.stores[3].txn(&id).unwrap().is_none());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_two_silent_replicas_fail_the_round() {
        let cluster = TestCluster::new();
        cluster.take_down(3);
        cluster.take_down(4);

        let err = propose(cluster.leader(), Transaction::new("t1", AccountId(1), AccountId(2), 5))
            .await
            .unwrap_err();
        assert!(matches!(err, ConsensusError::Quorum { have: 2, need: 3, .. }));

        let id = TxnId::new("t1");
        for store in &cluster.stores[..2] {
            let txn = store.txn(&id).unwrap().unwrap();
            assert_eq!(txn.status, TxnStatus::Failed);
            assert!(txn.error.is_some());
            assert_eq!(store.balance(AccountId(1)).unwrap(), Some(100));
        }
        for ctx in &cluster.contexts[..2] {
            assert_eq!(ctx.locks().holder_count(), 0);
            assert!(!ctx.sequencer().has_gap());
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_overdraft_is_rejected_before_broadcast() {
        let cluster = TestCluster::new();

        let err = propose(cluster.leader(), Transaction::new("t1", AccountId(1), AccountId(2), 500))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConsensusError::Validation(ValidationError::InsufficientBalance { balance: 100, .. })
        ));
        let stored = cluster.stores[0].txn(&TxnId::new("t1")).unwrap().unwrap();
        assert_eq!(stored.status, TxnStatus::Failed);
        assert!(cluster.stores[1].txn(&TxnId::new("t1")).unwrap().is_none());
        assert_eq!(cluster.leader().locks().holder_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected_without_a_slot() {
        let cluster = TestCluster::new();
        propose(cluster.leader(), Transaction::new("t1", AccountId(1), AccountId(2), 5))
            .await
            .unwrap();

        let err = propose(cluster.leader(), Transaction::new("t1", AccountId(3), AccountId(4), 5))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ConsensusError::Validation(ValidationError::DuplicateTxn(TxnId::new("t1")))
        );
        let stored = cluster.stores[0].txn(&TxnId::new("t1")).unwrap().unwrap();
        assert_eq!(stored.sender, AccountId(1));
        assert_eq!(stored.seq, byzshard_types::SequenceNumber(1));
    }

    #[tokio::test]
    async fn test_repropose_moves_to_a_fresh_sequence() {
        let cluster = TestCluster::new();
        let leader = cluster.leader();
        let mut stalled = Transaction::new("t1", AccountId(1), AccountId(2), 5);
        stalled.seq = leader.allocate_seq();
        stalled.status = TxnStatus::PrePrepared;
        cluster.stores[0].insert_txn(&stalled).unwrap();

        let output = repropose(leader, &TxnId::new("t1")).await.unwrap();
        assert!(output.txn.seq > stalled.seq);

        // Followers never saw the old slot, so only the leader can execute.
        let id = TxnId::new("t1");
        for _ in 0..200 {
            if cluster.stores[0].txn(&id).unwrap().unwrap().status == TxnStatus::Executed {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(cluster.stores[0].balance(AccountId(2)).unwrap(), Some(105));
        let follower = cluster.stores[2].txn(&id).unwrap().unwrap();
        assert_eq!(follower.status, TxnStatus::Committed);
        assert_eq!(follower.seq, output.txn.seq);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_outcome_round_can_run_again() {
        let cluster = TestCluster::new();
        let leader = cluster.leader();
        let mut txn = byzshard_test_helpers::sequenced_txn_of_kind(
            "x1",
            1,
            1500,
            5,
            leader.allocate_seq().0,
            TxnKind::CrossShardSender,
        );
        txn.status = TxnStatus::PreparedToExecute;
        for store in &cluster.stores {
            store.insert_txn(&txn).unwrap();
            store.set_balance(AccountId(1), 95);
        }
        let id = TxnId::new("x1");

        cluster.take_down(3);
        cluster.take_down(4);
        let err = decide_outcome(leader, &id, Outcome::Abort).await.unwrap_err();
        assert!(matches!(err, ConsensusError::Quorum { .. }));
        let stuck = cluster.stores[0].txn(&id).unwrap().unwrap();
        assert_eq!(stuck.status, TxnStatus::TwoPcPrePrepared);
        assert_eq!(recorded_outcome(leader, &stuck).unwrap(), Some(Outcome::Abort));
        assert_eq!(cluster.stores[0].balance(AccountId(1)).unwrap(), Some(95));

        cluster.bring_up(3);
        cluster.bring_up(4);
        let output = decide_outcome(leader, &id, Outcome::Abort).await.unwrap();
        assert_eq!(output.txn.status, TxnStatus::Aborted);
        cluster.wait_for_status("x1", TxnStatus::Aborted).await;
        for store in &cluster.stores {
            assert_eq!(store.balance(AccountId(1)).unwrap(), Some(100));
        }
    }

    #[tokio::test]
    async fn test_no_recorded_outcome_before_a_decision() {
        let cluster = TestCluster::new();
        let output = propose(cluster.leader(), Transaction::new("t1", AccountId(1), AccountId(2), 5))
            .await
            .unwrap();
        assert_eq!(recorded_outcome(cluster.leader(), &output.txn).unwrap(), None);
    }

    #[tokio::test]
    async fn test_stored_certificate_prefers_commit_votes() {
        let cluster = TestCluster::new();
        let output = propose(cluster.leader(), Transaction::new("t1", AccountId(1), AccountId(2), 5))
            .await
            .unwrap();

        let cert = stored_certificate(cluster.leader(), &output.txn, RoundKind::Transaction).unwrap();
        assert_eq!(cert.phase, byzshard_types::Phase::Commit);
        assert_eq!(cert.assembler, ReplicaId(1));
        assert!(cert.votes.len() >= 3);
    }
}
