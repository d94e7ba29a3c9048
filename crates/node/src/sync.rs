//! Catch-up for replicas that fell behind.
//!
//! A follower learns from the leader's phase requests that it is behind and
//! that its sequencer is waiting on a missing number. It then asks the
//! leader for every applied transaction after its own last executed number,
//! hands the records to its sequencer and fills the remaining gap with skips.

use crate::replica::ServerState;
use byzshard_bft::{CatchUpHint, ConsensusContext};
use byzshard_core::{AuthError, ConsensusError, RpcError, ValidationError};
use byzshard_execution::Slot;
use byzshard_messages::{SyncRequest, SyncResponse};
use byzshard_types::{ReplicaId, TxnStatus};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Statuses a responder reports: every transaction whose local effect has
/// been applied.
pub const APPLIED_STATUSES: [TxnStatus; 6] = [
    TxnStatus::PreparedToExecute,
    TxnStatus::TwoPcPrePrepared,
    TxnStatus::TwoPcPrepared,
    TxnStatus::TwoPcCommitted,
    TxnStatus::Executed,
    TxnStatus::Aborted,
];

/// Answer a sync request from a member of the local cluster.
pub fn serve(ctx: &ConsensusContext, request: &SyncRequest) -> Result<SyncResponse, ConsensusError> {
    let cluster = ctx.local_cluster()?;
    if !ctx.topology().members(cluster).contains(&request.requester) {
        return Err(AuthError::ForeignSigner {
            signer: request.requester,
            cluster,
        }
        .into());
    }
    let key = ctx
        .topology()
        .public_key(request.requester)
        .ok_or(AuthError::UnknownSigner(request.requester))?;
    if !request.verify(&key) {
        return Err(AuthError::BadSignature(request.requester).into());
    }

    let last_executed = ctx.sequencer().last_executed();
    let txns: Vec<_> = ctx
        .store()
        .txns_after(request.last_executed, &APPLIED_STATUSES)?
        .into_iter()
        .filter(|txn| txn.seq <= last_executed)
        .collect();
    debug!(
        requester = %request.requester,
        after = request.last_executed.0,
        records = txns.len(),
        last_executed = last_executed.0,
        "Serving sync"
    );
    Ok(SyncResponse::sign(
        ctx.keypair(),
        ctx.local(),
        txns,
        last_executed,
    )?)
}

/// Fetch and apply everything `from` executed after this replica.
///
/// Returns how many records were handed to the sequencer.
pub async fn catch_up(ctx: &ConsensusContext, from: ReplicaId) -> Result<usize, ConsensusError> {
    let local_last = ctx.sequencer().last_executed();
    let request = SyncRequest::sign(ctx.keypair(), ctx.local(), local_last);
    let response = tokio::time::timeout(
        ctx.config().rpc_timeout,
        ctx.transport().sync(from, request),
    )
    .await
    .map_err(|_| RpcError::Timeout(from))??;

    if response.responder != from {
        return Err(AuthError::PayloadMismatch(response.responder).into());
    }
    let key = ctx
        .topology()
        .public_key(from)
        .ok_or(AuthError::UnknownSigner(from))?;
    if !response.verify(&key) {
        return Err(AuthError::BadSignature(from).into());
    }

    let mut submitted = 0;
    for record in response.txns {
        if record.seq <= local_last || record.seq > response.last_executed {
            continue;
        }
        if !record.digest_matches() {
            warn!(txn_id = %record.id, from = %from, "Sync record with bad digest ignored");
            continue;
        }
        reconcile(ctx, &record)?;
        ctx.observe_seq(record.seq);
        let seq = record.seq;
        if ctx.sequencer().submit(seq, Slot::Execute(record)) {
            submitted += 1;
        }
    }
    let filled = ctx.sequencer().fill_gaps_through(response.last_executed);
    info!(
        from = %from,
        submitted,
        filled,
        through = response.last_executed.0,
        "Caught up"
    );
    Ok(submitted)
}

/// Move a local copy that is still pending under an older number onto the
/// number the cluster executed it at.
fn reconcile(
    ctx: &ConsensusContext,
    record: &byzshard_types::Transaction,
) -> Result<(), ConsensusError> {
    let Some(local) = ctx.store().txn(&record.id)? else {
        return Ok(());
    };
    if local.digest != record.digest {
        return Err(ValidationError::DigestMismatch.into());
    }
    if local.seq != record.seq && local.status.is_pending_consensus() {
        ctx.sequencer().skip(local.seq);
        ctx.store().reset_for_retry(&record.id, record.seq, record.view)?;
        debug!(txn_id = %record.id, old_seq = local.seq.0, seq = record.seq.0, "Local copy renumbered");
    }
    Ok(())
}

/// Turn catch-up hints into sync requests until cancelled.
pub(crate) async fn run_catch_up(
    ctx: Arc<ConsensusContext>,
    state: Arc<ServerState>,
    mut hints: mpsc::UnboundedReceiver<CatchUpHint>,
    cancel: CancellationToken,
) {
    loop {
        let hint = tokio::select! {
            _ = cancel.cancelled() => break,
            hint = hints.recv() => match hint {
                Some(hint) => hint,
                None => break,
            },
        };
        if !state.is_alive()
            || ctx.sequencer().last_executed() >= hint.last_executed
            || !ctx.sequencer().has_gap()
        {
            continue;
        }
        if let Err(err) = catch_up(&ctx, hint.from).await {
            warn!(from = %hint.from, error = %err, "Catch-up failed");
        }
    }
    debug!("Catch-up worker stopped");
}
