//! Participant side: the cluster owning the receiver's account.
//!
//! The participant leader sequences its own receiver-side copy of the
//! transaction once the coordinator's commit certificate checks out. When
//! that copy is applied provisionally it reports ready and waits for the
//! decision; when it fails it reports Abort straight away.

use crate::evidence::{
    expect_kind, owner, require_local, store_evidence, verify_evidence, verify_message,
};
use crate::manager::TwoPc;
use crate::session::Resolution;
use byzshard_bft::{decide_outcome, propose, stored_certificate};
use byzshard_core::{ConsensusError, ValidationError};
use byzshard_messages::{TwoPcKind, TwoPcMessage};
use byzshard_types::{Outcome, Phase, RoundKind, Transaction, TxnKind};
use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

impl TwoPc {
    /// Handle the coordinator's prepare request.
    pub fn on_prepare_request(self: &Arc<Self>, message: TwoPcMessage) -> Result<(), ConsensusError> {
        debug!(txn_id = %message.txn.id, from = %message.sender, "2PC prepare request received");
        expect_kind(&message, TwoPcKind::PrepareRequest)?;
        let ctx = &self.ctx;
        require_local(ctx, message.txn.receiver)?;
        let coordinator = owner(ctx.topology().as_ref(), message.txn.sender)?;
        verify_message(ctx, &message, coordinator)?;
        let cert = message.certificate.as_ref().ok_or_else(|| {
            ValidationError::Malformed("prepare request without certificate".into())
        })?;
        verify_evidence(
            ctx,
            cert,
            coordinator,
            &message.txn,
            None,
            &[Phase::Commit, Phase::Prepare],
        )?;
        store_evidence(ctx, Phase::TwoPcPrepareFromCoordinator, cert)?;

        if !ctx.is_leader() {
            return Ok(());
        }
        let mut local = Transaction::new(
            message.txn.id.clone(),
            message.txn.sender,
            message.txn.receiver,
            message.txn.amount,
        );
        local.kind = TxnKind::CrossShardReceiver;
        local.created_at_ms = message.txn.created_at_ms;

        let ctx = ctx.clone();
        self.tasks.spawn(async move {
            let id = local.id.clone();
            match propose(&ctx, local).await {
                Ok(output) => debug!(txn_id = %id, seq = output.txn.seq.0, "Receiver side committed"),
                Err(ConsensusError::Validation(ValidationError::DuplicateTxn(_))) => {
                    debug!(txn_id = %id, "Prepare request repeated")
                }
                // The Failed execution event reports Abort.
                Err(err) => debug!(txn_id = %id, error = %err, "Receiver side not committed"),
            }
        });
        Ok(())
    }

    /// Report ready for a provisionally applied receiver-side transaction
    /// and replicate whatever the coordinator decides.
    ///
    /// No decision within the participant timeout aborts this side.
    pub async fn participate(&self, txn: Transaction) -> Result<Outcome, ConsensusError> {
        let ctx = &self.ctx;
        let coordinator = owner(ctx.topology().as_ref(), txn.sender)?;
        let proof = stored_certificate(ctx, &txn, RoundKind::Transaction)?;

        let session = self.sessions.open(&txn.id);
        let response = TwoPcMessage::sign(
            ctx.keypair(),
            TwoPcKind::PrepareResponse,
            ctx.local(),
            txn.clone(),
            Outcome::Commit,
            Some(proof),
        );
        info!(txn_id = %txn.id, %coordinator, "Reporting ready");
        let targets = ctx.topology().members(coordinator);
        self.deliver(&targets, &txn.id, "prepare_response", response, |transport, to, m| {
            async move { transport.two_pc_prepare_response(to, m).await }.boxed()
        })
        .await;

        let resolution = self
            .sessions
            .wait(session, self.config.participant_timeout)
            .await;
        if resolution == Resolution::TimedOut {
            warn!(txn_id = %txn.id, timeout = ?self.config.participant_timeout, "No decision from coordinator, aborting");
        }
        let outcome = resolution.outcome();
        let output = decide_outcome(ctx, &txn.id, outcome).await?;
        self.notify_stragglers(&txn, outcome, &output).await;
        Ok(outcome)
    }

    /// Report Abort for a receiver-side transaction that failed here.
    pub async fn respond_abort(&self, txn: &Transaction, reason: &str) -> Result<(), ConsensusError> {
        let ctx = &self.ctx;
        let coordinator = owner(ctx.topology().as_ref(), txn.sender)?;
        info!(txn_id = %txn.id, %coordinator, reason, "Reporting abort");
        let response = TwoPcMessage::sign(
            ctx.keypair(),
            TwoPcKind::PrepareResponse,
            ctx.local(),
            txn.clone(),
            Outcome::Abort,
            None,
        );
        let targets = ctx.topology().members(coordinator);
        self.deliver(&targets, &txn.id, "prepare_response", response, |transport, to, m| {
            async move { transport.two_pc_prepare_response(to, m).await }.boxed()
        })
        .await;
        Ok(())
    }

    /// Handle the coordinator's decided outcome.
    ///
    /// Every participant replica verifies and records it; the leader hands
    /// it to the session waiting in [`TwoPc::participate`], or keeps it if
    /// that session has not opened yet.
    pub fn on_commit_request(&self, message: TwoPcMessage) -> Result<(), ConsensusError> {
        debug!(txn_id = %message.txn.id, outcome = %message.outcome, from = %message.sender, "2PC commit request received");
        expect_kind(&message, TwoPcKind::CommitRequest)?;
        let ctx = &self.ctx;
        require_local(ctx, message.txn.receiver)?;
        let coordinator = owner(ctx.topology().as_ref(), message.txn.sender)?;
        verify_message(ctx, &message, coordinator)?;
        let cert = message.certificate.as_ref().ok_or_else(|| {
            ValidationError::Malformed("commit request without certificate".into())
        })?;
        verify_evidence(
            ctx,
            cert,
            coordinator,
            &message.txn,
            Some(message.outcome),
            &[Phase::TwoPcCommit, Phase::TwoPcPrepare],
        )?;
        store_evidence(ctx, Phase::TwoPcCommitFromCoordinator, cert)?;

        if !ctx.is_leader() || self.sessions.resolve(&message.txn.id, message.outcome) {
            return Ok(());
        }
        match ctx.store().txn(&message.txn.id)? {
            Some(local) if !local.status.is_terminal() => {
                debug!(txn_id = %local.id, status = %local.status, "Decision ahead of readiness, holding");
                self.sessions.hold(&local.id, message.outcome);
            }
            Some(local) => {
                debug!(txn_id = %local.id, status = %local.status, "Decision for settled transaction");
            }
            None => {
                debug!(txn_id = %message.txn.id, "Decision for unknown transaction");
            }
        }
        Ok(())
    }
}
