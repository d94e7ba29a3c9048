//! Coordinator side: the cluster owning the sender's account.
//!
//! ```text
//! Provisional(sender side)
//!   → PrepareRequest(commit certificate) ─→ participant replicas
//!   ← PrepareResponse(Commit + certificate | Abort)   or decision timeout
//!   → outcome round in the local cluster
//!   → CommitRequest(outcome certificate) ─→ participant replicas
//!   → TwoPcDecision ─→ local stragglers
//! ```
//!
//! An outcome round that misses quorum stops the session before the commit
//! request; [`TwoPc::resume`] picks it up from the recorded decision.

use crate::evidence::{
    expect_kind, owner, require_local, store_evidence, verify_evidence, verify_message,
};
use crate::manager::TwoPc;
use crate::session::Resolution;
use byzshard_bft::{decide_outcome, stored_certificate, RoundOutput};
use byzshard_core::{ConsensusError, ValidationError};
use byzshard_messages::{TwoPcKind, TwoPcMessage};
use byzshard_types::{Outcome, Phase, RoundKind, Transaction};
use futures::FutureExt;
use tracing::{debug, info, warn};

impl TwoPc {
    /// Drive the decision for a provisionally applied sender-side transaction.
    ///
    /// Returns the outcome replicated in the local cluster.
    pub async fn coordinate(&self, txn: Transaction) -> Result<Outcome, ConsensusError> {
        let ctx = &self.ctx;
        let participant = owner(ctx.topology().as_ref(), txn.receiver)?;
        let proof = stored_certificate(ctx, &txn, RoundKind::Transaction)?;
        let targets = ctx.topology().members(participant);

        let session = self.sessions.open(&txn.id);
        let request = TwoPcMessage::sign(
            ctx.keypair(),
            TwoPcKind::PrepareRequest,
            ctx.local(),
            txn.clone(),
            Outcome::Commit,
            Some(proof),
        );
        info!(txn_id = %txn.id, %participant, "Sending 2PC prepare request");
        self.deliver(&targets, &txn.id, "prepare_request", request, |transport, to, m| {
            async move { transport.two_pc_prepare_request(to, m).await }.boxed()
        })
        .await;

        let resolution = self
            .sessions
            .wait(session, self.config.decision_timeout)
            .await;
        if resolution == Resolution::TimedOut {
            warn!(txn_id = %txn.id, timeout = ?self.config.decision_timeout, "No prepare response, aborting");
        }
        let outcome = resolution.outcome();
        info!(txn_id = %txn.id, %outcome, "2PC decision");

        // Nothing goes to the participant until the local cluster agrees.
        let output = decide_outcome(ctx, &txn.id, outcome).await?;
        self.send_commit_request(&txn, outcome, &output).await?;
        self.notify_stragglers(&txn, outcome, &output).await;
        Ok(outcome)
    }

    /// Forward a replicated outcome to the participant cluster.
    pub(crate) async fn send_commit_request(
        &self,
        txn: &Transaction,
        outcome: Outcome,
        output: &RoundOutput,
    ) -> Result<(), ConsensusError> {
        let ctx = &self.ctx;
        let participant = owner(ctx.topology().as_ref(), txn.receiver)?;
        let commit = TwoPcMessage::sign(
            ctx.keypair(),
            TwoPcKind::CommitRequest,
            ctx.local(),
            txn.clone(),
            outcome,
            Some(output.proof().clone()),
        );
        let targets = ctx.topology().members(participant);
        self.deliver(&targets, &txn.id, "commit_request", commit, |transport, to, m| {
            async move { transport.two_pc_commit_request(to, m).await }.boxed()
        })
        .await;
        Ok(())
    }

    /// Handle the participant leader's answer.
    ///
    /// Every coordinator replica verifies and records it; the leader hands
    /// the outcome to its waiting session.
    pub fn on_prepare_response(&self, message: TwoPcMessage) -> Result<(), ConsensusError> {
        debug!(txn_id = %message.txn.id, outcome = %message.outcome, from = %message.sender, "2PC prepare response received");
        expect_kind(&message, TwoPcKind::PrepareResponse)?;
        let ctx = &self.ctx;
        require_local(ctx, message.txn.sender)?;
        let participant = owner(ctx.topology().as_ref(), message.txn.receiver)?;
        verify_message(ctx, &message, participant)?;

        if message.outcome == Outcome::Commit {
            let cert = message.certificate.as_ref().ok_or_else(|| {
                ValidationError::Malformed("ready response without certificate".into())
            })?;
            verify_evidence(
                ctx,
                cert,
                participant,
                &message.txn,
                None,
                &[Phase::Commit, Phase::Prepare],
            )?;
            store_evidence(ctx, Phase::TwoPcPrepareFromParticipant, cert)?;
        }

        if ctx.is_leader() && !self.sessions.resolve(&message.txn.id, message.outcome) {
            debug!(txn_id = %message.txn.id, "Prepare response after the decision window");
        }
        Ok(())
    }
}
