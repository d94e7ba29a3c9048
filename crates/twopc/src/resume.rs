//! Re-driving decided outcomes whose round never reached quorum.

use crate::manager::TwoPc;
use byzshard_bft::{decide_outcome, recorded_outcome};
use byzshard_core::ConsensusError;
use byzshard_types::{Outcome, Transaction, TxnKind};
use tracing::{debug, info};

impl TwoPc {
    /// Run the outcome round of a provisional transaction again.
    ///
    /// Only a transaction whose outcome this replica already voted for is
    /// resumed, with that same outcome; one still waiting for its decision
    /// or whose step is running is left alone and `None` is returned. After
    /// the round commits, the coordinator side forwards the outcome to the
    /// participant and both sides notify their stragglers.
    pub async fn resume(&self, txn: &Transaction) -> Result<Option<Outcome>, ConsensusError> {
        if !txn.kind.is_cross_shard() || !txn.status.is_provisional() {
            return Ok(None);
        }
        let Some(outcome) = recorded_outcome(&self.ctx, txn)? else {
            return Ok(None);
        };
        let Some(_settling) = self.settling.enter(&txn.id) else {
            debug!(txn_id = %txn.id, "Outcome round still running");
            return Ok(None);
        };

        info!(txn_id = %txn.id, %outcome, status = %txn.status, "Resuming outcome round");
        let output = decide_outcome(&self.ctx, &txn.id, outcome).await?;
        if txn.kind == TxnKind::CrossShardSender {
            self.send_commit_request(txn, outcome, &output).await?;
        }
        self.notify_stragglers(txn, outcome, &output).await;
        Ok(Some(outcome))
    }
}
