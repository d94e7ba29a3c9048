//! Transfer transactions and their lifecycle.

use crate::{signing, AccountId, Hash, SequenceNumber, TxnId, ViewNumber};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// How a transaction relates to the cluster that stores it.
///
/// The classification is relative: the same transfer is `CrossShardSender`
/// in the sender's cluster and `CrossShardReceiver` in the receiver's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxnKind {
    /// Sender and receiver live in the same cluster.
    IntraShard,
    /// This cluster owns the sender and coordinates the 2PC round.
    CrossShardSender,
    /// This cluster owns the receiver and participates in the 2PC round.
    CrossShardReceiver,
}

impl TxnKind {
    /// Whether this transaction needs a two-phase commit.
    pub fn is_cross_shard(self) -> bool {
        !matches!(self, TxnKind::IntraShard)
    }

    /// Whether the sender's balance must be checked and debited locally.
    pub fn debits_sender(self) -> bool {
        matches!(self, TxnKind::IntraShard | TxnKind::CrossShardSender)
    }

    /// Whether the receiver's balance is credited locally.
    pub fn credits_receiver(self) -> bool {
        matches!(self, TxnKind::IntraShard | TxnKind::CrossShardReceiver)
    }
}

/// Outcome of a two-phase commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// Both sides keep their provisional effects.
    Commit,
    /// Both sides reverse their provisional effects.
    Abort,
}

impl Outcome {
    /// Stable one-byte tag used in signed payloads.
    pub fn tag(self) -> u8 {
        match self {
            Outcome::Commit => 1,
            Outcome::Abort => 2,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Commit => f.write_str("commit"),
            Outcome::Abort => f.write_str("abort"),
        }
    }
}

/// Transaction status state machine.
///
/// ```text
/// Init → PrePrepared → Prepared → Committed ─┬─→ Executed                 (intra-shard)
///                                            └─→ PreparedToExecute         (cross-shard)
///                                                  → TwoPcPrePrepared
///                                                  → TwoPcPrepared
///                                                  → TwoPcCommitted ─→ Executed | Aborted
/// any non-terminal ─→ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxnStatus {
    /// Accepted by the leader, not yet proposed.
    Init,
    /// Pre-prepare phase accepted.
    PrePrepared,
    /// Prepare certificate observed.
    Prepared,
    /// Committed by consensus, waiting for the sequencer.
    Committed,
    /// Cross-shard local side applied provisionally, awaiting the 2PC outcome.
    PreparedToExecute,
    /// Outcome round pre-prepared.
    TwoPcPrePrepared,
    /// Outcome round prepared.
    TwoPcPrepared,
    /// Outcome round committed, outcome not yet applied.
    TwoPcCommitted,
    /// Effects applied and final.
    Executed,
    /// Cross-shard transaction reversed.
    Aborted,
    /// Rejected before any effect was applied.
    Failed,
}

impl TxnStatus {
    fn rank(self) -> u8 {
        match self {
            TxnStatus::Init => 0,
            TxnStatus::PrePrepared => 1,
            TxnStatus::Prepared => 2,
            TxnStatus::Committed => 3,
            TxnStatus::PreparedToExecute => 4,
            TxnStatus::TwoPcPrePrepared => 5,
            TxnStatus::TwoPcPrepared => 6,
            TxnStatus::TwoPcCommitted => 7,
            TxnStatus::Executed | TxnStatus::Aborted | TxnStatus::Failed => 8,
        }
    }

    /// Executed, Aborted and Failed never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TxnStatus::Executed | TxnStatus::Aborted | TxnStatus::Failed
        )
    }

    /// Whether the local side of a cross-shard transaction has been applied
    /// but its outcome is still open. Rollback only acts in these states.
    pub fn is_provisional(self) -> bool {
        matches!(
            self,
            TxnStatus::PreparedToExecute
                | TxnStatus::TwoPcPrePrepared
                | TxnStatus::TwoPcPrepared
                | TxnStatus::TwoPcCommitted
        )
    }

    /// Whether the sequencer has applied this transaction's effects.
    pub fn is_applied(self) -> bool {
        self.is_provisional() || matches!(self, TxnStatus::Executed | TxnStatus::Aborted)
    }

    /// Not yet committed by the local cluster.
    pub fn is_pending_consensus(self) -> bool {
        matches!(
            self,
            TxnStatus::Init | TxnStatus::PrePrepared | TxnStatus::Prepared
        )
    }

    /// Validate a status transition.
    ///
    /// Transitions only move forward. Re-entering `Init` is not a transition;
    /// it happens through an explicit retry reset.
    pub fn can_transition_to(self, next: TxnStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            TxnStatus::Init => false,
            TxnStatus::Failed => true,
            TxnStatus::Executed => self.rank() >= TxnStatus::Committed.rank(),
            TxnStatus::Aborted => self.rank() >= TxnStatus::Committed.rank(),
            TxnStatus::PreparedToExecute => self == TxnStatus::Committed,
            TxnStatus::TwoPcPrePrepared | TxnStatus::TwoPcPrepared | TxnStatus::TwoPcCommitted => {
                self.is_provisional() && next.rank() > self.rank()
            }
            _ => next.rank() > self.rank(),
        }
    }
}

impl fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A balance transfer between two accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Client-generated id.
    pub id: TxnId,
    /// Account debited.
    pub sender: AccountId,
    /// Account credited.
    pub receiver: AccountId,
    /// Amount transferred.
    pub amount: u64,
    /// Classification relative to the storing cluster.
    pub kind: TxnKind,
    /// Consensus-assigned sequence number.
    pub seq: SequenceNumber,
    /// View of the leader that proposed it.
    pub view: ViewNumber,
    /// Digest of the economic fields.
    pub digest: Hash,
    /// Lifecycle status.
    pub status: TxnStatus,
    /// Cause of a terminal failure.
    pub error: Option<String>,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_at_ms: u64,
}

impl Transaction {
    /// Create a new client transaction in `Init` with its digest computed.
    pub fn new(id: impl Into<TxnId>, sender: AccountId, receiver: AccountId, amount: u64) -> Self {
        Self {
            id: id.into(),
            sender,
            receiver,
            amount,
            kind: TxnKind::IntraShard,
            seq: SequenceNumber::NONE,
            view: ViewNumber::INITIAL,
            digest: Self::digest_of(sender, receiver, amount),
            status: TxnStatus::Init,
            error: None,
            created_at_ms: unix_millis(),
        }
    }

    /// Digest over the economic fields only.
    pub fn digest_of(sender: AccountId, receiver: AccountId, amount: u64) -> Hash {
        Hash::from_parts(&[
            signing::DOMAIN_TXN_DIGEST,
            &sender.0.to_le_bytes(),
            &receiver.0.to_le_bytes(),
            &amount.to_le_bytes(),
        ])
    }

    /// Recompute the digest from this transaction's fields.
    pub fn compute_digest(&self) -> Hash {
        Self::digest_of(self.sender, self.receiver, self.amount)
    }

    /// Whether the carried digest matches the economic fields.
    pub fn digest_matches(&self) -> bool {
        self.digest == self.compute_digest()
    }

    /// Accounts this cluster must lock, sender first.
    pub fn local_accounts(&self) -> Vec<AccountId> {
        let mut accounts = Vec::with_capacity(2);
        if self.kind.debits_sender() {
            accounts.push(self.sender);
        }
        if self.kind.credits_receiver() && !accounts.contains(&self.receiver) {
            accounts.push(self.receiver);
        }
        accounts
    }

    /// Age of this transaction in milliseconds at `now_ms`.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn() -> Transaction {
        Transaction::new("t1", AccountId(1), AccountId(2), 5)
    }

    #[test]
    fn test_digest_is_pure_function_of_economic_fields() {
        let mut t = txn();
        let original = t.digest;

        t.status = TxnStatus::Committed;
        t.seq = SequenceNumber(42);
        t.view = ViewNumber(7);
        t.error = Some("x".into());
        t.kind = TxnKind::CrossShardSender;

        assert_eq!(t.compute_digest(), original);
        assert!(t.digest_matches());
    }

    #[test]
    fn test_digest_changes_with_amount() {
        let mut t = txn();
        t.amount = 6;
        assert!(!t.digest_matches());
    }

    #[test]
    fn test_forward_transitions() {
        use TxnStatus::*;
        assert!(Init.can_transition_to(PrePrepared));
        assert!(PrePrepared.can_transition_to(Prepared));
        assert!(Prepared.can_transition_to(Committed));
        assert!(Init.can_transition_to(Committed));
        assert!(Committed.can_transition_to(Executed));
        assert!(Committed.can_transition_to(PreparedToExecute));
        assert!(PreparedToExecute.can_transition_to(TwoPcPrePrepared));
        assert!(TwoPcPrepared.can_transition_to(TwoPcCommitted));
        assert!(TwoPcCommitted.can_transition_to(Aborted));
        assert!(PreparedToExecute.can_transition_to(Executed));
    }

    #[test]
    fn test_illegal_transitions() {
        use TxnStatus::*;
        assert!(!Prepared.can_transition_to(PrePrepared));
        assert!(!Executed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Init));
        assert!(!Prepared.can_transition_to(Executed));
        assert!(!Committed.can_transition_to(TwoPcPrePrepared));
        assert!(!Init.can_transition_to(PreparedToExecute));
        assert!(!PrePrepared.can_transition_to(Aborted));
        assert!(!Aborted.can_transition_to(Executed));
    }

    #[test]
    fn test_local_accounts_by_kind() {
        let mut t = txn();
        assert_eq!(t.local_accounts(), vec![AccountId(1), AccountId(2)]);

        t.kind = TxnKind::CrossShardSender;
        assert_eq!(t.local_accounts(), vec![AccountId(1)]);

        t.kind = TxnKind::CrossShardReceiver;
        assert_eq!(t.local_accounts(), vec![AccountId(2)]);

        let self_transfer = Transaction::new("t2", AccountId(3), AccountId(3), 1);
        assert_eq!(self_transfer.local_accounts(), vec![AccountId(3)]);
    }

    #[test]
    fn test_provisional_statuses() {
        assert!(TxnStatus::PreparedToExecute.is_provisional());
        assert!(TxnStatus::TwoPcCommitted.is_provisional());
        assert!(!TxnStatus::Committed.is_provisional());
        assert!(!TxnStatus::Executed.is_provisional());
        assert!(TxnStatus::Aborted.is_applied());
    }
}
