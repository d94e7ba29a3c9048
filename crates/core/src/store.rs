//! Persistence interface.
//!
//! The relational store is external; replicas only rely on this contract.
//! Every method is a single atomic operation. Callers serialize multi-step
//! updates to one transaction through the account lock or the sequencer's
//! single-writer discipline.

use byzshard_types::{
    AccountId, ConsensusMessage, Phase, SequenceNumber, Transaction, TxnId, TxnStatus,
    ViewNumber,
};
use thiserror::Error;

/// Errors returned by a [`Store`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("transaction {0} not found")]
    NotFound(TxnId),

    #[error("transaction {0} already exists")]
    Duplicate(TxnId),

    #[error("{0} does not exist")]
    UnknownAccount(AccountId),

    #[error("insufficient funds in {account}: have {balance}, need {amount}")]
    InsufficientFunds {
        account: AccountId,
        balance: u64,
        amount: u64,
    },

    #[error("balance of {0} would overflow")]
    Overflow(AccountId),

    #[error("transaction {id}: illegal status transition {from} -> {to}")]
    IllegalTransition {
        id: TxnId,
        from: TxnStatus,
        to: TxnStatus,
    },

    #[error("backend failure: {0}")]
    Backend(String),
}

/// A single read-modify-write on one balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceChange {
    /// Add to the balance.
    Credit(u64),
    /// Subtract from the balance; fails rather than going negative.
    Debit(u64),
}

/// Transactional record store for transactions, votes and balances.
pub trait Store: Send + Sync {
    /// Insert a new transaction; fails with `Duplicate` if the id exists.
    fn insert_txn(&self, txn: &Transaction) -> Result<(), StoreError>;

    /// Insert or overwrite a transaction.
    fn upsert_txn(&self, txn: &Transaction) -> Result<(), StoreError>;

    /// Fetch a transaction by id.
    fn txn(&self, id: &TxnId) -> Result<Option<Transaction>, StoreError>;

    /// Move a transaction to `next`, validating the transition atomically.
    ///
    /// `error` replaces the stored cause when given. Returns the updated record.
    fn transition(
        &self,
        id: &TxnId,
        next: TxnStatus,
        error: Option<String>,
    ) -> Result<Transaction, StoreError>;

    /// Reset a non-terminal transaction to `Init` under a new sequence number
    /// and view. Returns the updated record.
    fn reset_for_retry(
        &self,
        id: &TxnId,
        seq: SequenceNumber,
        view: ViewNumber,
    ) -> Result<Transaction, StoreError>;

    /// Append one vote under `(txn_id, label)`. A second vote from the same
    /// sender under the same label replaces the first.
    fn append_message(&self, label: Phase, message: &ConsensusMessage) -> Result<(), StoreError>;

    /// All votes stored under `(txn_id, label)`.
    fn messages(&self, id: &TxnId, label: Phase) -> Result<Vec<ConsensusMessage>, StoreError>;

    /// Delete every vote of a transaction. Returns how many were removed.
    fn delete_messages(&self, id: &TxnId) -> Result<usize, StoreError>;

    /// Current balance of an account.
    fn balance(&self, account: AccountId) -> Result<Option<u64>, StoreError>;

    /// Atomically apply a change to one balance. Returns the new balance.
    fn adjust_balance(&self, account: AccountId, change: BalanceChange)
        -> Result<u64, StoreError>;

    /// Transactions whose status is one of `statuses`, ordered by sequence.
    fn txns_by_status(&self, statuses: &[TxnStatus]) -> Result<Vec<Transaction>, StoreError>;

    /// Transactions with `seq > after` whose status is one of `statuses`,
    /// ordered by sequence.
    fn txns_after(
        &self,
        after: SequenceNumber,
        statuses: &[TxnStatus],
    ) -> Result<Vec<Transaction>, StoreError>;

    /// Fetch a transaction that must exist.
    fn require_txn(&self, id: &TxnId) -> Result<Transaction, StoreError> {
        self.txn(id)?.ok_or_else(|| StoreError::NotFound(id.clone()))
    }
}
