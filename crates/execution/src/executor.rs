//! Balance effects of committed transactions.
//!
//! [`Executor::apply`] runs on the sequencer worker and performs the local
//! side of a transfer. Intra-shard transfers become final at once; each side
//! of a cross-shard transfer is applied provisionally and waits for
//! [`Executor::finalize`] to commit it or reverse it.
//!
//! Every effect runs under one executor-wide mutex and is gated on the stored
//! status, so a refund or reversal can never happen twice.

use crate::lock::LockManager;
use byzshard_core::{BalanceChange, ConsensusError, Store, ValidationError};
use byzshard_types::{Outcome, Transaction, TxnId, TxnKind, TxnStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Something the node must react to after an effect was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    /// Intra-shard transfer applied and final.
    Executed(Transaction),
    /// Local side of a cross-shard transfer applied, outcome still open.
    Provisional(Transaction),
    /// Cross-shard outcome applied.
    Finalized {
        txn: Transaction,
        outcome: Outcome,
    },
    /// Transaction failed with no effect left behind.
    Failed {
        txn: Transaction,
        reason: String,
    },
}

impl ExecutionEvent {
    /// The transaction as stored after the event.
    pub fn txn(&self) -> &Transaction {
        match self {
            ExecutionEvent::Executed(txn)
            | ExecutionEvent::Provisional(txn)
            | ExecutionEvent::Finalized { txn, .. }
            | ExecutionEvent::Failed { txn, .. } => txn,
        }
    }
}

/// Result of [`Executor::finalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalization {
    /// Outcome applied; the stored record is returned.
    Applied(Transaction),
    /// Local side not applied yet; the outcome will be applied right after.
    Parked,
}

/// Applies balance effects and owns lock release after execution.
pub struct Executor {
    store: Arc<dyn Store>,
    locks: Arc<LockManager>,
    /// Outcomes that arrived before the local side was applied.
    parked: Mutex<HashMap<TxnId, Outcome>>,
    /// Serializes every balance effect.
    effects: Mutex<()>,
    events: mpsc::UnboundedSender<ExecutionEvent>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("parked", &self.parked.lock().len())
            .finish()
    }
}

impl Executor {
    /// Create an executor and the receiving end of its event stream.
    pub fn new(
        store: Arc<dyn Store>,
        locks: Arc<LockManager>,
    ) -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                store,
                locks,
                parked: Mutex::new(HashMap::new()),
                effects: Mutex::new(()),
                events,
            },
            rx,
        )
    }

    /// Lock table whose guards this executor releases.
    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    fn emit(&self, event: ExecutionEvent) {
        if self.events.send(event).is_err() {
            debug!("Execution event dropped, no listener");
        }
    }

    /// Apply the local side of a sequenced transaction.
    ///
    /// `record` is the committed transaction, or a record obtained through
    /// catch-up whose status tells whether its outcome is already known.
    /// Failures are persisted on the record and never propagate.
    pub fn apply(&self, record: &Transaction) {
        let _effects = self.effects.lock();
        match self.try_apply(record) {
            Ok(Some(event)) => self.emit(event),
            Ok(None) => {}
            Err(err) => {
                let reason = err.to_string();
                warn!(txn_id = %record.id, seq = record.seq.0, error = %reason, "Execution failed");
                self.locks.release(&record.id);
                self.parked.lock().remove(&record.id);
                match self
                    .store
                    .transition(&record.id, TxnStatus::Failed, Some(reason.clone()))
                {
                    Ok(txn) => self.emit(ExecutionEvent::Failed { txn, reason }),
                    Err(store_err) => {
                        warn!(txn_id = %record.id, error = %store_err, "Could not record failure")
                    }
                }
            }
        }
    }

    fn try_apply(&self, record: &Transaction) -> Result<Option<ExecutionEvent>, ConsensusError> {
        let current = match self.store.txn(&record.id)? {
            Some(current) => current,
            None => {
                let mut fresh = record.clone();
                fresh.status = TxnStatus::Committed;
                fresh.error = None;
                self.store.insert_txn(&fresh)?;
                fresh
            }
        };

        if current.status.is_applied() {
            debug!(txn_id = %record.id, status = %current.status, "Already applied");
            return Ok(None);
        }
        if current.status == TxnStatus::Failed {
            debug!(txn_id = %record.id, "Skipping failed transaction");
            return Ok(None);
        }
        if current.status != TxnStatus::Committed {
            self.store
                .transition(&record.id, TxnStatus::Committed, None)?;
        }

        match current.kind {
            TxnKind::IntraShard => {
                self.store
                    .adjust_balance(current.sender, BalanceChange::Debit(current.amount))?;
                if let Err(err) = self
                    .store
                    .adjust_balance(current.receiver, BalanceChange::Credit(current.amount))
                {
                    self.store
                        .adjust_balance(current.sender, BalanceChange::Credit(current.amount))?;
                    return Err(err.into());
                }
                let txn = self
                    .store
                    .transition(&current.id, TxnStatus::Executed, None)?;
                self.locks.release(&current.id);
                info!(txn_id = %txn.id, seq = txn.seq.0, "Executed");
                Ok(Some(ExecutionEvent::Executed(txn)))
            }
            TxnKind::CrossShardSender | TxnKind::CrossShardReceiver => {
                let change = if current.kind.debits_sender() {
                    (current.sender, BalanceChange::Debit(current.amount))
                } else {
                    (current.receiver, BalanceChange::Credit(current.amount))
                };
                self.store.adjust_balance(change.0, change.1)?;
                let txn = self
                    .store
                    .transition(&current.id, TxnStatus::PreparedToExecute, None)?;
                debug!(txn_id = %txn.id, seq = txn.seq.0, kind = ?txn.kind, "Applied provisionally");

                let known = match record.status {
                    TxnStatus::Executed => Some(Outcome::Commit),
                    TxnStatus::Aborted => Some(Outcome::Abort),
                    _ => None,
                };
                let parked = self.parked.lock().remove(&txn.id);
                match known.or(parked) {
                    Some(outcome) => {
                        let txn = self.settle(txn, outcome)?;
                        Ok(Some(ExecutionEvent::Finalized { txn, outcome }))
                    }
                    None => Ok(Some(ExecutionEvent::Provisional(txn))),
                }
            }
        }
    }

    /// Apply the 2PC outcome of a cross-shard transaction.
    ///
    /// Only a provisionally applied transaction is committed or reversed;
    /// one that is not applied yet has its outcome parked.
    pub fn finalize(&self, id: &TxnId, outcome: Outcome) -> Result<Finalization, ConsensusError> {
        let _effects = self.effects.lock();
        let current = match self.store.txn(id)? {
            Some(current) => current,
            None => {
                self.park(id, outcome);
                return Ok(Finalization::Parked);
            }
        };
        if current.status.is_terminal() {
            return Err(ValidationError::AlreadyFinal(id.clone(), current.status).into());
        }
        if !current.status.is_provisional() {
            self.park(id, outcome);
            return Ok(Finalization::Parked);
        }
        let txn = self.settle(current, outcome)?;
        self.emit(ExecutionEvent::Finalized {
            txn: txn.clone(),
            outcome,
        });
        Ok(Finalization::Applied(txn))
    }

    fn park(&self, id: &TxnId, outcome: Outcome) {
        debug!(txn_id = %id, %outcome, "Outcome parked until execution");
        self.parked.lock().insert(id.clone(), outcome);
    }

    /// Commit or reverse a provisional transaction and release its locks.
    fn settle(&self, txn: Transaction, outcome: Outcome) -> Result<Transaction, ConsensusError> {
        let status = match outcome {
            Outcome::Commit => TxnStatus::Executed,
            Outcome::Abort => {
                if txn.kind.debits_sender() {
                    self.store
                        .adjust_balance(txn.sender, BalanceChange::Credit(txn.amount))?;
                }
                if txn.kind.credits_receiver() {
                    self.store
                        .adjust_balance(txn.receiver, BalanceChange::Debit(txn.amount))?;
                }
                TxnStatus::Aborted
            }
        };
        let txn = self.store.transition(&txn.id, status, None)?;
        self.locks.release(&txn.id);
        info!(txn_id = %txn.id, %outcome, kind = ?txn.kind, "Cross-shard outcome applied");
        Ok(txn)
    }

    /// Mark a transaction failed and release its locks.
    ///
    /// Used when a round is abandoned before the sequencer ran it. Returns
    /// false if the transaction was already terminal or had been applied.
    pub fn abandon(&self, id: &TxnId, reason: &str) -> Result<bool, ConsensusError> {
        let _effects = self.effects.lock();
        self.locks.release(id);
        let current = self.store.require_txn(id)?;
        if current.status.is_terminal() || current.status.is_applied() {
            return Ok(false);
        }
        let txn = self
            .store
            .transition(id, TxnStatus::Failed, Some(reason.to_string()))?;
        warn!(txn_id = %id, seq = txn.seq.0, reason, "Transaction failed");
        self.emit(ExecutionEvent::Failed {
            txn,
            reason: reason.to_string(),
        });
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byzshard_storage::MemoryStore;
    use byzshard_test_helpers::{sequenced_txn, sequenced_txn_of_kind};
    use byzshard_types::AccountId;

    fn setup() -> (
        Arc<MemoryStore>,
        Executor,
        mpsc::UnboundedReceiver<ExecutionEvent>,
    ) {
        let store = Arc::new(MemoryStore::with_accounts([
            (AccountId(1), 100),
            (AccountId(2), 100),
            (AccountId(1500), 100),
        ]));
        let (executor, events) = Executor::new(store.clone(), Arc::new(LockManager::new(1000)));
        (store, executor, events)
    }

    fn committed(store: &MemoryStore, mut txn: Transaction) -> Transaction {
        txn.status = TxnStatus::Committed;
        store.insert_txn(&txn).unwrap();
        txn
    }

    #[tokio::test]
    async fn test_intra_shard_executes_and_releases() {
        let (store, executor, mut events) = setup();
        let txn = committed(&store, sequenced_txn("t1", 1, 2, 5, 1));
        executor.locks().acquire(&txn.id, &txn.local_accounts()).await;

        executor.apply(&txn);

        assert_eq!(store.balance(AccountId(1)).unwrap(), Some(95));
        assert_eq!(store.balance(AccountId(2)).unwrap(), Some(105));
        assert!(!executor.locks().is_held_by(&txn.id));
        assert!(matches!(events.try_recv(), Ok(ExecutionEvent::Executed(_))));

        // Applying again is a no-op.
        executor.apply(&txn);
        assert_eq!(store.balance(AccountId(1)).unwrap(), Some(95));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_overdraft_fails_with_cause() {
        let (store, executor, mut events) = setup();
        let txn = committed(&store, sequenced_txn("t1", 1, 2, 500, 1));

        executor.apply(&txn);

        let stored = store.txn(&txn.id).unwrap().unwrap();
        assert_eq!(stored.status, TxnStatus::Failed);
        assert!(stored.error.unwrap().contains("insufficient"));
        assert_eq!(store.balance(AccountId(1)).unwrap(), Some(100));
        assert!(matches!(
            events.try_recv(),
            Ok(ExecutionEvent::Failed { .. })
        ));
    }

    #[test]
    fn test_abort_refunds_sender_exactly_once() {
        let (store, executor, _events) = setup();
        let txn = committed(
            &store,
            sequenced_txn_of_kind("x1", 1, 1500, 30, 1, TxnKind::CrossShardSender),
        );

        executor.apply(&txn);
        assert_eq!(store.balance(AccountId(1)).unwrap(), Some(70));

        let applied = executor.finalize(&txn.id, Outcome::Abort).unwrap();
        assert!(matches!(applied, Finalization::Applied(ref t) if t.status == TxnStatus::Aborted));
        assert_eq!(store.balance(AccountId(1)).unwrap(), Some(100));

        let again = executor.finalize(&txn.id, Outcome::Abort).unwrap_err();
        assert!(matches!(
            again,
            ConsensusError::Validation(ValidationError::AlreadyFinal(_, TxnStatus::Aborted))
        ));
        assert_eq!(store.balance(AccountId(1)).unwrap(), Some(100));
    }

    #[test]
    fn test_abort_reverses_receiver_credit() {
        let (store, executor, _events) = setup();
        let txn = committed(
            &store,
            sequenced_txn_of_kind("x1", 1, 1500, 30, 1, TxnKind::CrossShardReceiver),
        );

        executor.apply(&txn);
        assert_eq!(store.balance(AccountId(1500)).unwrap(), Some(130));
        // The sender lives in another shard and is never touched here.
        assert_eq!(store.balance(AccountId(1)).unwrap(), Some(100));

        executor.finalize(&txn.id, Outcome::Abort).unwrap();
        assert_eq!(store.balance(AccountId(1500)).unwrap(), Some(100));
    }

    #[test]
    fn test_outcome_before_execution_is_parked() {
        let (store, executor, mut events) = setup();
        let txn = committed(
            &store,
            sequenced_txn_of_kind("x1", 1, 1500, 30, 1, TxnKind::CrossShardSender),
        );

        assert_eq!(
            executor.finalize(&txn.id, Outcome::Commit).unwrap(),
            Finalization::Parked
        );
        executor.apply(&txn);

        let stored = store.txn(&txn.id).unwrap().unwrap();
        assert_eq!(stored.status, TxnStatus::Executed);
        assert_eq!(store.balance(AccountId(1)).unwrap(), Some(70));
        assert!(matches!(
            events.try_recv(),
            Ok(ExecutionEvent::Finalized {
                outcome: Outcome::Commit,
                ..
            })
        ));
    }

    #[test]
    fn test_catch_up_record_applies_known_outcome() {
        let (store, executor, _events) = setup();
        let mut record = sequenced_txn_of_kind("x1", 1, 1500, 30, 1, TxnKind::CrossShardSender);
        record.status = TxnStatus::Aborted;

        executor.apply(&record);

        let stored = store.txn(&record.id).unwrap().unwrap();
        assert_eq!(stored.status, TxnStatus::Aborted);
        assert_eq!(store.balance(AccountId(1)).unwrap(), Some(100));
    }

    #[tokio::test]
    async fn test_abandon_releases_and_fails() {
        let (store, executor, _events) = setup();
        let mut txn = sequenced_txn("t1", 1, 2, 5, 1);
        txn.status = TxnStatus::Prepared;
        store.insert_txn(&txn).unwrap();
        executor.locks().acquire(&txn.id, &txn.local_accounts()).await;

        assert!(executor.abandon(&txn.id, "quorum not reached").unwrap());
        assert!(!executor.locks().is_held_by(&txn.id));
        assert!(!executor.abandon(&txn.id, "again").unwrap());
    }
}
