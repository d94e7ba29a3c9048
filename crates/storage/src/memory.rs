//! In-memory implementation of [`Store`].

use byzshard_core::{BalanceChange, Store, StoreError};
use byzshard_types::{
    AccountId, ConsensusMessage, Phase, ReplicaId, SequenceNumber, Transaction, TxnId, TxnStatus,
    ViewNumber,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

#[derive(Debug, Default)]
struct Tables {
    txns: HashMap<TxnId, Transaction>,
    /// Votes keyed by (txn, label), at most one per sender.
    messages: HashMap<(TxnId, Phase), BTreeMap<ReplicaId, ConsensusMessage>>,
    balances: BTreeMap<AccountId, u64>,
}

/// Store backed by hash maps under a single reader-writer lock.
///
/// Every trait method takes the lock once, so each call is atomic with
/// respect to every other call.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with account balances.
    pub fn with_accounts(accounts: impl IntoIterator<Item = (AccountId, u64)>) -> Self {
        let store = Self::new();
        store.tables.write().balances.extend(accounts);
        store
    }

    /// Set a balance, creating the account if needed.
    pub fn set_balance(&self, account: AccountId, balance: u64) {
        self.tables.write().balances.insert(account, balance);
    }

    /// Number of stored transactions.
    pub fn txn_count(&self) -> usize {
        self.tables.read().txns.len()
    }

    /// Sum of every balance.
    pub fn total_balance(&self) -> u128 {
        self.tables
            .read()
            .balances
            .values()
            .map(|b| u128::from(*b))
            .sum()
    }
}

fn sorted_by_seq(mut txns: Vec<Transaction>) -> Vec<Transaction> {
    txns.sort_by(|a, b| a.seq.cmp(&b.seq).then_with(|| a.id.cmp(&b.id)));
    txns
}

impl Store for MemoryStore {
    fn insert_txn(&self, txn: &Transaction) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if tables.txns.contains_key(&txn.id) {
            return Err(StoreError::Duplicate(txn.id.clone()));
        }
        tables.txns.insert(txn.id.clone(), txn.clone());
        Ok(())
    }

    fn upsert_txn(&self, txn: &Transaction) -> Result<(), StoreError> {
        self.tables.write().txns.insert(txn.id.clone(), txn.clone());
        Ok(())
    }

    fn txn(&self, id: &TxnId) -> Result<Option<Transaction>, StoreError> {
        Ok(self.tables.read().txns.get(id).cloned())
    }

    fn transition(
        &self,
        id: &TxnId,
        next: TxnStatus,
        error: Option<String>,
    ) -> Result<Transaction, StoreError> {
        let mut tables = self.tables.write();
        let txn = tables
            .txns
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if !txn.status.can_transition_to(next) {
            return Err(StoreError::IllegalTransition {
                id: id.clone(),
                from: txn.status,
                to: next,
            });
        }
        trace!(txn = %id, from = %txn.status, to = %next, "Status transition");
        txn.status = next;
        if error.is_some() {
            txn.error = error;
        }
        Ok(txn.clone())
    }

    fn reset_for_retry(
        &self,
        id: &TxnId,
        seq: SequenceNumber,
        view: ViewNumber,
    ) -> Result<Transaction, StoreError> {
        let mut tables = self.tables.write();
        let txn = tables
            .txns
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if txn.status.is_terminal() || !txn.status.is_pending_consensus() {
            return Err(StoreError::IllegalTransition {
                id: id.clone(),
                from: txn.status,
                to: TxnStatus::Init,
            });
        }
        txn.status = TxnStatus::Init;
        txn.seq = seq;
        txn.view = view;
        txn.error = None;
        Ok(txn.clone())
    }

    fn append_message(&self, label: Phase, message: &ConsensusMessage) -> Result<(), StoreError> {
        self.tables
            .write()
            .messages
            .entry((message.txn_id.clone(), label))
            .or_default()
            .insert(message.sender, message.clone());
        Ok(())
    }

    fn messages(&self, id: &TxnId, label: Phase) -> Result<Vec<ConsensusMessage>, StoreError> {
        Ok(self
            .tables
            .read()
            .messages
            .get(&(id.clone(), label))
            .map(|by_sender| by_sender.values().cloned().collect())
            .unwrap_or_default())
    }

    fn delete_messages(&self, id: &TxnId) -> Result<usize, StoreError> {
        let mut tables = self.tables.write();
        let mut removed = 0;
        tables.messages.retain(|(txn_id, _), by_sender| {
            if txn_id == id {
                removed += by_sender.len();
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    fn balance(&self, account: AccountId) -> Result<Option<u64>, StoreError> {
        Ok(self.tables.read().balances.get(&account).copied())
    }

    fn adjust_balance(
        &self,
        account: AccountId,
        change: BalanceChange,
    ) -> Result<u64, StoreError> {
        let mut tables = self.tables.write();
        let balance = tables
            .balances
            .get_mut(&account)
            .ok_or(StoreError::UnknownAccount(account))?;
        let next = match change {
            BalanceChange::Credit(amount) => balance
                .checked_add(amount)
                .ok_or(StoreError::Overflow(account))?,
            BalanceChange::Debit(amount) => {
                balance
                    .checked_sub(amount)
                    .ok_or(StoreError::InsufficientFunds {
                        account,
                        balance: *balance,
                        amount,
                    })?
            }
        };
        *balance = next;
        Ok(next)
    }

    fn txns_by_status(&self, statuses: &[TxnStatus]) -> Result<Vec<Transaction>, StoreError> {
        let txns = self
            .tables
            .read()
            .txns
            .values()
            .filter(|t| statuses.contains(&t.status))
            .cloned()
            .collect();
        Ok(sorted_by_seq(txns))
    }

    fn txns_after(
        &self,
        after: SequenceNumber,
        statuses: &[TxnStatus],
    ) -> Result<Vec<Transaction>, StoreError> {
        let txns = self
            .tables
            .read()
            .txns
            .values()
            .filter(|t| t.seq > after && statuses.contains(&t.status))
            .cloned()
            .collect();
        Ok(sorted_by_seq(txns))
    }
}
