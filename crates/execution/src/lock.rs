//! Per-account mutual exclusion.
//!
//! One async mutex per account slot, where the slot of an account is
//! `account mod shard_size`. Guards are owned and parked in a per-transaction
//! table, so a lock taken in one task (the consensus round) can be released
//! in another (the sequencer, or the 2PC outcome path).
//!
//! Acquisition is reentrant per transaction: asking again for a slot the
//! transaction already holds is a no-op. Slots are always taken in ascending
//! slot order, which rules out local deadlock between two transfers that
//! touch the same pair of accounts in opposite directions.

use byzshard_core::ConsensusError;
use byzshard_types::{AccountId, TxnId};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, trace};

type Slot = Arc<AsyncMutex<()>>;

/// Account lock table.
pub struct LockManager {
    /// Current slot vector. Replaced wholesale on resize.
    slots: RwLock<Vec<Slot>>,
    /// Guards currently held, per transaction, keyed by slot index.
    held: Mutex<HashMap<TxnId, BTreeMap<usize, OwnedMutexGuard<()>>>>,
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("slots", &self.slots.read().len())
            .field("holders", &self.held.lock().len())
            .finish()
    }
}

fn new_slots(shard_size: u64) -> Vec<Slot> {
    (0..shard_size.max(1))
        .map(|_| Arc::new(AsyncMutex::new(())))
        .collect()
}

impl LockManager {
    /// Create a lock table with one slot per account of a shard.
    pub fn new(shard_size: u64) -> Self {
        Self {
            slots: RwLock::new(new_slots(shard_size)),
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve accounts to distinct slots, in ascending slot order.
    fn slots_for(&self, accounts: &[AccountId]) -> Vec<(usize, AccountId, Slot)> {
        let slots = self.slots.read();
        let len = slots.len() as u64;
        let mut resolved: BTreeMap<usize, (AccountId, Slot)> = BTreeMap::new();
        for &account in accounts {
            let index = (account.0 % len) as usize;
            resolved
                .entry(index)
                .or_insert_with(|| (account, slots[index].clone()));
        }
        resolved
            .into_iter()
            .map(|(index, (account, slot))| (index, account, slot))
            .collect()
    }

    fn holds(&self, txn: &TxnId, index: usize) -> bool {
        self.held
            .lock()
            .get(txn)
            .is_some_and(|guards| guards.contains_key(&index))
    }

    /// Acquire every account's lock, waiting for each in turn.
    pub async fn acquire(&self, txn: &TxnId, accounts: &[AccountId]) {
        for (index, account, slot) in self.slots_for(accounts) {
            if self.holds(txn, index) {
                continue;
            }
            let guard = slot.lock_owned().await;
            trace!(txn_id = %txn, account = %account, "Lock acquired");
            self.held
                .lock()
                .entry(txn.clone())
                .or_default()
                .insert(index, guard);
        }
    }

    /// Acquire every account's lock without waiting.
    ///
    /// Either every lock is taken or none of those attempted in this call
    /// are kept, and the first contended account is reported.
    pub fn try_acquire(&self, txn: &TxnId, accounts: &[AccountId]) -> Result<(), ConsensusError> {
        let mut taken = Vec::new();
        for (index, account, slot) in self.slots_for(accounts) {
            if self.holds(txn, index) {
                continue;
            }
            match slot.try_lock_owned() {
                Ok(guard) => taken.push((index, guard)),
                Err(_) => {
                    debug!(txn_id = %txn, account = %account, "Lock contended");
                    return Err(ConsensusError::LockContention(account));
                }
            }
        }
        if !taken.is_empty() {
            self.held
                .lock()
                .entry(txn.clone())
                .or_default()
                .extend(taken);
        }
        Ok(())
    }

    /// Release every lock held by a transaction.
    ///
    /// Returns whether anything was held. Releasing twice is harmless.
    pub fn release(&self, txn: &TxnId) -> bool {
        let guards = self.held.lock().remove(txn);
        match guards {
            Some(guards) => {
                trace!(txn_id = %txn, count = guards.len(), "Locks released");
                true
            }
            None => false,
        }
    }

    /// Whether a transaction currently holds any lock.
    pub fn is_held_by(&self, txn: &TxnId) -> bool {
        self.held.lock().contains_key(txn)
    }

    /// Number of transactions holding at least one lock.
    pub fn holder_count(&self) -> usize {
        self.held.lock().len()
    }

    /// Number of slots.
    pub fn slot_count(&self) -> usize {
        self.slots.read().len()
    }

    /// Rebuild the slot table for a new shard size.
    ///
    /// Guards already handed out keep their old slot alive until released;
    /// only new acquisitions use the new table.
    pub fn resize(&self, shard_size: u64) {
        *self.slots.write() = new_slots(shard_size);
        debug!(shard_size, "Lock table resized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn id(s: &str) -> TxnId {
        TxnId::new(s)
    }

    #[tokio::test]
    async fn test_acquire_is_reentrant_per_txn() {
        let locks = LockManager::new(100);
        locks.acquire(&id("t1"), &[AccountId(1), AccountId(2)]).await;
        locks.acquire(&id("t1"), &[AccountId(2)]).await;
        assert!(locks.try_acquire(&id("t1"), &[AccountId(1)]).is_ok());
        assert!(locks.release(&id("t1")));
        assert!(!locks.release(&id("t1")));
    }

    #[tokio::test]
    async fn test_try_acquire_fails_fast_and_keeps_nothing() {
        let locks = LockManager::new(100);
        locks.acquire(&id("t1"), &[AccountId(2)]).await;

        let err = locks
            .try_acquire(&id("t2"), &[AccountId(1), AccountId(2)])
            .unwrap_err();
        assert_eq!(err, ConsensusError::LockContention(AccountId(2)));
        assert!(!locks.is_held_by(&id("t2")));

        // Account 1 was taken and rolled back within the failed call.
        assert!(locks.try_acquire(&id("t3"), &[AccountId(1)]).is_ok());
    }

    #[tokio::test]
    async fn test_blocking_acquire_waits_for_release() {
        let locks = Arc::new(LockManager::new(100));
        locks.acquire(&id("t1"), &[AccountId(5)]).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks.acquire(&id("t2"), &[AccountId(5)]).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        locks.release(&id("t1"));
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(locks.is_held_by(&id("t2")));
    }

    #[tokio::test]
    async fn test_opposing_transfers_do_not_deadlock() {
        let locks = Arc::new(LockManager::new(100));
        let mut handles = Vec::new();
        for i in 0..20 {
            let locks = locks.clone();
            handles.push(tokio::spawn(async move {
                let txn = id(&format!("t{}", i));
                let accounts = if i % 2 == 0 {
                    [AccountId(7), AccountId(8)]
                } else {
                    [AccountId(8), AccountId(7)]
                };
                locks.acquire(&txn, &accounts).await;
                tokio::task::yield_now().await;
                locks.release(&txn);
            }));
        }
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .unwrap()
                .unwrap();
        }
        assert_eq!(locks.holder_count(), 0);
    }

    #[tokio::test]
    async fn test_resize_keeps_outstanding_guards() {
        let locks = LockManager::new(10);
        locks.acquire(&id("t1"), &[AccountId(3)]).await;
        locks.resize(20);
        assert_eq!(locks.slot_count(), 20);
        assert!(locks.is_held_by(&id("t1")));
        assert!(locks.release(&id("t1")));
    }
}
