//! Strict in-order execution of committed transactions.
//!
//! Consensus rounds finish in any order; the sequencer holds each committed
//! transaction in a pending map keyed by its sequence number and a single
//! worker applies them one by one starting at the next expected number.
//! Abandoned numbers are filled with [`Slot::Skip`] so the order stays
//! gapless.

use crate::config::SequencerConfig;
use crate::executor::Executor;
use byzshard_types::{SequenceNumber, Transaction};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Content of one sequence slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    /// Apply this transaction.
    Execute(Transaction),
    /// Nothing to apply; advance past this number.
    Skip,
}

#[derive(Debug)]
struct SequencerState {
    pending: BTreeMap<SequenceNumber, Slot>,
    next_expected: SequenceNumber,
}

/// Pending map plus wake-up signal.
#[derive(Debug)]
pub struct Sequencer {
    state: Mutex<SequencerState>,
    signal: mpsc::Sender<()>,
}

impl Sequencer {
    /// Create a sequencer and the worker that drains it.
    pub fn new(config: &SequencerConfig) -> (Arc<Self>, SequencerWorker) {
        let (signal, rx) = mpsc::channel(config.signal_capacity.max(1));
        let sequencer = Arc::new(Self {
            state: Mutex::new(SequencerState {
                pending: BTreeMap::new(),
                next_expected: SequenceNumber::FIRST,
            }),
            signal,
        });
        let worker = SequencerWorker {
            sequencer: sequencer.clone(),
            signal: rx,
        };
        (sequencer, worker)
    }

    /// Place a slot. Returns false if the number was already applied or
    /// already holds a slot.
    pub fn submit(&self, seq: SequenceNumber, slot: Slot) -> bool {
        if seq == SequenceNumber::NONE {
            return false;
        }
        {
            let mut state = self.state.lock();
            if seq < state.next_expected || state.pending.contains_key(&seq) {
                trace!(seq = seq.0, "Sequencer slot already filled");
                return false;
            }
            state.pending.insert(seq, slot);
        }
        self.wake();
        true
    }

    /// Mark a number as abandoned.
    pub fn skip(&self, seq: SequenceNumber) -> bool {
        self.submit(seq, Slot::Skip)
    }

    /// Fill every empty number up to and including `through` with skips.
    pub fn fill_gaps_through(&self, through: SequenceNumber) -> usize {
        let filled = {
            let mut state = self.state.lock();
            let mut filled = 0;
            let mut seq = state.next_expected;
            while seq <= through {
                if let std::collections::btree_map::Entry::Vacant(entry) = state.pending.entry(seq)
                {
                    entry.insert(Slot::Skip);
                    filled += 1;
                }
                seq = seq.next();
            }
            filled
        };
        if filled > 0 {
            debug!(through = through.0, filled, "Filled sequence gaps");
            self.wake();
        }
        filled
    }

    /// Whether something is pending behind a missing number.
    pub fn has_gap(&self) -> bool {
        let state = self.state.lock();
        !state.pending.is_empty() && !state.pending.contains_key(&state.next_expected)
    }

    /// Next number the worker will apply.
    pub fn next_expected(&self) -> SequenceNumber {
        self.state.lock().next_expected
    }

    /// Highest number already applied or skipped.
    pub fn last_executed(&self) -> SequenceNumber {
        self.next_expected().prev()
    }

    /// Number of slots waiting.
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Take the slot at the next expected number, advancing the counter.
    fn pop_next(&self) -> Option<(SequenceNumber, Slot)> {
        let mut state = self.state.lock();
        let seq = state.next_expected;
        let slot = state.pending.remove(&seq)?;
        state.next_expected = seq.next();
        Some((seq, slot))
    }

    fn wake(&self) {
        // A full queue already holds a wake-up for the worker.
        let _ = self.signal.try_send(());
    }
}

/// The single background consumer of a [`Sequencer`].
#[derive(Debug)]
pub struct SequencerWorker {
    sequencer: Arc<Sequencer>,
    signal: mpsc::Receiver<()>,
}

impl SequencerWorker {
    /// Apply slots in order until cancelled.
    pub async fn run(mut self, executor: Arc<Executor>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                signal = self.signal.recv() => {
                    if signal.is_none() {
                        break;
                    }
                }
            }
            self.drain(&executor);
        }
        info!(
            last_executed = self.sequencer.last_executed().0,
            "Sequencer stopped"
        );
    }

    fn drain(&self, executor: &Executor) {
        while let Some((seq, slot)) = self.sequencer.pop_next() {
            match slot {
                Slot::Execute(txn) => {
                    trace!(seq = seq.0, txn_id = %txn.id, "Executing");
                    executor.apply(&txn);
                }
                Slot::Skip => trace!(seq = seq.0, "Skipping"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LockManager;
    use byzshard_core::Store;
    use byzshard_storage::MemoryStore;
    use byzshard_test_helpers::sequenced_txn;
    use byzshard_types::{AccountId, TxnStatus};
    use std::time::Duration;

    fn committed(store: &MemoryStore, id: &str, amount: u64, seq: u64) -> Transaction {
        let mut txn = sequenced_txn(id, 1, 2, amount, seq);
        txn.status = TxnStatus::Committed;
        store.insert_txn(&txn).unwrap();
        txn
    }

    async fn wait_for(sequencer: &Sequencer, seq: u64) {
        for _ in 0..200 {
            if sequencer.last_executed() >= SequenceNumber(seq) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("sequencer did not reach {}", seq);
    }

    #[test]
    fn test_submit_ignores_applied_and_duplicate_numbers() {
        let (sequencer, _worker) = Sequencer::new(&SequencerConfig::default());
        assert!(!sequencer.submit(SequenceNumber::NONE, Slot::Skip));
        assert!(sequencer.skip(SequenceNumber(2)));
        assert!(!sequencer.skip(SequenceNumber(2)));
        assert!(sequencer.has_gap());

        assert_eq!(sequencer.fill_gaps_through(SequenceNumber(3)), 2);
        assert!(!sequencer.has_gap());
        assert_eq!(sequencer.pending_len(), 3);
    }

    #[tokio::test]
    async fn test_applies_in_sequence_order_regardless_of_arrival() {
        let store = Arc::new(MemoryStore::with_accounts([
            (AccountId(1), 100),
            (AccountId(2), 0),
        ]));
        let locks = Arc::new(LockManager::new(1000));
        let (executor, mut events) = Executor::new(store.clone(), locks);
        let (sequencer, worker) = Sequencer::new(&SequencerConfig::default());
        let cancel = CancellationToken::new();
        tokio::spawn(worker.run(Arc::new(executor), cancel.clone()));

        // Seq 2 overdraws unless seq 1 has not run yet; seq 3 needs seq 1's
        // effect to be visible.
        let t3 = committed(&store, "t3", 10, 3);
        let t2 = committed(&store, "t2", 60, 2);
        let t1 = committed(&store, "t1", 50, 1);
        sequencer.submit(t3.seq, Slot::Execute(t3));
        sequencer.submit(t2.seq, Slot::Execute(t2));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sequencer.last_executed(), SequenceNumber::NONE);

        sequencer.submit(t1.seq, Slot::Execute(t1));
        wait_for(&sequencer, 3).await;

        let mut order = Vec::new();
        while let Ok(event) = events.try_recv() {
            order.push(event.txn().id.to_string());
        }
        assert_eq!(order, vec!["t1", "t2", "t3"]);

        assert_eq!(
            store.txn(&"t2".into()).unwrap().unwrap().status,
            TxnStatus::Failed
        );
        assert_eq!(store.balance(AccountId(1)).unwrap(), Some(40));
        assert_eq!(store.balance(AccountId(2)).unwrap(), Some(60));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_skip_unblocks_later_slots() {
        let store = Arc::new(MemoryStore::with_accounts([
            (AccountId(1), 100),
            (AccountId(2), 0),
        ]));
        let (executor, _events) = Executor::new(store.clone(), Arc::new(LockManager::new(1000)));
        let (sequencer, worker) = Sequencer::new(&SequencerConfig::default());
        let cancel = CancellationToken::new();
        tokio::spawn(worker.run(Arc::new(executor), cancel.clone()));

        let t2 = committed(&store, "t2", 5, 2);
        sequencer.submit(t2.seq, Slot::Execute(t2));
        sequencer.skip(SequenceNumber(1));
        wait_for(&sequencer, 2).await;

        assert_eq!(store.balance(AccountId(2)).unwrap(), Some(5));
        cancel.cancel();
    }
}
