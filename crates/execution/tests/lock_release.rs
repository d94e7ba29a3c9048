//! Locks are released exactly once, however transfers on shared accounts
//! interleave.

use byzshard_core::Store;
use byzshard_execution::{Executor, LockManager, Sequencer, SequencerConfig, Slot};
use byzshard_storage::MemoryStore;
use byzshard_types::{AccountId, SequenceNumber, Transaction, TxnStatus};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

const ACCOUNTS: u64 = 4;
const TXNS: usize = 64;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn test_concurrent_transfers_release_every_lock() {
    for seed in [1u64, 7, 42] {
        run(seed).await;
    }
}

async fn run(seed: u64) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let store = Arc::new(MemoryStore::with_accounts(
        (1..=ACCOUNTS).map(|a| (AccountId(a), 50)),
    ));
    let locks = Arc::new(LockManager::new(1000));
    let (executor, _events) = Executor::new(store.clone(), locks.clone());
    let (sequencer, worker) = Sequencer::new(&SequencerConfig::default());
    let cancel = CancellationToken::new();
    tokio::spawn(worker.run(Arc::new(executor), cancel.clone()));

    let next_seq = Arc::new(AtomicU64::new(1));
    let mut handles = Vec::new();
    for i in 0..TXNS {
        let sender = rng.gen_range(1..=ACCOUNTS);
        let mut receiver = rng.gen_range(1..=ACCOUNTS);
        if receiver == sender {
            receiver = sender % ACCOUNTS + 1;
        }
        let amount = rng.gen_range(1..=40);
        let store = store.clone();
        let locks = locks.clone();
        let sequencer = sequencer.clone();
        let next_seq = next_seq.clone();

        handles.push(tokio::spawn(async move {
            let mut txn = Transaction::new(
                format!("s{}-t{}", seed, i),
                AccountId(sender),
                AccountId(receiver),
                amount,
            );
            locks.acquire(&txn.id, &txn.local_accounts()).await;
            txn.seq = SequenceNumber(next_seq.fetch_add(1, Ordering::SeqCst));
            txn.status = TxnStatus::Committed;
            store.insert_txn(&txn).unwrap();
            sequencer.submit(txn.seq, Slot::Execute(txn));
        }));
    }
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    let last = SequenceNumber(TXNS as u64);
    for _ in 0..500 {
        if sequencer.last_executed() >= last {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(sequencer.last_executed(), last);

    // Every transaction is terminal and nothing is left locked.
    let open = store
        .txns_by_status(&[TxnStatus::Committed])
        .unwrap();
    assert!(open.is_empty());
    assert_eq!(locks.holder_count(), 0);

    // Money is conserved whether individual transfers failed or not.
    assert_eq!(store.total_balance(), u128::from(50 * ACCOUNTS));
    cancel.cancel();
}
