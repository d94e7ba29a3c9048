//! Ordered execution of committed transactions.
//!
//! This crate turns consensus decisions into balance changes. It handles:
//!
//! - Per-account locking (blocking and fail-fast modes)
//! - The sequencer that applies transactions in strict sequence order
//! - Provisional application, commit and rollback of cross-shard transfers

mod config;
mod executor;
mod lock;
mod sequencer;

pub use config::SequencerConfig;
pub use executor::{ExecutionEvent, Executor, Finalization};
pub use lock::LockManager;
pub use sequencer::{Sequencer, SequencerWorker, Slot};
