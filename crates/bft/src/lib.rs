//! PBFT consensus inside one cluster.
//!
//! Two kinds of round run through the same three-phase machine:
//!
//! - a **transaction round** sequences a client transaction
//!   (PrePrepare → Prepare → Commit), after which it is handed to the
//!   sequencer for execution;
//! - an **outcome round** replicates a 2PC decision
//!   (TwoPcPrePrepare → TwoPcPrepare → TwoPcCommit) with the outcome bound
//!   into every signed vote, after which it is finalized.
//!
//! The leader drives rounds with [`propose`], [`repropose`] and
//! [`decide_outcome`]; followers answer through [`on_pre_prepare`],
//! [`on_prepare`], [`on_commit`] and [`on_round_failed`]. All of them share
//! one [`ConsensusContext`].

mod config;
mod context;
mod follower;
mod leader;
mod verify;
mod vote_set;

pub use config::BftConfig;
pub use context::{CatchUpHint, ConsensusContext, SequenceAllocator};
pub use follower::{on_commit, on_pre_prepare, on_prepare, on_round_failed};
pub use leader::{
    commit_locally, decide_outcome, propose, recorded_outcome, repropose, run_round,
    stored_certificate, RoundOutput,
};
pub use verify::{verify_certificate, verify_vote, Expected};
pub use vote_set::VoteSet;

#[cfg(test)]
mod testing;
