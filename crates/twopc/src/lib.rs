//! Two-phase commit between the clusters of a cross-shard transfer.
//!
//! The sender's cluster coordinates and the receiver's cluster participates.
//! Each side applies its half of the transfer provisionally after its own
//! PBFT round, exchanges certificates with the other side through its
//! leader, and replicates the decided outcome through an outcome round
//! before finalizing it.
//!
//! The coordinator leader waits [`TwoPcConfig::decision_timeout`] for the
//! participant and decides Abort without an answer. The participant leader
//! waits [`TwoPcConfig::participant_timeout`] for the decision and aborts
//! its side without one.
//!
//! A decided outcome whose round misses quorum stays provisional with the
//! leader's vote recorded; [`TwoPc::resume`] runs it again.

mod config;
mod coordinator;
mod evidence;
mod manager;
mod participant;
mod resume;
mod session;

pub use config::TwoPcConfig;
pub use manager::TwoPc;
pub use session::{Resolution, Session, SessionTable};
