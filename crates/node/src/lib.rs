//! A complete replica.
//!
//! This crate wires the consensus, execution and 2PC crates into one
//! service and adds what surrounds them:
//!
//! - [`Replica`], the facade for every RPC a replica answers
//! - The client pipeline: classification and round start
//! - The dispatcher that turns execution events into 2PC steps and client
//!   replies
//! - [`RetrySupervisor`], which resubmits stalled transactions and resumes
//!   unsettled 2PC outcomes
//! - Catch-up through [`sync`]
//! - Admin and observability operations with latency [`Metrics`]

mod admin;
mod client;
mod config;
mod dispatcher;
mod error;
mod metrics;
mod replica;
mod retry;
pub mod sync;

pub use config::{ConfigError, NodeConfig, RetryConfig, SyncConfig};
pub use dispatcher::client_reply;
pub use error::NodeError;
pub use metrics::Metrics;
pub use replica::{Replica, ServerState};
pub use retry::{ActiveRound, ActiveRounds, RetrySupervisor};
