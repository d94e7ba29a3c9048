//! Client entry point, administrative and observability requests.

use crate::response::{Ack, BalanceReport, DbReport, PerformanceReport};
use crate::{NetworkMessage, Request};
use byzshard_types::{AccountId, ShardMap, Transaction};
use serde::{Deserialize, Serialize};

/// Submit a transaction to a cluster leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessTxnRequest {
    /// The client's transaction.
    pub txn: Transaction,
}

impl NetworkMessage for ProcessTxnRequest {
    fn message_type_id() -> &'static str {
        "client.process_txn"
    }
}

impl Request for ProcessTxnRequest {
    type Response = Ack;
}

/// Fault injection and topology control.
///
/// `None` fields leave the current value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateServerState {
    /// Whether the replica answers RPCs at all.
    pub alive: Option<bool>,
    /// Whether the replica refuses to take part in pre-prepare.
    pub byzantine: Option<bool>,
    /// New membership snapshot.
    pub shard_map: Option<ShardMap>,
    /// New number of accounts per cluster.
    pub shard_size: Option<u64>,
}

impl UpdateServerState {
    /// Only toggle liveness.
    pub fn alive(alive: bool) -> Self {
        Self {
            alive: Some(alive),
            ..Default::default()
        }
    }

    /// Only toggle the byzantine flag.
    pub fn byzantine(byzantine: bool) -> Self {
        Self {
            byzantine: Some(byzantine),
            ..Default::default()
        }
    }
}

impl NetworkMessage for UpdateServerState {
    fn message_type_id() -> &'static str {
        "admin.update_server_state"
    }
}

impl Request for UpdateServerState {
    type Response = Ack;
}

/// Read one account's balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintBalanceRequest {
    /// Account to read.
    pub account: AccountId,
}

impl NetworkMessage for PrintBalanceRequest {
    fn message_type_id() -> &'static str {
        "admin.print_balance"
    }
}

impl Request for PrintBalanceRequest {
    type Response = BalanceReport;
}

/// List executed transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintDbRequest;

impl NetworkMessage for PrintDbRequest {
    fn message_type_id() -> &'static str {
        "admin.print_db"
    }
}

impl Request for PrintDbRequest {
    type Response = DbReport;
}

/// Latency and throughput over completed client requests.
///
/// `last` restricts the report to the most recent `n` requests (Benchmark).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceRequest {
    /// Window size, or `None` for all requests.
    pub last: Option<usize>,
}

impl NetworkMessage for PerformanceRequest {
    fn message_type_id() -> &'static str {
        "admin.performance"
    }
}

impl Request for PerformanceRequest {
    type Response = PerformanceReport;
}
