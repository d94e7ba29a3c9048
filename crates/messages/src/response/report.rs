//! Observability responses.

use crate::NetworkMessage;
use byzshard_types::{AccountId, ReplicaId, Transaction};
use serde::{Deserialize, Serialize};

/// One replica's view of an account balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceReport {
    /// Answering replica.
    pub replica: ReplicaId,
    /// Account read.
    pub account: AccountId,
    /// Balance, or `None` if the replica does not store the account.
    pub balance: Option<u64>,
}

impl NetworkMessage for BalanceReport {
    fn message_type_id() -> &'static str {
        "admin.balance_report"
    }
}

/// Executed transactions of one replica, ordered by sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbReport {
    /// Answering replica.
    pub replica: ReplicaId,
    /// Executed transactions.
    pub txns: Vec<Transaction>,
}

impl NetworkMessage for DbReport {
    fn message_type_id() -> &'static str {
        "admin.db_report"
    }
}

/// Latency and throughput of completed client requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    /// Requests measured.
    pub count: u64,
    /// Sum of latencies in milliseconds.
    pub total_latency_ms: u64,
    /// Mean latency in milliseconds.
    pub mean_latency_ms: f64,
    /// 99th percentile latency in milliseconds.
    pub p99_latency_ms: u64,
    /// Requests per second over the measured window.
    pub throughput: f64,
}

impl PerformanceReport {
    /// Report with no samples.
    pub fn empty() -> Self {
        Self {
            count: 0,
            total_latency_ms: 0,
            mean_latency_ms: 0.0,
            p99_latency_ms: 0,
            throughput: 0.0,
        }
    }
}

impl NetworkMessage for PerformanceReport {
    fn message_type_id() -> &'static str {
        "admin.performance_report"
    }
}
