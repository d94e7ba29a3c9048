//! Administrative and observability operations.

use crate::replica::Replica;
use byzshard_core::ConsensusError;
use byzshard_messages::{
    Ack, BalanceReport, DbReport, PerformanceReport, PerformanceRequest, PrintBalanceRequest,
    UpdateServerState,
};
use byzshard_types::{Topology, TxnStatus, ViewNumber};
use tracing::{info, warn};

impl Replica {
    /// Apply fault-injection flags and a new membership snapshot.
    ///
    /// Answered even while the replica is down, so it can be revived. The
    /// shard map and shard size are swapped in one step and the lock table
    /// is resized to match; locks already held stay valid.
    pub fn update_server_state(&self, update: UpdateServerState) -> Ack {
        if let Some(alive) = update.alive {
            self.state.set_alive(alive);
        }
        if let Some(byzantine) = update.byzantine {
            self.state.set_byzantine(byzantine);
        }

        if update.shard_map.is_some() || update.shard_size.is_some() {
            let mut map = match update.shard_map {
                Some(map) => map,
                None => self.topology.shard_map().as_ref().clone(),
            };
            if let Some(size) = update.shard_size {
                map = map.with_shard_size(size);
            }
            let shard_size = map.shard_size();
            if map.cluster_of_replica(self.id()).is_none() {
                warn!(replica = %self.id(), "New shard map does not list this replica");
            }
            self.topology.replace(map);
            self.ctx.locks().resize(shard_size);
        }

        info!(
            replica = %self.id(),
            alive = self.state.is_alive(),
            byzantine = self.state.is_byzantine(),
            shard_size = self.topology.shard_map().shard_size(),
            "Server state updated"
        );
        Ack
    }

    /// Move to another view, rotating leadership.
    pub fn set_view(&self, view: ViewNumber) -> Ack {
        self.ctx.set_view(view);
        info!(replica = %self.id(), view = view.0, leader = ?self.ctx.leader(), "View changed by admin");
        Ack
    }

    /// This replica's balance for an account.
    pub fn print_balance(&self, request: PrintBalanceRequest) -> Result<BalanceReport, ConsensusError> {
        Ok(BalanceReport {
            replica: self.id(),
            account: request.account,
            balance: self.ctx.store().balance(request.account)?,
        })
    }

    /// Executed transactions, ordered by sequence number.
    pub fn print_db(&self) -> Result<DbReport, ConsensusError> {
        Ok(DbReport {
            replica: self.id(),
            txns: self.ctx.store().txns_by_status(&[TxnStatus::Executed])?,
        })
    }

    /// Latency and throughput of completed client requests.
    pub fn performance(&self, request: PerformanceRequest) -> PerformanceReport {
        match request.last {
            Some(n) => self.metrics.report_last(n),
            None => self.metrics.report(),
        }
    }
}
