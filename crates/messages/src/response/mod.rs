//! Response messages.

mod pbft;
mod report;
mod sync;

pub use pbft::{Ack, PbftReply, TxnReply};
pub use report::{BalanceReport, DbReport, PerformanceReport};
pub use sync::SyncResponse;
