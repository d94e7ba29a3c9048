//! Request messages.

mod admin;
mod pbft;
mod sync;
mod two_pc;

pub use admin::{
    PerformanceRequest, PrintBalanceRequest, PrintDbRequest, ProcessTxnRequest,
    UpdateServerState,
};
pub use pbft::{PbftBody, PbftRequest, RoundFailed};
pub use sync::SyncRequest;
pub use two_pc::{TwoPcDecision, TwoPcKind, TwoPcMessage};
