//! RPC messages exchanged between replicas, clients and administrators.

pub mod codec;
mod network;
pub mod request;
pub mod response;

pub use codec::{decode_message, encode_message, CodecError};
pub use network::{NetworkMessage, Request};

// Re-export commonly used types
pub use request::{
    PbftBody, PbftRequest, PerformanceRequest, PrintBalanceRequest, PrintDbRequest,
    ProcessTxnRequest, RoundFailed, SyncRequest, TwoPcDecision, TwoPcKind, TwoPcMessage,
    UpdateServerState,
};
pub use response::{
    Ack, BalanceReport, DbReport, PbftReply, PerformanceReport, SyncResponse, TxnReply,
};
