//! Consensus responses and client replies.

use crate::NetworkMessage;
use byzshard_types::{ConsensusMessage, TxnId, TxnStatus};
use serde::{Deserialize, Serialize};

/// Empty acknowledgement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack;

impl NetworkMessage for Ack {
    fn message_type_id() -> &'static str {
        "ack"
    }
}

/// A follower's counter-vote for the phase it was asked about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PbftReply {
    /// The follower's signed vote.
    pub vote: ConsensusMessage,
}

impl NetworkMessage for PbftReply {
    fn message_type_id() -> &'static str {
        "pbft.reply"
    }
}

/// Final answer to the client that submitted a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnReply {
    /// Transaction answered.
    pub txn_id: TxnId,
    /// Terminal status (or last known status if the outcome is stuck).
    pub status: TxnStatus,
    /// Failure cause, if any.
    pub error: Option<String>,
}

impl NetworkMessage for TxnReply {
    fn message_type_id() -> &'static str {
        "client.reply"
    }
}
