//! Message encoding and decoding for the RPC transport.
//!
//! # Wire Format
//!
//! Every RPC payload is a single JSON document:
//!
//! ```text
//! [JSON-encoded message]
//! ```
//!
//! # Type Dispatch
//!
//! The message type is determined by the RPC method that carries it, not by a
//! field in the payload, so the caller names the type it expects to decode.

use crate::NetworkMessage;
use thiserror::Error;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Message too short")]
    MessageTooShort,

    #[error("{message_type} encode error: {reason}")]
    Encode {
        message_type: &'static str,
        reason: String,
    },

    #[error("{message_type} decode error: {reason}")]
    Decode {
        message_type: &'static str,
        reason: String,
    },
}

/// Encode a message to wire format.
pub fn encode_message<M: NetworkMessage>(message: &M) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(message).map_err(|e| CodecError::Encode {
        message_type: M::message_type_id(),
        reason: e.to_string(),
    })
}

/// Decode a message of the expected type from wire format.
pub fn decode_message<M: NetworkMessage>(data: &[u8]) -> Result<M, CodecError> {
    if data.is_empty() {
        return Err(CodecError::MessageTooShort);
    }
    serde_json::from_slice(data).map_err(|e| CodecError::Decode {
        message_type: M::message_type_id(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PbftRequest, ProcessTxnRequest, TwoPcKind, TwoPcMessage};
    use byzshard_types::{
        AccountId, ConsensusMessage, KeyPair, Outcome, Phase, ReplicaId, RoundKind,
        SequenceNumber, Transaction,
    };

    #[test]
    fn test_signed_request_survives_wire() {
        let keypair = KeyPair::from_seed(&[8u8; 32]);
        let txn = Transaction::new("t1", AccountId(1), AccountId(2), 5);
        let vote = ConsensusMessage::sign(
            &keypair,
            ReplicaId(1),
            Phase::TwoPcPrePrepare,
            &txn,
            Some(Outcome::Abort),
        );
        let request = PbftRequest::proposal(
            ReplicaId(1),
            txn,
            RoundKind::Outcome(Outcome::Abort),
            SequenceNumber(2),
            vote,
        );

        let bytes = encode_message(&request).unwrap();
        let decoded: PbftRequest = decode_message(&bytes).unwrap();

        assert_eq!(decoded, request);
        assert!(decoded
            .proposal_vote()
            .unwrap()
            .verify(&keypair.public_key()));
    }

    #[test]
    fn test_two_pc_signature_survives_wire() {
        let keypair = KeyPair::from_seed(&[8u8; 32]);
        let txn = Transaction::new("t1", AccountId(1), AccountId(1500), 5);
        let message = TwoPcMessage::sign(
            &keypair,
            TwoPcKind::PrepareResponse,
            ReplicaId(5),
            txn,
            Outcome::Abort,
            None,
        );

        let decoded: TwoPcMessage = decode_message(&encode_message(&message).unwrap()).unwrap();
        assert!(decoded.verify(&keypair.public_key()));
    }

    #[test]
    fn test_empty_payload_rejected() {
        let result: Result<ProcessTxnRequest, _> = decode_message(&[]);
        assert!(matches!(result, Err(CodecError::MessageTooShort)));
    }

    #[test]
    fn test_wrong_type_reports_expected_type() {
        let bytes = encode_message(&crate::Ack).unwrap();
        let result: Result<ProcessTxnRequest, _> = decode_message(&bytes);
        match result {
            Err(CodecError::Decode { message_type, .. }) => {
                assert_eq!(message_type, "client.process_txn")
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
