//! Catch-up response.

use crate::codec::CodecError;
use crate::NetworkMessage;
use byzshard_types::{
    signing, Hash, KeyPair, PublicKey, ReplicaId, SequenceNumber, Signature, Transaction,
};
use serde::{Deserialize, Serialize};

/// Applied transactions after the requester's last executed sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Answering replica.
    pub responder: ReplicaId,
    /// Records ordered by sequence number.
    pub txns: Vec<Transaction>,
    /// Responder's last executed sequence number.
    pub last_executed: SequenceNumber,
    /// Responder's signature over the records.
    pub signature: Signature,
}

fn records_hash(txns: &[Transaction]) -> Result<Hash, CodecError> {
    let bytes = serde_json::to_vec(txns).map_err(|e| CodecError::Encode {
        message_type: "sync.records",
        reason: e.to_string(),
    })?;
    Ok(Hash::from_bytes(&bytes))
}

impl SyncResponse {
    /// Build and sign a response.
    pub fn sign(
        keypair: &KeyPair,
        responder: ReplicaId,
        txns: Vec<Transaction>,
        last_executed: SequenceNumber,
    ) -> Result<Self, CodecError> {
        let hash = records_hash(&txns)?;
        Ok(Self {
            responder,
            txns,
            last_executed,
            signature: keypair.sign(&signing::sync_response_message(
                responder,
                last_executed,
                &hash,
            )),
        })
    }

    /// Verify the responder's signature.
    pub fn verify(&self, public_key: &PublicKey) -> bool {
        match records_hash(&self.txns) {
            Ok(hash) => public_key.verify(
                &signing::sync_response_message(self.responder, self.last_executed, &hash),
                &self.signature,
            ),
            Err(_) => false,
        }
    }
}

impl NetworkMessage for SyncResponse {
    fn message_type_id() -> &'static str {
        "sync.response"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byzshard_types::AccountId;

    #[test]
    fn test_tampered_records_fail_verification() {
        let keypair = KeyPair::from_seed(&[6u8; 32]);
        let txns = vec![Transaction::new("t1", AccountId(1), AccountId(2), 5)];

        let mut response =
            SyncResponse::sign(&keypair, ReplicaId(1), txns, SequenceNumber(1)).unwrap();
        assert!(response.verify(&keypair.public_key()));

        response.txns[0].amount = 500;
        assert!(!response.verify(&keypair.public_key()));
    }
}
