//! Catch-up request.

use crate::response::SyncResponse;
use crate::{NetworkMessage, Request};
use byzshard_types::{signing, KeyPair, PublicKey, ReplicaId, SequenceNumber, Signature};
use serde::{Deserialize, Serialize};

/// Request for every applied transaction after `last_executed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Lagging replica.
    pub requester: ReplicaId,
    /// Requester's last executed sequence number.
    pub last_executed: SequenceNumber,
    /// Requester's signature.
    pub signature: Signature,
}

impl SyncRequest {
    /// Build and sign a request.
    pub fn sign(keypair: &KeyPair, requester: ReplicaId, last_executed: SequenceNumber) -> Self {
        Self {
            requester,
            last_executed,
            signature: keypair.sign(&signing::sync_request_message(requester, last_executed)),
        }
    }

    /// Verify the requester's signature.
    pub fn verify(&self, public_key: &PublicKey) -> bool {
        public_key.verify(
            &signing::sync_request_message(self.requester, self.last_executed),
            &self.signature,
        )
    }
}

impl NetworkMessage for SyncRequest {
    fn message_type_id() -> &'static str {
        "sync.request"
    }
}

impl Request for SyncRequest {
    type Response = SyncResponse;
}
