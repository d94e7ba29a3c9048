//! Message traits shared by every RPC payload.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A message that can cross the wire.
pub trait NetworkMessage: Serialize + DeserializeOwned + Send + 'static {
    /// Stable identifier used in logs and codec errors.
    fn message_type_id() -> &'static str;
}

/// Type-safe request/response pairing.
pub trait Request: NetworkMessage {
    /// The response this request expects.
    type Response: NetworkMessage;
}
