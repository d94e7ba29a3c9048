//! Shared seams between the consensus, execution and node crates.
//!
//! - Error taxonomy returned by every consensus-path operation
//! - [`Store`], the persistence contract
//! - [`Transport`], the replica-to-replica RPC contract
//! - [`fan_out`], the parallel broadcast primitive

mod broadcast;
mod error;
mod store;
mod transport;

pub use broadcast::{fan_out, Fanout};
pub use error::{AuthError, ConsensusError, ValidationError};
pub use store::{BalanceChange, Store, StoreError};
pub use transport::{RpcError, Transport};
