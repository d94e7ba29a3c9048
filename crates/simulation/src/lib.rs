//! In-process simulation of a sharded deployment.
//!
//! ```text
//!   SimCluster
//!     ├─ cluster 1: Replica ×n ─┐
//!     ├─ cluster 2: Replica ×n ─┼─▶ LocalNetwork (codec round trip per call)
//!     └─ ...                    ┘        └─ client reply inbox
//! ```
//!
//! Each replica keeps its own [`byzshard_storage::MemoryStore`] holding the
//! accounts of its cluster. Keys and the shard map are the deterministic
//! fixtures of `byzshard-test-helpers`, and [`Workload`] produces seeded
//! random transfers.

mod cluster;
mod network;
mod workload;

pub use cluster::{SimCluster, SimulationConfig};
pub use network::{LocalNetwork, NetworkConfig};
pub use workload::Workload;
