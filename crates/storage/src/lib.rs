//! Record storage for replicas.
//!
//! The production store is an external relational database. This crate
//! provides the in-memory store used by tests and the in-process cluster.

mod memory;

pub use memory::MemoryStore;
