//! redocore - transactional durability core of an embedded storage engine
//!
//! - `durability`: per-transaction durability modes
//! - `redo`: redo log encoding, the single-node file writer and the
//!   leader/replica aware replicated writer
//! - `replication`: transport and receive-engine contracts, role state
//! - `txn`: pending transaction finalization (locks, undo, trash)
//! - `checkpoint`: checkpoint hook orchestration and the recovery point header

pub mod checkpoint;
pub mod config;
pub mod crash_point;
pub mod durability;
pub mod observability;
pub mod redo;
pub mod replication;
pub mod txn;

pub use config::{ConfigError, ConfigResult, DurabilityConfig};
pub use durability::DurabilityMode;
