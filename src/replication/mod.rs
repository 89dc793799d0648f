//! Replication collaborators of the redo writer
//!
//! - `ReplicationManager`: the transport the leader writes to
//! - `ReplRedoEngine`: the receive side a replica decodes with
//! - `ReplicaRole`: leader/replica state of a replicated writer
//! - `TaskDispatcher`: off-thread execution for role transitions
//!
//! Authority is decided outside this crate: the embedding process tells
//! the writer when it became leader, and the transport tells it (through a
//! refused write or commit) when it no longer is.

mod config;
mod dispatch;
mod engine;
mod manager;
mod role;

pub use config::ReplicationConfig;
pub use dispatch::TaskDispatcher;
pub use engine::{DecodeCursor, LatchGuard, ReceivingEngine, ReplRedoEngine, SuspendLatch};
pub use manager::{MemoryReplicationManager, ReplicationManager};
pub use role::ReplicaRole;
