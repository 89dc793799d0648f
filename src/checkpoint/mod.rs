//! Checkpoints
//!
//! A checkpoint moves the recovery point forward: the redo writer captures a
//! position under the exclusive commit lock, the database image is made
//! durable up to it, and the header (`checkpoint.json`) records it. Recovery
//! replays redo from the header's position.
//!
//! # Crash safety
//!
//! - Crash before the header is replaced: the previous recovery point is
//!   used and the redo it needs is still present.
//! - Crash after the header is replaced but before `checkpoint_finished`:
//!   the new recovery point is used; obsolete redo is deleted by the next
//!   checkpoint.

mod coordinator;
mod errors;
mod marker;

pub use coordinator::Checkpointer;
pub use errors::{CheckpointError, CheckpointErrorCode, CheckpointResult};
pub use marker::{CheckpointHeader, HEADER_FORMAT_VERSION};
