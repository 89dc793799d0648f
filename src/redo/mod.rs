//! Redo logging
//!
//! Committed changes are recorded as redo operations before the commit is
//! acknowledged (subject to the transaction's `DurabilityMode`). After a
//! crash, redo since the last checkpoint is replayed; on a replica, the
//! leader's redo stream is decoded and applied continuously.
//!
//! # Module layout
//!
//! - `op`: record encoding
//! - `log`: shared redo buffer and the `RedoSink` seam
//! - `writer`: the `RedoWriter` trait and `open_redo_writer`
//! - `file`: single-node file writer and replay
//! - `repl`: leader/replica aware writer
//! - `decoder`: incremental decoding for recovery and replicas

mod decoder;
mod errors;
mod file;
mod log;
mod op;
mod repl;
mod writer;

pub use decoder::{read_log_file, LogFileContents, RedoDecoder, RedoVisitor};
pub use errors::{RedoError, RedoResult};
pub use file::{list_log_ids, redo_file_path, replay, FileRedoWriter, ReplayStats};
pub use log::{RedoLog, RedoSink};
pub use op::{DecodeError, RedoOp};
pub use repl::ReplRedoWriter;
pub use writer::{open_redo_writer, CommitLock, RedoTarget, RedoWriter, ReplicatedTarget};
