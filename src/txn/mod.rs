//! Transaction finalization
//!
//! A transaction whose redo has been written but not yet confirmed durable
//! (or replicated) is parked as a `PendingTxn`. It keeps its exclusive locks
//! and undo log until the outcome is known, then either commits or rolls
//! back.

mod database;
mod errors;
mod lock;
mod pending;
mod trash;
mod undo;

pub use database::{LocalDatabase, TxnDatabase};
pub use errors::{TxnError, TxnResult};
pub use lock::{Lock, LockError, LockKey, LockManager, LockOwner, LockTable};
pub use pending::{LockList, PendingChain, PendingHandle, PendingTxn};
pub use trash::{FragmentedTrash, TrashBin};
pub use undo::{MemoryIndex, MemoryUndoLog, UndoLog, UndoRegistry, UndoTarget};
