//! Database services needed to finalize transactions

use std::sync::Arc;

use crate::observability::DurabilityMetrics;

use super::lock::{LockManager, LockTable};
use super::trash::{FragmentedTrash, TrashBin};
use super::undo::{UndoLog, UndoRegistry};

/// What pending transaction finalization needs from the database.
pub trait TxnDatabase {
    fn lock_manager(&self) -> &dyn LockManager;

    /// Removes a finalized undo log from the set of live logs.
    fn unregister(&self, undo: &dyn UndoLog);

    fn fragmented_trash(&self) -> &dyn FragmentedTrash;

    fn metrics(&self) -> Option<&DurabilityMetrics> {
        None
    }
}

/// In-process database built from the in-memory collaborators.
#[derive(Debug, Default)]
pub struct LocalDatabase {
    locks: LockTable,
    undo: UndoRegistry,
    trash: TrashBin,
    metrics: Arc<DurabilityMetrics>,
}

impl LocalDatabase {
    pub fn new(metrics: Arc<DurabilityMetrics>) -> Self {
        Self {
            locks: LockTable::new(),
            undo: UndoRegistry::new(),
            trash: TrashBin::new(),
            metrics,
        }
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    pub fn undo_registry(&self) -> &UndoRegistry {
        &self.undo
    }

    pub fn trash(&self) -> &TrashBin {
        &self.trash
    }
}

impl TxnDatabase for LocalDatabase {
    fn lock_manager(&self) -> &dyn LockManager {
        &self.locks
    }

    fn unregister(&self, undo: &dyn UndoLog) {
        self.undo.unregister(undo.txn_id());
    }

    fn fragmented_trash(&self) -> &dyn FragmentedTrash {
        &self.trash
    }

    fn metrics(&self) -> Option<&DurabilityMetrics> {
        Some(&self.metrics)
    }
}
