//! Undo logs
//!
//! An undo log records what a transaction overwrote so the change can be
//! reversed. Commit truncates it; rollback replays it newest-first. Live
//! undo logs are registered with the database until finalized.

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

/// Undo history of one transaction.
pub trait UndoLog: Send {
    fn txn_id(&self) -> u64;

    /// Discards the history. `commit` is true when the transaction
    /// committed.
    fn truncate(&mut self, commit: bool) -> io::Result<()>;

    /// Reverses every recorded change, newest first.
    fn rollback(&mut self) -> io::Result<()>;
}

/// Where rolled-back values are written.
pub trait UndoTarget: Send + Sync {
    /// Restores `key` to `value`; `None` removes it.
    fn restore(&self, index_id: u64, key: &[u8], value: Option<&[u8]>) -> io::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct UndoEntry {
    index_id: u64,
    key: Vec<u8>,
    previous: Option<Vec<u8>>,
}

/// Undo log held in memory.
pub struct MemoryUndoLog {
    txn_id: u64,
    entries: Vec<UndoEntry>,
    target: Arc<dyn UndoTarget>,
}

impl MemoryUndoLog {
    pub fn new(txn_id: u64, target: Arc<dyn UndoTarget>) -> Self {
        Self {
            txn_id,
            entries: Vec::new(),
            target,
        }
    }

    /// Records the value `key` had before the transaction changed it.
    pub fn record(&mut self, index_id: u64, key: &[u8], previous: Option<&[u8]>) {
        self.entries.push(UndoEntry {
            index_id,
            key: key.to_vec(),
            previous: previous.map(<[u8]>::to_vec),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl UndoLog for MemoryUndoLog {
    fn txn_id(&self) -> u64 {
        self.txn_id
    }

    fn truncate(&mut self, _commit: bool) -> io::Result<()> {
        self.entries.clear();
        Ok(())
    }

    fn rollback(&mut self) -> io::Result<()> {
        while let Some(entry) = self.entries.last() {
            self.target
                .restore(entry.index_id, &entry.key, entry.previous.as_deref())?;
            self.entries.pop();
        }
        Ok(())
    }
}

/// Ordered in-memory key/value index, usable as an undo target.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    entries: Mutex<BTreeMap<(u64, Vec<u8>), Vec<u8>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index_id: u64, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.lock().get(&(index_id, key.to_vec())).cloned()
    }

    /// Stores `value`, or removes the key when `None`. Returns the previous
    /// value.
    pub fn put(&self, index_id: u64, key: &[u8], value: Option<&[u8]>) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock();
        let key = (index_id, key.to_vec());
        match value {
            Some(value) => entries.insert(key, value.to_vec()),
            None => entries.remove(&key),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl UndoTarget for MemoryIndex {
    fn restore(&self, index_id: u64, key: &[u8], value: Option<&[u8]>) -> io::Result<()> {
        self.put(index_id, key, value);
        Ok(())
    }
}

/// Registry of live undo logs, by transaction id.
#[derive(Debug, Default)]
pub struct UndoRegistry {
    live: Mutex<HashSet<u64>>,
}

impl UndoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, txn_id: u64) {
        self.live.lock().insert(txn_id);
    }

    /// Returns false if the log was not registered.
    pub fn unregister(&self, txn_id: u64) -> bool {
        self.live.lock().remove(&txn_id)
    }

    pub fn is_registered(&self, txn_id: u64) -> bool {
        self.live.lock().contains(&txn_id)
    }

    pub fn len(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_restores_newest_first() {
        let index = Arc::new(MemoryIndex::new());
        index.put(1, b"k", Some(b"original"));

        let mut undo = MemoryUndoLog::new(5, index.clone());
        undo.record(1, b"k", Some(b"original"));
        index.put(1, b"k", Some(b"first"));
        undo.record(1, b"k", Some(b"first"));
        index.put(1, b"k", Some(b"second"));
        undo.record(1, b"new", None);
        index.put(1, b"new", Some(b"x"));

        undo.rollback().unwrap();
        assert_eq!(index.get(1, b"k"), Some(b"original".to_vec()));
        assert_eq!(index.get(1, b"new"), None);
        assert!(undo.is_empty());
    }

    #[test]
    fn test_truncate_discards_history() {
        let index = Arc::new(MemoryIndex::new());
        let mut undo = MemoryUndoLog::new(1, index.clone());
        undo.record(1, b"k", None);
        index.put(1, b"k", Some(b"v"));

        undo.truncate(true).unwrap();
        undo.rollback().unwrap();
        assert_eq!(index.get(1, b"k"), Some(b"v".to_vec()));
    }

    #[test]
    fn test_failed_restore_keeps_remaining_entries() {
        struct Failing;
        impl UndoTarget for Failing {
            fn restore(&self, _: u64, _: &[u8], _: Option<&[u8]>) -> io::Result<()> {
                Err(io::Error::new(io::ErrorKind::Other, "read-only"))
            }
        }

        let mut undo = MemoryUndoLog::new(1, Arc::new(Failing));
        undo.record(1, b"k", None);
        assert!(undo.rollback().is_err());
        assert_eq!(undo.len(), 1);
    }

    #[test]
    fn test_registry() {
        let registry = UndoRegistry::new();
        registry.register(3);
        assert!(registry.is_registered(3));
        assert!(registry.unregister(3));
        assert!(!registry.unregister(3));
        assert!(registry.is_empty());
    }
}
