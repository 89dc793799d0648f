//! Pending transactions
//!
//! A transaction whose commit decision is made but whose redo is not yet
//! confirmed keeps its exclusive locks in a `PendingTxn`. Once confirmed it
//! is committed (locks released, undo discarded); if the redo is lost it is
//! rolled back (undo applied, then locks released).
//!
//! Lock release order is the order the locks were added, first lock first.

use std::fmt;

use crate::observability::{log_event_with_fields, Event, Logger};

use super::database::TxnDatabase;
use super::errors::{TxnError, TxnResult};
use super::lock::{Lock, LockOwner};
use super::undo::UndoLog;

/// Locks in the order they were added.
#[derive(Debug, Default, Clone)]
pub struct LockList {
    locks: Vec<Lock>,
}

impl LockList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, lock: Lock) {
        self.locks.push(lock);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lock> {
        self.locks.iter()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Position of a pending transaction in a `PendingChain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingHandle(usize);

/// Exclusive locks and undo history of a transaction awaiting finalization.
pub struct PendingTxn {
    txn_id: u64,
    first: Lock,
    rest: LockList,
    commit_pos: i64,
    undo: Option<Box<dyn UndoLog>>,
    has_fragmented_trash: bool,
    prev: Option<PendingHandle>,
}

impl PendingTxn {
    pub fn new(txn_id: u64, first: Lock) -> Self {
        Self {
            txn_id,
            first,
            rest: LockList::new(),
            commit_pos: 0,
            undo: None,
            has_fragmented_trash: false,
            prev: None,
        }
    }

    /// Adds an exclusive lock, after all locks added so far.
    pub fn add(&mut self, lock: Lock) {
        self.rest.push(lock);
    }

    pub fn txn_id(&self) -> u64 {
        self.txn_id
    }

    pub fn commit_position(&self) -> i64 {
        self.commit_pos
    }

    pub fn set_commit_position(&mut self, position: i64) {
        self.commit_pos = position;
    }

    pub fn attach_undo(&mut self, undo: Box<dyn UndoLog>) {
        self.undo = Some(undo);
    }

    pub fn has_undo(&self) -> bool {
        self.undo.is_some()
    }

    /// Records that the transaction left fragments in the trash.
    pub fn mark_fragmented_trash(&mut self) {
        self.has_fragmented_trash = true;
    }

    pub fn has_fragmented_trash(&self) -> bool {
        self.has_fragmented_trash
    }

    /// The previously pending transaction, when held in a chain.
    pub fn prev(&self) -> Option<PendingHandle> {
        self.prev
    }

    /// All held locks in release order.
    pub fn locks(&self) -> impl Iterator<Item = &Lock> {
        std::iter::once(&self.first).chain(self.rest.iter())
    }

    pub fn lock_count(&self) -> usize {
        1 + self.rest.len()
    }

    /// Releases every lock, then discards the undo log and empties the
    /// fragmented trash.
    ///
    /// Every step runs even if an earlier one failed; the first failure is
    /// returned. The undo log is unregistered exactly once.
    pub fn commit(mut self, db: &dyn TxnDatabase) -> TxnResult<()> {
        self.unlock_all(db);

        let mut first_error = None;
        if let Some(mut undo) = self.undo.take() {
            if let Err(source) = undo.truncate(true) {
                first_error = Some(TxnError::UndoTruncate {
                    txn_id: self.txn_id,
                    source,
                });
            }
            db.unregister(undo.as_ref());
        }

        if self.has_fragmented_trash {
            if let Err(source) = db.fragmented_trash().empty_trash(self.txn_id) {
                first_error.get_or_insert(TxnError::Trash {
                    txn_id: self.txn_id,
                    source,
                });
            }
        }

        if let Some(metrics) = db.metrics() {
            metrics.increment_pending_commits();
        }
        let txn_id = self.txn_id.to_string();
        let locks = self.lock_count().to_string();
        Logger::trace(
            Event::PendingCommit.as_str(),
            &[("locks", locks.as_str()), ("txn_id", txn_id.as_str())],
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Applies the undo log, then releases every lock, then unregisters the
    /// undo log.
    ///
    /// If the undo log cannot be applied nothing is released and the error
    /// is fatal.
    pub fn rollback(mut self, db: &dyn TxnDatabase) -> TxnResult<()> {
        self.rollback_in_place(db)
    }

    /// Rollback that leaves the transaction intact, undo log attached, when
    /// the undo log cannot be applied.
    fn rollback_in_place(&mut self, db: &dyn TxnDatabase) -> TxnResult<()> {
        if let Some(undo) = self.undo.as_mut() {
            if let Err(source) = undo.rollback() {
                let txn_id = self.txn_id.to_string();
                let error = source.to_string();
                log_event_with_fields(
                    Event::UndoReplayFailed,
                    &[("error", error.as_str()), ("txn_id", txn_id.as_str())],
                );
                return Err(TxnError::UndoRollback {
                    txn_id: self.txn_id,
                    source,
                });
            }
        }

        self.unlock_all(db);

        if let Some(undo) = self.undo.take() {
            db.unregister(undo.as_ref());
        }

        if let Some(metrics) = db.metrics() {
            metrics.increment_pending_rollbacks();
        }
        let txn_id = self.txn_id.to_string();
        Logger::trace(Event::PendingRollback.as_str(), &[("txn_id", txn_id.as_str())]);
        Ok(())
    }

    fn unlock_all(&self, db: &dyn TxnDatabase) {
        let manager = db.lock_manager();
        for lock in self.locks() {
            manager.unlock(self, lock);
        }
    }
}

impl LockOwner for PendingTxn {
    fn owner_id(&self) -> u64 {
        self.txn_id
    }
}

impl fmt::Debug for PendingTxn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTxn")
            .field("txn_id", &self.txn_id)
            .field("locks", &self.lock_count())
            .field("commit_pos", &self.commit_pos)
            .field("has_undo", &self.undo.is_some())
            .field("has_fragmented_trash", &self.has_fragmented_trash)
            .field("prev", &self.prev)
            .finish()
    }
}

/// Pending transactions linked newest to oldest.
#[derive(Debug, Default)]
pub struct PendingChain {
    slots: Vec<Option<PendingTxn>>,
    newest: Option<PendingHandle>,
    len: usize,
}

impl PendingChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `txn` as the newest pending transaction.
    pub fn push(&mut self, mut txn: PendingTxn) -> PendingHandle {
        txn.prev = self.newest;
        let handle = PendingHandle(self.slots.len());
        self.slots.push(Some(txn));
        self.newest = Some(handle);
        self.len += 1;
        handle
    }

    pub fn get(&self, handle: PendingHandle) -> Option<&PendingTxn> {
        self.slots.get(handle.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, handle: PendingHandle) -> Option<&mut PendingTxn> {
        self.slots.get_mut(handle.0).and_then(Option::as_mut)
    }

    pub fn newest(&self) -> Option<PendingHandle> {
        self.newest
    }

    pub fn prev(&self, handle: PendingHandle) -> Option<PendingHandle> {
        self.get(handle).and_then(PendingTxn::prev)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Removes every pending transaction, oldest first.
    pub fn drain(&mut self) -> Vec<PendingTxn> {
        let mut txns = Vec::with_capacity(self.len);
        let mut cursor = self.newest.take();
        while let Some(handle) = cursor {
            match self.slots.get_mut(handle.0).and_then(Option::take) {
                Some(txn) => {
                    cursor = txn.prev;
                    txns.push(txn);
                }
                None => break,
            }
        }
        self.slots.clear();
        self.len = 0;
        txns.reverse();
        txns
    }

    /// Commits every pending transaction, oldest first. All are attempted;
    /// the first failure is returned.
    pub fn commit_all(&mut self, db: &dyn TxnDatabase) -> TxnResult<usize> {
        let mut committed = 0;
        let mut first_error = None;
        for txn in self.drain() {
            match txn.commit(db) {
                Ok(()) => committed += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(committed),
        }
    }

    /// Rolls back every pending transaction, newest first, stopping at the
    /// first failure. The failed transaction and every older one stay in
    /// the chain, still holding their locks.
    pub fn rollback_all(&mut self, db: &dyn TxnDatabase) -> TxnResult<usize> {
        let mut txns = self.drain();
        let mut rolled_back = 0;
        while let Some(mut txn) = txns.pop() {
            if let Err(e) = txn.rollback_in_place(db) {
                txns.push(txn);
                for txn in txns {
                    self.push(txn);
                }
                return Err(e);
            }
            rolled_back += 1;
        }
        Ok(rolled_back)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::{LocalDatabase, LockKey, MemoryIndex, MemoryUndoLog};
    use std::sync::Arc;

    fn db() -> LocalDatabase {
        LocalDatabase::new(Arc::new(crate::observability::DurabilityMetrics::new()))
    }

    fn pending(db: &LocalDatabase, txn_id: u64, keys: &[&[u8]]) -> PendingTxn {
        struct Owner(u64);
        impl LockOwner for Owner {
            fn owner_id(&self) -> u64 {
                self.0
            }
        }
        let owner = Owner(txn_id);
        let mut locks = keys
            .iter()
            .map(|key| db.locks().lock_exclusive(&owner, 1, key).unwrap());
        let mut txn = PendingTxn::new(txn_id, locks.next().unwrap());
        for lock in locks {
            txn.add(lock);
        }
        txn
    }

    #[test]
    fn test_locks_iterate_first_then_added() {
        let db = db();
        let txn = pending(&db, 1, &[b"a", b"b", b"c"]);
        let keys: Vec<_> = txn.locks().map(|l| l.key().key.clone()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(txn.lock_count(), 3);
    }

    #[test]
    fn test_commit_releases_and_unregisters() {
        let db = db();
        let index = Arc::new(MemoryIndex::new());
        let mut txn = pending(&db, 4, &[b"a", b"b"]);
        let mut undo = MemoryUndoLog::new(4, index.clone());
        undo.record(1, b"a", None);
        index.put(1, b"a", Some(b"v"));
        db.undo_registry().register(4);
        txn.attach_undo(Box::new(undo));

        txn.commit(&db).unwrap();
        assert!(db.locks().is_empty());
        assert!(!db.undo_registry().is_registered(4));
        assert_eq!(index.get(1, b"a"), Some(b"v".to_vec()));
    }

    #[test]
    fn test_commit_empties_trash_only_when_flagged() {
        let db = db();
        db.trash().add(1, vec![0; 8]);
        db.trash().add(2, vec![0; 8]);

        pending(&db, 1, &[b"a"]).commit(&db).unwrap();
        assert_eq!(db.trash().pending(1), 1);

        let mut txn = pending(&db, 2, &[b"b"]);
        txn.mark_fragmented_trash();
        txn.commit(&db).unwrap();
        assert_eq!(db.trash().pending(2), 0);
    }

    #[test]
    fn test_rollback_restores_before_unlock() {
        let db = db();
        let index = Arc::new(MemoryIndex::new());
        index.put(1, b"a", Some(b"old"));

        let mut txn = pending(&db, 9, &[b"a"]);
        let mut undo = MemoryUndoLog::new(9, index.clone());
        undo.record(1, b"a", Some(b"old"));
        index.put(1, b"a", Some(b"new"));
        db.undo_registry().register(9);
        txn.attach_undo(Box::new(undo));

        txn.rollback(&db).unwrap();
        assert_eq!(index.get(1, b"a"), Some(b"old".to_vec()));
        assert!(!db.locks().is_locked(&LockKey::new(1, b"a".to_vec())));
        assert!(!db.undo_registry().is_registered(9));
    }

    #[test]
    fn test_chain_links_newest_to_oldest() {
        let db = db();
        let mut chain = PendingChain::new();
        let h1 = chain.push(pending(&db, 1, &[b"a"]));
        let h2 = chain.push(pending(&db, 2, &[b"b"]));
        let h3 = chain.push(pending(&db, 3, &[b"c"]));

        assert_eq!(chain.len(), 3);
        assert_eq!(chain.newest(), Some(h3));
        assert_eq!(chain.prev(h3), Some(h2));
        assert_eq!(chain.prev(h2), Some(h1));
        assert_eq!(chain.prev(h1), None);

        let ids: Vec<_> = chain.drain().iter().map(PendingTxn::txn_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(chain.is_empty());
    }

    #[test]
    fn test_commit_all_releases_everything() {
        let db = db();
        let mut chain = PendingChain::new();
        chain.push(pending(&db, 1, &[b"a", b"b"]));
        chain.push(pending(&db, 2, &[b"c"]));

        assert_eq!(chain.commit_all(&db).unwrap(), 2);
        assert!(db.locks().is_empty());
        assert_eq!(db.metrics().unwrap().snapshot().pending_commits, 2);
    }
}
