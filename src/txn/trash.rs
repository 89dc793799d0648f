//! Fragmented trash
//!
//! Large values deleted by a transaction are not freed immediately; their
//! fragments go to a trash keyed by transaction id, emptied once the
//! transaction commits.

use std::collections::HashMap;
use std::io;

use parking_lot::Mutex;

pub trait FragmentedTrash: Send + Sync {
    /// Frees every fragment trashed by `txn_id`.
    fn empty_trash(&self, txn_id: u64) -> io::Result<()>;
}

/// In-memory trash.
#[derive(Debug, Default)]
pub struct TrashBin {
    fragments: Mutex<HashMap<u64, Vec<Vec<u8>>>>,
}

impl TrashBin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, txn_id: u64, fragment: Vec<u8>) {
        self.fragments.lock().entry(txn_id).or_default().push(fragment);
    }

    /// Fragments waiting for `txn_id`.
    pub fn pending(&self, txn_id: u64) -> usize {
        self.fragments.lock().get(&txn_id).map_or(0, Vec::len)
    }
}

impl FragmentedTrash for TrashBin {
    fn empty_trash(&self, txn_id: u64) -> io::Result<()> {
        self.fragments.lock().remove(&txn_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_trash_only_touches_its_transaction() {
        let trash = TrashBin::new();
        trash.add(1, vec![1; 16]);
        trash.add(1, vec![2; 16]);
        trash.add(2, vec![3; 16]);

        trash.empty_trash(1).unwrap();
        assert_eq!(trash.pending(1), 0);
        assert_eq!(trash.pending(2), 1);
    }
}
