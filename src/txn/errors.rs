//! Transaction finalization errors
//!
//! Error codes:
//! - TXN_UNDO_TRUNCATE_FAILED (ERROR)
//! - TXN_UNDO_ROLLBACK_FAILED (FATAL: locks are still held, state is unknown)
//! - TXN_TRASH_FAILED (ERROR)
//! - TXN_LOCK_HELD (ERROR)

use std::io;

use thiserror::Error;

use super::lock::LockError;

#[derive(Debug, Error)]
pub enum TxnError {
    #[error("failed to truncate undo log of transaction {txn_id}: {source}")]
    UndoTruncate {
        txn_id: u64,
        #[source]
        source: io::Error,
    },

    #[error("failed to roll back transaction {txn_id}: {source}")]
    UndoRollback {
        txn_id: u64,
        #[source]
        source: io::Error,
    },

    #[error("failed to empty fragmented trash of transaction {txn_id}: {source}")]
    Trash {
        txn_id: u64,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Lock(#[from] LockError),
}

impl TxnError {
    pub fn code(&self) -> &'static str {
        match self {
            TxnError::UndoTruncate { .. } => "TXN_UNDO_TRUNCATE_FAILED",
            TxnError::UndoRollback { .. } => "TXN_UNDO_ROLLBACK_FAILED",
            TxnError::Trash { .. } => "TXN_TRASH_FAILED",
            TxnError::Lock(_) => "TXN_LOCK_HELD",
        }
    }

    /// A failed rollback leaves partially undone state behind locks that are
    /// never released; the database must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TxnError::UndoRollback { .. })
    }

    pub fn txn_id(&self) -> Option<u64> {
        match self {
            TxnError::UndoTruncate { txn_id, .. }
            | TxnError::UndoRollback { txn_id, .. }
            | TxnError::Trash { txn_id, .. } => Some(*txn_id),
            TxnError::Lock(_) => None,
        }
    }
}

pub type TxnResult<T> = Result<T, TxnError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn io_err() -> io::Error {
        io::Error::new(io::ErrorKind::Other, "disk")
    }

    #[test]
    fn test_only_rollback_failure_is_fatal() {
        assert!(TxnError::UndoRollback { txn_id: 1, source: io_err() }.is_fatal());
        assert!(!TxnError::UndoTruncate { txn_id: 1, source: io_err() }.is_fatal());
        assert!(!TxnError::Trash { txn_id: 1, source: io_err() }.is_fatal());
    }

    #[test]
    fn test_codes_and_txn_id() {
        let err = TxnError::Trash { txn_id: 7, source: io_err() };
        assert_eq!(err.code(), "TXN_TRASH_FAILED");
        assert_eq!(err.txn_id(), Some(7));
        assert!(err.to_string().contains("transaction 7"));
    }
}
