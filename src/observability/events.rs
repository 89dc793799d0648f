//! Lifecycle events
//!
//! Stable upper-snake event names. Tooling matches on these strings, so they
//! must not change once published. Multi-step operations (checkpoint, redo
//! replay) log through `ObservationScope` instead.

use std::fmt;

/// Durability lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    // Configuration
    ConfigLoaded,

    // Redo writer
    RedoOpened,
    RedoRotated,
    RedoShutdown,
    RedoClosed,
    /// A replicated write or commit was refused by the transport
    RedoWriteRejected,
    /// Replica became leader
    RedoLeaderPromoted,
    /// Leader stepped down to replica
    RedoDemoted,
    RedoCorruption,

    // Replica receive side
    ReceiveStart,
    ReceiveFailed,

    // Checkpoint
    /// A switch observed a position behind the last snapshot
    CheckpointPositionRegressed,

    // Pending transactions
    PendingCommit,
    PendingRollback,
    UndoReplayFailed,
    LockReleaseViolation,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::RedoOpened => "REDO_OPENED",
            Event::RedoRotated => "REDO_ROTATED",
            Event::RedoShutdown => "REDO_SHUTDOWN",
            Event::RedoClosed => "REDO_CLOSED",
            Event::RedoWriteRejected => "REDO_WRITE_REJECTED",
            Event::RedoLeaderPromoted => "REDO_LEADER_PROMOTED",
            Event::RedoDemoted => "REDO_DEMOTED",
            Event::RedoCorruption => "REDO_CORRUPTION",

            Event::ReceiveStart => "REPLICA_RECEIVE_START",
            Event::ReceiveFailed => "REPLICA_RECEIVE_FAILED",

            Event::CheckpointPositionRegressed => "CHECKPOINT_POSITION_REGRESSED",

            Event::PendingCommit => "PENDING_TXN_COMMIT",
            Event::PendingRollback => "PENDING_TXN_ROLLBACK",
            Event::UndoReplayFailed => "UNDO_REPLAY_FAILED",
            Event::LockReleaseViolation => "LOCK_RELEASE_VIOLATION",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Event::RedoCorruption | Event::UndoReplayFailed | Event::LockReleaseViolation
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_upper_snake() {
        let events = [
            Event::ConfigLoaded,
            Event::RedoOpened,
            Event::RedoRotated,
            Event::RedoShutdown,
            Event::RedoClosed,
            Event::RedoWriteRejected,
            Event::RedoLeaderPromoted,
            Event::RedoDemoted,
            Event::RedoCorruption,
            Event::ReceiveStart,
            Event::ReceiveFailed,
            Event::CheckpointPositionRegressed,
            Event::PendingCommit,
            Event::PendingRollback,
            Event::UndoReplayFailed,
            Event::LockReleaseViolation,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_fatal_events() {
        assert!(Event::RedoCorruption.is_fatal());
        assert!(Event::UndoReplayFailed.is_fatal());
        assert!(Event::LockReleaseViolation.is_fatal());
        assert!(!Event::RedoDemoted.is_fatal());
        assert!(!Event::CheckpointPositionRegressed.is_fatal());
    }

    #[test]
    fn test_event_display() {
        assert_eq!(format!("{}", Event::RedoLeaderPromoted), "REDO_LEADER_PROMOTED");
        assert_eq!(format!("{}", Event::ReceiveStart), "REPLICA_RECEIVE_START");
    }
}
