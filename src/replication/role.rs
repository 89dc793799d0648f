//! Redo ownership role
//!
//! A replicated writer is either the `Leader` (originates redo records) or a
//! `Replica` (applies records received from the leader). Exactly one role
//! holds at any instant. Writers start as replicas and are promoted
//! explicitly.

use std::fmt;

/// Role of a replicated redo writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicaRole {
    /// Sole origin of redo records.
    Leader,
    /// Consumes redo from the leader; rejects local writes.
    #[default]
    Replica,
}

impl ReplicaRole {
    pub fn is_leader(&self) -> bool {
        matches!(self, ReplicaRole::Leader)
    }

    /// Role after a promotion, or `None` if already leader.
    pub fn promoted(self) -> Option<ReplicaRole> {
        match self {
            ReplicaRole::Replica => Some(ReplicaRole::Leader),
            ReplicaRole::Leader => None,
        }
    }

    /// Role after a demotion, or `None` if already a replica.
    pub fn demoted(self) -> Option<ReplicaRole> {
        match self {
            ReplicaRole::Leader => Some(ReplicaRole::Replica),
            ReplicaRole::Replica => None,
        }
    }

    /// Observable state name.
    pub fn state_name(&self) -> &'static str {
        match self {
            ReplicaRole::Leader => "leader",
            ReplicaRole::Replica => "replica",
        }
    }
}

impl fmt::Display for ReplicaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state_name())
    }
}
