//! Transaction durability modes
//!
//! A durability mode controls how far a commit must be pushed toward stable
//! storage before the caller is told it succeeded. Strong modes are safe and
//! slow; weak modes are fast and can lose recently committed transactions.
//!
//! Modes are totally ordered by strength:
//!
//! `Sync` > `NoSync` > `NoFlush` > `NoLog`

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Durability strength of a committed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DurabilityMode {
    /// Strongest mode. Commit returns only after the redo record has been
    /// flushed to non-volatile storage.
    Sync,

    /// Commit returns once the record is handed to the operating system.
    /// Power failures and OS crashes can lose recently committed
    /// transactions. A clean shutdown durably flushes the log.
    NoSync,

    /// Commit returns once the record is in the in-process buffer. The
    /// buffer is written to the OS when full. Process crashes can lose
    /// recently committed transactions. A clean shutdown flushes the log.
    NoFlush,

    /// Weakest mode. Nothing is written to the redo log; the transaction
    /// becomes durable only after the next checkpoint. No shutdown flush.
    NoLog,
}

impl DurabilityMode {
    /// All modes, strongest first.
    pub const ALL: [DurabilityMode; 4] = [
        DurabilityMode::Sync,
        DurabilityMode::NoSync,
        DurabilityMode::NoFlush,
        DurabilityMode::NoLog,
    ];

    fn strength(self) -> u8 {
        match self {
            DurabilityMode::Sync => 3,
            DurabilityMode::NoSync => 2,
            DurabilityMode::NoFlush => 1,
            DurabilityMode::NoLog => 0,
        }
    }

    /// Returns true if this mode gives a strictly stronger guarantee.
    pub fn is_stronger_than(self, other: DurabilityMode) -> bool {
        self.strength() > other.strength()
    }

    /// Returns the stronger of the two modes.
    pub fn strongest(self, other: DurabilityMode) -> DurabilityMode {
        if other.is_stronger_than(self) {
            other
        } else {
            self
        }
    }

    /// Mode used for every outgoing replicated write, whatever the caller
    /// asked for. The requested strength is an acknowledgement concern of the
    /// replication layer, not of the local append.
    pub fn replicated_write_mode(self) -> DurabilityMode {
        DurabilityMode::NoSync
    }

    /// Whether a commit in this mode writes to the redo log at all.
    pub fn writes_log(self) -> bool {
        self != DurabilityMode::NoLog
    }

    /// Whether the in-process buffer must be handed to the OS before the
    /// commit returns.
    pub fn requires_flush(self) -> bool {
        matches!(self, DurabilityMode::Sync | DurabilityMode::NoSync)
    }

    /// Whether the log must be forced to stable storage before the commit
    /// returns.
    pub fn requires_sync(self) -> bool {
        self == DurabilityMode::Sync
    }

    /// Whether a clean shutdown should flush the log for this mode.
    pub fn flushes_on_shutdown(self) -> bool {
        self != DurabilityMode::NoLog
    }

    /// Canonical configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DurabilityMode::Sync => "SYNC",
            DurabilityMode::NoSync => "NO_SYNC",
            DurabilityMode::NoFlush => "NO_FLUSH",
            DurabilityMode::NoLog => "NO_LOG",
        }
    }
}

impl Default for DurabilityMode {
    fn default() -> Self {
        DurabilityMode::Sync
    }
}

impl PartialOrd for DurabilityMode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Stronger modes compare greater.
impl Ord for DurabilityMode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.strength().cmp(&other.strength())
    }
}

impl fmt::Display for DurabilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DurabilityMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "SYNC" => Ok(DurabilityMode::Sync),
            "NO_SYNC" => Ok(DurabilityMode::NoSync),
            "NO_FLUSH" => Ok(DurabilityMode::NoFlush),
            "NO_LOG" => Ok(DurabilityMode::NoLog),
            _ => Err(ConfigError::InvalidDurabilityMode(s.to_string())),
        }
    }
}
