//! Redo error types
//!
//! Error codes:
//! - REDO_UNMODIFIABLE_REPLICA (ERROR severity, caller may retry elsewhere)
//! - REDO_CLOSED (ERROR severity)
//! - REDO_IO_FAILED (ERROR severity)
//! - REDO_CORRUPTION (FATAL severity)
//! - REDO_CONFIG_INVALID (ERROR severity)

use std::io;

use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by redo writers and decoders.
#[derive(Debug, Error)]
pub enum RedoError {
    /// This node is no longer authorized to originate redo records.
    #[error("replica is unmodifiable: this node is not the leader")]
    UnmodifiableReplica,

    /// The writer was closed.
    #[error("redo writer is closed{}", cause_suffix(.cause))]
    Closed { cause: Option<String> },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("redo log corrupt at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    #[error("cannot open redo writer: {0}")]
    Config(#[from] ConfigError),
}

impl RedoError {
    /// Wraps an I/O error with a description of what was being done.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        RedoError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        RedoError::Corrupt {
            offset,
            reason: reason.into(),
        }
    }

    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            RedoError::UnmodifiableReplica => "REDO_UNMODIFIABLE_REPLICA",
            RedoError::Closed { .. } => "REDO_CLOSED",
            RedoError::Io { .. } => "REDO_IO_FAILED",
            RedoError::Corrupt { .. } => "REDO_CORRUPTION",
            RedoError::Config(_) => "REDO_CONFIG_INVALID",
        }
    }

    /// Returns true for the unmodifiable-replica condition.
    pub fn is_unmodifiable(&self) -> bool {
        matches!(self, RedoError::UnmodifiableReplica)
    }

    /// Corruption halts recovery; everything else is reported to the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RedoError::Corrupt { .. })
    }
}

fn cause_suffix(cause: &Option<String>) -> String {
    match cause {
        Some(cause) => format!(": {}", cause),
        None => String::new(),
    }
}

/// Result type for redo operations
pub type RedoResult<T> = Result<T, RedoError>;
