//! Checkpoint error types
//!
//! Error codes:
//! - CHECKPOINT_FAILED: a checkpoint step outside the redo writer failed
//! - CHECKPOINT_HEADER_FAILED: the recovery point header could not be
//!   written or read
//! - CHECKPOINT_REDO_FAILED: a redo writer checkpoint hook failed
//!
//! All checkpoint errors are ERROR severity. A failed checkpoint leaves the
//! previous recovery point in force.

use std::error::Error as StdError;
use std::fmt;
use std::io;

use crate::observability::Severity;
use crate::redo::RedoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointErrorCode {
    CheckpointFailed,
    CheckpointHeaderFailed,
    CheckpointRedoFailed,
}

impl CheckpointErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointErrorCode::CheckpointFailed => "CHECKPOINT_FAILED",
            CheckpointErrorCode::CheckpointHeaderFailed => "CHECKPOINT_HEADER_FAILED",
            CheckpointErrorCode::CheckpointRedoFailed => "CHECKPOINT_REDO_FAILED",
        }
    }

    pub fn severity(&self) -> Severity {
        Severity::Error
    }
}

impl fmt::Display for CheckpointErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Source = Box<dyn StdError + Send + Sync + 'static>;

/// Checkpoint error with its code, a message and the underlying cause.
#[derive(Debug)]
pub struct CheckpointError {
    code: CheckpointErrorCode,
    message: String,
    source: Option<Source>,
}

impl CheckpointError {
    fn new(code: CheckpointErrorCode, message: impl Into<String>, source: Option<Source>) -> Self {
        Self {
            code,
            message: message.into(),
            source,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(CheckpointErrorCode::CheckpointFailed, message, None)
    }

    pub fn failed_with_source(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(
            CheckpointErrorCode::CheckpointFailed,
            message,
            Some(Box::new(source)),
        )
    }

    pub fn header_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(
            CheckpointErrorCode::CheckpointHeaderFailed,
            message,
            Some(Box::new(source)),
        )
    }

    /// A header that exists but cannot be understood.
    pub fn header_invalid(message: impl Into<String>) -> Self {
        Self::new(CheckpointErrorCode::CheckpointHeaderFailed, message, None)
    }

    pub fn redo_failed(hook: &str, source: RedoError) -> Self {
        Self::new(
            CheckpointErrorCode::CheckpointRedoFailed,
            format!("{} failed", hook),
            Some(Box::new(source)),
        )
    }

    pub fn code(&self) -> CheckpointErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// The redo error behind a `CHECKPOINT_REDO_FAILED`, if any.
    pub fn redo_error(&self) -> Option<&RedoError> {
        self.source.as_ref().and_then(|s| s.downcast_ref::<RedoError>())
    }

    /// Checkpoint errors never require stopping the process.
    pub fn is_fatal(&self) -> bool {
        false
    }
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity().as_str(),
            self.code,
            self.message
        )?;
        if let Some(source) = &self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl StdError for CheckpointError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<RedoError> for CheckpointError {
    fn from(err: RedoError) -> Self {
        CheckpointError::redo_failed("redo writer", err)
    }
}

pub type CheckpointResult<T> = Result<T, CheckpointError>;
