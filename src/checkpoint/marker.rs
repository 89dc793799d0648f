//! Checkpoint header
//!
//! The header records the recovery point of the last completed checkpoint:
//! the redo position to replay from and the last transaction id covered by
//! the checkpoint. It is replaced atomically (temporary file, fsync,
//! rename, directory fsync), so a crash leaves either the old or the new
//! header, never a mix.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{CheckpointError, CheckpointResult};

pub const HEADER_FORMAT_VERSION: u8 = 1;

/// Recovery point written by a completed checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointHeader {
    /// Redo position captured by `checkpoint_switch`.
    pub position: i64,

    /// Last transaction id covered by the checkpoint.
    pub transaction_id: u64,

    pub created_at: DateTime<Utc>,

    pub format_version: u8,
}

impl CheckpointHeader {
    pub fn new(position: i64, transaction_id: u64) -> Self {
        Self {
            position,
            transaction_id,
            created_at: Utc::now(),
            format_version: HEADER_FORMAT_VERSION,
        }
    }

    pub fn to_json(&self) -> CheckpointResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            CheckpointError::header_failed(
                "failed to serialize checkpoint header",
                io::Error::new(io::ErrorKind::InvalidData, e),
            )
        })
    }

    pub fn from_json(json: &str) -> CheckpointResult<Self> {
        let header: Self = serde_json::from_str(json).map_err(|e| {
            CheckpointError::header_invalid(format!("failed to parse checkpoint header: {}", e))
        })?;
        if header.format_version != HEADER_FORMAT_VERSION {
            return Err(CheckpointError::header_invalid(format!(
                "unsupported checkpoint header version {}",
                header.format_version
            )));
        }
        Ok(header)
    }

    /// Atomically replaces the header at `path`.
    pub fn write_to_file(&self, path: &Path) -> CheckpointResult<()> {
        let json = self.to_json()?;

        if let Some(parent) = parent_dir(path) {
            fs::create_dir_all(parent).map_err(|e| {
                CheckpointError::header_failed(
                    format!("failed to create header directory {}", parent.display()),
                    e,
                )
            })?;
        }

        let tmp = temp_path(path);
        let mut file = File::create(&tmp).map_err(|e| {
            CheckpointError::header_failed(format!("failed to create {}", tmp.display()), e)
        })?;
        file.write_all(json.as_bytes()).map_err(|e| {
            CheckpointError::header_failed(format!("failed to write {}", tmp.display()), e)
        })?;
        file.sync_all().map_err(|e| {
            CheckpointError::header_failed(format!("failed to fsync {}", tmp.display()), e)
        })?;
        drop(file);

        fs::rename(&tmp, path).map_err(|e| {
            CheckpointError::header_failed(
                format!("failed to rename {} to {}", tmp.display(), path.display()),
                e,
            )
        })?;

        if let Some(parent) = parent_dir(path) {
            let dir = OpenOptions::new().read(true).open(parent).map_err(|e| {
                CheckpointError::header_failed(
                    format!("failed to open header directory {}", parent.display()),
                    e,
                )
            })?;
            dir.sync_all().map_err(|e| {
                CheckpointError::header_failed(
                    format!("failed to fsync header directory {}", parent.display()),
                    e,
                )
            })?;
        }

        Ok(())
    }

    pub fn read_from_file(path: &Path) -> CheckpointResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            CheckpointError::header_failed(format!("failed to read {}", path.display()), e)
        })?;
        Self::from_json(&contents)
    }

    /// Reads the header, or `None` if no checkpoint completed yet.
    pub fn read_optional(path: &Path) -> CheckpointResult<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CheckpointError::header_failed(
                format!("failed to read {}", path.display()),
                e,
            )),
        }
    }
}

fn parent_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
