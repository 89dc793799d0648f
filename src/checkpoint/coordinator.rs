//! Checkpoint coordination
//!
//! A checkpoint runs the redo writer hooks in a fixed order:
//!
//! 1. `checkpoint_prepare` (replicated writers suspend the receive engine)
//! 2. `checkpoint_switch` under the exclusive commit lock
//! 3. `checkpoint_started` (always, once the switch is over)
//! 4. flush of the database image by the caller
//! 5. header write (the new recovery point)
//! 6. `checkpoint_finished`
//!
//! Any failure aborts the checkpoint and the previous header stays in force.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::DurabilityConfig;
use crate::crash_point::{maybe_crash, points};
use crate::observability::{DurabilityMetrics, ObservationScope};
use crate::redo::RedoWriter;

use super::errors::{CheckpointError, CheckpointResult};
use super::marker::CheckpointHeader;

/// Runs checkpoints against one redo writer.
pub struct Checkpointer {
    writer: Arc<dyn RedoWriter>,
    header_path: PathBuf,
    metrics: Arc<DurabilityMetrics>,
}

impl Checkpointer {
    pub fn new(
        writer: Arc<dyn RedoWriter>,
        header_path: impl Into<PathBuf>,
        metrics: Arc<DurabilityMetrics>,
    ) -> Self {
        Self {
            writer,
            header_path: header_path.into(),
            metrics,
        }
    }

    pub fn from_config(
        config: &DurabilityConfig,
        writer: Arc<dyn RedoWriter>,
        metrics: Arc<DurabilityMetrics>,
    ) -> Self {
        Self::new(writer, config.checkpoint_header.clone(), metrics)
    }

    pub fn header_path(&self) -> &Path {
        &self.header_path
    }

    pub fn writer(&self) -> &Arc<dyn RedoWriter> {
        &self.writer
    }

    pub fn should_checkpoint(&self, size_threshold: u64) -> bool {
        self.writer.should_checkpoint(size_threshold)
    }

    /// Recovery point of the last completed checkpoint, if any.
    pub fn recovery_point(&self) -> CheckpointResult<Option<CheckpointHeader>> {
        CheckpointHeader::read_optional(&self.header_path)
    }

    /// Runs a checkpoint with nothing to flush besides the header.
    pub fn checkpoint(&self) -> CheckpointResult<CheckpointHeader> {
        self.checkpoint_with(|_| Ok(()))
    }

    /// Runs a checkpoint if the redo log grew by at least `size_threshold`.
    pub fn maybe_checkpoint(&self, size_threshold: u64) -> CheckpointResult<Option<CheckpointHeader>> {
        if !self.should_checkpoint(size_threshold) {
            return Ok(None);
        }
        self.checkpoint().map(Some)
    }

    /// Runs a checkpoint. `flush_image` makes the database image durable up
    /// to the captured position before the header records it.
    pub fn checkpoint_with<F>(&self, flush_image: F) -> CheckpointResult<CheckpointHeader>
    where
        F: FnOnce(&CheckpointHeader) -> io::Result<()>,
    {
        let scope = ObservationScope::new("CHECKPOINT");

        match self.run(flush_image) {
            Ok(header) => {
                self.metrics.increment_checkpoints();
                let position = header.position.to_string();
                let txn_id = header.transaction_id.to_string();
                scope.complete_with_fields(&[
                    ("position", position.as_str()),
                    ("txn_id", txn_id.as_str()),
                ]);
                Ok(header)
            }
            Err(e) => {
                self.metrics.increment_checkpoint_failures();
                scope.fail(&e.to_string());
                Err(e)
            }
        }
    }

    fn run<F>(&self, flush_image: F) -> CheckpointResult<CheckpointHeader>
    where
        F: FnOnce(&CheckpointHeader) -> io::Result<()>,
    {
        maybe_crash(points::CHECKPOINT_START);

        self.writer
            .checkpoint_prepare()
            .map_err(|e| CheckpointError::redo_failed("checkpoint_prepare", e))?;

        let switched = {
            let _exclusive = self.writer.commit_lock().write();
            self.writer.checkpoint_switch()
        };
        let started = self.writer.checkpoint_started();

        switched.map_err(|e| CheckpointError::redo_failed("checkpoint_switch", e))?;
        started.map_err(|e| CheckpointError::redo_failed("checkpoint_started", e))?;
        maybe_crash(points::CHECKPOINT_AFTER_SWITCH);

        let header = CheckpointHeader::new(
            self.writer.checkpoint_position(),
            self.writer.checkpoint_transaction_id(),
        );

        flush_image(&header)
            .map_err(|e| CheckpointError::failed_with_source("failed to flush database image", e))?;

        maybe_crash(points::CHECKPOINT_BEFORE_HEADER);
        header.write_to_file(&self.header_path)?;
        maybe_crash(points::CHECKPOINT_AFTER_HEADER);

        self.writer
            .checkpoint_finished()
            .map_err(|e| CheckpointError::redo_failed("checkpoint_finished", e))?;

        Ok(header)
    }
}
