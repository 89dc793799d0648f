//! Redo writer contract
//!
//! One trait, two implementations chosen at construction time:
//!
//! - `FileRedoWriter`: single node, checksummed files in a directory
//! - `ReplRedoWriter`: leader/replica aware, writes to a replication stream
//!
//! # Commit lock
//!
//! Every writer owns a `CommitLock`. Commits hold it shared; the
//! checkpointer holds it exclusive around `checkpoint_switch`, so the
//! captured position never splits a commit.
//!
//! # Checkpoint hooks
//!
//! Called in order by the checkpointer:
//!
//! 1. `checkpoint_prepare` (before the commit lock is taken)
//! 2. `checkpoint_switch` (under the exclusive commit lock)
//! 3. `checkpoint_started` (always runs once switching is over)
//! 4. `checkpoint_finished` (after the checkpoint is durable)

use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{ConfigError, DurabilityConfig};
use crate::durability::DurabilityMode;
use crate::observability::DurabilityMetrics;
use crate::replication::{ReplRedoEngine, ReplicationManager, TaskDispatcher};

use super::errors::RedoResult;
use super::file::FileRedoWriter;
use super::repl::ReplRedoWriter;

/// Commits take it shared, checkpoint switches exclusive.
pub type CommitLock = RwLock<()>;

/// Durable log of committed changes.
pub trait RedoWriter: Send + Sync {
    /// Records an auto-commit store (a delete when `value` is `None`),
    /// holding the commit lock shared.
    fn store(
        &self,
        index_id: u64,
        key: &[u8],
        value: Option<&[u8]>,
        mode: DurabilityMode,
    ) -> RedoResult<()> {
        let _shared = self.commit_lock().read();
        self.store_no_lock(index_id, key, value, mode)
    }

    /// Same as `store`; the caller already holds the commit lock.
    fn store_no_lock(
        &self,
        index_id: u64,
        key: &[u8],
        value: Option<&[u8]>,
        mode: DurabilityMode,
    ) -> RedoResult<()>;

    /// Records the final commit of `txn_id`. The caller holds the commit
    /// lock. Returns true if `txn_commit_sync` must be called after the lock
    /// is released to honor the requested mode.
    fn txn_commit_final(&self, txn_id: u64, mode: DurabilityMode) -> RedoResult<bool>;

    /// Completes a commit for which `txn_commit_final` returned true.
    fn txn_commit_sync(&self) -> RedoResult<()> {
        self.force(false)
    }

    /// Forces written records to stable storage.
    fn force(&self, metadata: bool) -> RedoResult<()>;

    /// Forces and releases the underlying resource.
    fn force_and_close(&self) -> RedoResult<()>;

    /// Records a clean shutdown and makes everything durable.
    fn shutdown(&self) -> RedoResult<()>;

    /// Closes the writer. Later commits fail with `RedoError::Closed`.
    fn close(&self, cause: Option<&str>) -> RedoResult<()>;

    /// Whether the log grew by at least `size_threshold` since the last
    /// checkpoint switch.
    fn should_checkpoint(&self, size_threshold: u64) -> bool;

    fn checkpoint_prepare(&self) -> RedoResult<()>;

    /// Captures the recovery position. The caller holds the commit lock
    /// exclusive.
    fn checkpoint_switch(&self) -> RedoResult<()>;

    fn checkpoint_started(&self) -> RedoResult<()>;

    fn checkpoint_finished(&self) -> RedoResult<()>;

    /// Position captured by the last `checkpoint_switch`.
    fn checkpoint_position(&self) -> i64;

    /// Transaction id captured by the last `checkpoint_switch`.
    fn checkpoint_transaction_id(&self) -> u64;

    fn last_transaction_id(&self) -> u64;

    fn commit_lock(&self) -> &CommitLock;
}

/// Collaborators of a replicated writer.
#[derive(Clone)]
pub struct ReplicatedTarget {
    pub engine: Arc<dyn ReplRedoEngine>,
    pub manager: Arc<dyn ReplicationManager>,
    pub dispatcher: TaskDispatcher,
}

/// Where redo goes.
#[derive(Clone)]
pub enum RedoTarget {
    /// Files under the configured redo directory.
    File,
    Replicated(ReplicatedTarget),
}

/// Opens the writer matching `config`.
///
/// Replication enabled requires a `Replicated` target and disabled requires
/// `File`.
pub fn open_redo_writer(
    config: &DurabilityConfig,
    target: RedoTarget,
    metrics: Arc<DurabilityMetrics>,
) -> RedoResult<Arc<dyn RedoWriter>> {
    config.validate()?;

    match (config.replication.enabled, target) {
        (false, RedoTarget::File) => {
            let writer = FileRedoWriter::open(&config.redo_dir, config.buffer_capacity, metrics)?;
            Ok(Arc::new(writer))
        }
        (true, RedoTarget::Replicated(target)) => Ok(Arc::new(ReplRedoWriter::new(
            target.engine,
            target.manager,
            target.dispatcher,
            config.buffer_capacity,
            metrics,
        ))),
        (true, RedoTarget::File) => Err(ConfigError::Invalid(
            "replication is enabled but no replication target was supplied".into(),
        )
        .into()),
        (false, RedoTarget::Replicated(_)) => Err(ConfigError::Invalid(
            "replication target supplied but replication is disabled".into(),
        )
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::{MemoryReplicationManager, ReceivingEngine, ReplicationConfig};
    use crate::redo::RedoOp;
    use tempfile::TempDir;

    fn replicated_target(runtime: &tokio::runtime::Runtime) -> RedoTarget {
        let engine = ReceivingEngine::new(0, |_op: RedoOp| -> RedoResult<()> { Ok(()) });
        RedoTarget::Replicated(ReplicatedTarget {
            engine: Arc::new(engine),
            manager: Arc::new(MemoryReplicationManager::new()),
            dispatcher: TaskDispatcher::new(runtime.handle().clone()),
        })
    }

    #[test]
    fn test_opens_file_writer_when_replication_disabled() {
        let temp_dir = TempDir::new().unwrap();
        let config = DurabilityConfig::in_dir(temp_dir.path());
        let writer =
            open_redo_writer(&config, RedoTarget::File, Arc::new(DurabilityMetrics::new()))
                .unwrap();

        writer
            .store(1, b"k", Some(b"v"), DurabilityMode::Sync)
            .unwrap();
        assert!(config.redo_dir.exists());
    }

    #[test]
    fn test_opens_replicated_writer_when_enabled() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config = DurabilityConfig {
            replication: ReplicationConfig::replicated(None),
            ..DurabilityConfig::in_dir(temp_dir.path())
        };

        let writer = open_redo_writer(
            &config,
            replicated_target(&runtime),
            Arc::new(DurabilityMetrics::new()),
        )
        .unwrap();

        // Replicas start unmodifiable.
        let err = writer
            .store(1, b"k", Some(b"v"), DurabilityMode::Sync)
            .unwrap_err();
        assert!(err.is_unmodifiable());
    }

    #[test]
    fn test_target_must_match_config() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let metrics = Arc::new(DurabilityMetrics::new());

        let config = DurabilityConfig::in_dir(temp_dir.path());
        let err = open_redo_writer(&config, replicated_target(&runtime), metrics.clone())
            .err()
            .unwrap();
        assert_eq!(err.code(), "REDO_CONFIG_INVALID");

        let config = DurabilityConfig {
            replication: ReplicationConfig::replicated(None),
            ..DurabilityConfig::in_dir(temp_dir.path())
        };
        let err = open_redo_writer(&config, RedoTarget::File, metrics).err().unwrap();
        assert_eq!(err.code(), "REDO_CONFIG_INVALID");
    }
}
