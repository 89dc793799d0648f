//! Single-node file redo writer
//!
//! Redo goes to `redo.<log_id>` files in one directory. Every record is
//! followed by a CRC32 terminator. A checkpoint switch ends the current file
//! and starts the next one; the new log id is the checkpoint position, so
//! recovery replays that file and everything after it. Files older than the
//! checkpoint are deleted once the checkpoint is finished.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::crash_point::{maybe_crash, points};
use crate::durability::DurabilityMode;
use crate::observability::{log_event_with_fields, DurabilityMetrics, Event, ObservationScope};

use super::decoder::{read_log_file, record_checksum, RedoVisitor};
use super::errors::{RedoError, RedoResult};
use super::log::{RedoLog, RedoSink};
use super::writer::{CommitLock, RedoWriter};

const FILE_PREFIX: &str = "redo.";

/// Path of the redo file with the given id.
pub fn redo_file_path(dir: &Path, log_id: u64) -> PathBuf {
    dir.join(format!("{}{}", FILE_PREFIX, log_id))
}

/// Ids of all redo files in `dir`, ascending.
pub fn list_log_ids(dir: &Path) -> RedoResult<Vec<u64>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(RedoError::io(
                format!("failed to list redo directory {}", dir.display()),
                e,
            ))
        }
    };

    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| RedoError::io("failed to read redo directory entry", e))?;
        let name = entry.file_name();
        if let Some(id) = name
            .to_str()
            .and_then(|n| n.strip_prefix(FILE_PREFIX))
            .and_then(|n| n.parse::<u64>().ok())
        {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Outcome of a redo replay.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayStats {
    pub files: usize,
    pub records: usize,
    pub last_txn_id: u64,
    /// Bytes of a torn record at the end of the last file.
    pub torn_bytes: usize,
}

/// Replays every record of files `from_log_id` onwards, in order.
pub fn replay(dir: &Path, from_log_id: u64, visitor: &mut dyn RedoVisitor) -> RedoResult<ReplayStats> {
    let scope = ObservationScope::new("REDO_REPLAY");
    let mut stats = ReplayStats::default();

    for log_id in list_log_ids(dir)?.into_iter().filter(|id| *id >= from_log_id) {
        let contents = match read_log_file(&redo_file_path(dir, log_id)) {
            Ok(contents) => contents,
            Err(e) => {
                if e.is_fatal() {
                    let id = log_id.to_string();
                    let reason = e.to_string();
                    log_event_with_fields(
                        Event::RedoCorruption,
                        &[("log_id", id.as_str()), ("reason", reason.as_str())],
                    );
                    scope.fail_fatal(&reason);
                } else {
                    scope.fail(&e.to_string());
                }
                return Err(e);
            }
        };
        stats.files += 1;
        stats.records += contents.ops.len();
        stats.torn_bytes = contents.torn_bytes;
        if contents.last_txn_id != 0 {
            stats.last_txn_id = contents.last_txn_id;
        }
        for op in contents.ops {
            visitor.visit(op)?;
        }
    }

    let files = stats.files.to_string();
    let records = stats.records.to_string();
    scope.complete_with_fields(&[("files", files.as_str()), ("records", records.as_str())]);
    Ok(stats)
}

struct FileSink {
    dir: PathBuf,
    log_id: u64,
    file: Option<File>,
    written: u64,
    metrics: Arc<DurabilityMetrics>,
}

impl FileSink {
    fn open(dir: &Path, log_id: u64, metrics: Arc<DurabilityMetrics>) -> RedoResult<Self> {
        let file = Self::open_file(dir, log_id)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            log_id,
            file: Some(file),
            written: 0,
            metrics,
        })
    }

    fn open_file(dir: &Path, log_id: u64) -> RedoResult<File> {
        let path = redo_file_path(dir, log_id);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| RedoError::io(format!("failed to open redo file {}", path.display()), e))
    }

    fn file_mut(&mut self) -> RedoResult<&mut File> {
        self.file.as_mut().ok_or(RedoError::Closed { cause: None })
    }

    /// Switches to a new file. The current one must already be forced.
    fn rotate(&mut self, log_id: u64) -> RedoResult<()> {
        let file = Self::open_file(&self.dir, log_id)?;
        sync_dir(&self.dir)?;
        self.file = Some(file);
        self.log_id = log_id;
        self.written = 0;
        maybe_crash(points::REDO_AFTER_ROTATE);
        Ok(())
    }

    fn close(&mut self) {
        self.file = None;
    }
}

impl RedoSink for FileSink {
    fn write(&mut self, bytes: &[u8]) -> RedoResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let log_id = self.log_id;
        self.file_mut()?
            .write_all(bytes)
            .map_err(|e| RedoError::io(format!("failed to write redo file {}", log_id), e))?;
        self.written += bytes.len() as u64;
        self.metrics.add_redo_bytes(bytes.len() as u64);
        Ok(())
    }

    fn terminator(&self, record: &[u8]) -> Option<u32> {
        Some(record_checksum(record))
    }

    fn force(&mut self, metadata: bool) -> RedoResult<()> {
        let log_id = self.log_id;
        let file = self.file_mut()?;
        maybe_crash(points::REDO_BEFORE_SYNC);
        let result = if metadata {
            file.sync_all()
        } else {
            file.sync_data()
        };
        result.map_err(|e| RedoError::io(format!("failed to sync redo file {}", log_id), e))?;
        maybe_crash(points::REDO_AFTER_SYNC);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

fn sync_dir(dir: &Path) -> RedoResult<()> {
    // Directory fsync is not supported everywhere; failure to open is ignored.
    if let Ok(handle) = File::open(dir) {
        handle
            .sync_all()
            .map_err(|e| RedoError::io(format!("failed to sync directory {}", dir.display()), e))?;
    }
    Ok(())
}

struct FileState {
    log: RedoLog<FileSink>,
    checkpoint_pos: i64,
    checkpoint_txn_id: u64,
}

/// Redo writer for a single node.
pub struct FileRedoWriter {
    state: Mutex<FileState>,
    commit_lock: CommitLock,
    metrics: Arc<DurabilityMetrics>,
}

impl FileRedoWriter {
    /// Opens a writer in `dir`, creating it if needed.
    ///
    /// Existing files are kept for recovery; writing continues in a new file
    /// after the newest one. The last transaction id is recovered from the
    /// newest file.
    pub fn open(
        dir: &Path,
        buffer_capacity: usize,
        metrics: Arc<DurabilityMetrics>,
    ) -> RedoResult<Self> {
        fs::create_dir_all(dir).map_err(|e| {
            RedoError::io(format!("failed to create redo directory {}", dir.display()), e)
        })?;

        let ids = list_log_ids(dir)?;
        let (log_id, last_txn_id) = match ids.last() {
            Some(&newest) => {
                let contents = read_log_file(&redo_file_path(dir, newest))?;
                (newest + 1, contents.last_txn_id)
            }
            None => (0, 0),
        };
        let oldest = ids.first().copied().unwrap_or(log_id);

        let sink = FileSink::open(dir, log_id, Arc::clone(&metrics))?;
        sync_dir(dir)?;
        let mut log = RedoLog::new(sink, buffer_capacity);
        if last_txn_id != 0 {
            log.clear_and_reset(last_txn_id)?;
        }

        let dir_name = dir.display().to_string();
        let log_id_str = log_id.to_string();
        log_event_with_fields(
            Event::RedoOpened,
            &[("dir", dir_name.as_str()), ("log_id", log_id_str.as_str())],
        );

        Ok(Self {
            state: Mutex::new(FileState {
                log,
                checkpoint_pos: oldest as i64,
                checkpoint_txn_id: 0,
            }),
            commit_lock: CommitLock::new(()),
            metrics,
        })
    }

    /// Id of the file currently written.
    pub fn current_log_id(&self) -> u64 {
        self.state.lock().log.sink().log_id
    }

    /// Directory holding the redo files.
    pub fn dir(&self) -> PathBuf {
        self.state.lock().log.sink().dir.clone()
    }
}

impl RedoWriter for FileRedoWriter {
    fn store_no_lock(
        &self,
        index_id: u64,
        key: &[u8],
        value: Option<&[u8]>,
        mode: DurabilityMode,
    ) -> RedoResult<()> {
        self.state.lock().log.store(index_id, key, value, mode)?;
        self.metrics.increment_commits();
        Ok(())
    }

    fn txn_commit_final(&self, txn_id: u64, mode: DurabilityMode) -> RedoResult<bool> {
        let sync = self.state.lock().log.txn_commit_final(txn_id, mode)?;
        self.metrics.increment_commits();
        Ok(sync)
    }

    fn force(&self, metadata: bool) -> RedoResult<()> {
        self.state.lock().log.sync(metadata)
    }

    fn force_and_close(&self) -> RedoResult<()> {
        let mut state = self.state.lock();
        if !state.log.sink().is_open() {
            return Ok(());
        }
        let result = state.log.sync(true);
        state.log.sink_mut().close();
        result
    }

    fn shutdown(&self) -> RedoResult<()> {
        self.state.lock().log.shutdown()?;
        let log_id = self.current_log_id().to_string();
        log_event_with_fields(Event::RedoShutdown, &[("log_id", log_id.as_str())]);
        Ok(())
    }

    fn close(&self, cause: Option<&str>) -> RedoResult<()> {
        let closed = self.state.lock().log.close(cause);
        let forced = self.force_and_close();
        log_event_with_fields(Event::RedoClosed, &[("cause", cause.unwrap_or("none"))]);
        closed.and(forced)
    }

    fn should_checkpoint(&self, size_threshold: u64) -> bool {
        self.state.lock().log.sink().written >= size_threshold
    }

    fn checkpoint_prepare(&self) -> RedoResult<()> {
        Ok(())
    }

    fn checkpoint_switch(&self) -> RedoResult<()> {
        let mut state = self.state.lock();
        state.log.end_file()?;
        state.log.sink_mut().force(true)?;

        let next = state.log.sink().log_id + 1;
        state.log.sink_mut().rotate(next)?;
        state.checkpoint_pos = next as i64;
        state.checkpoint_txn_id = state.log.last_transaction_id();

        let log_id = next.to_string();
        log_event_with_fields(Event::RedoRotated, &[("log_id", log_id.as_str())]);
        Ok(())
    }

    fn checkpoint_started(&self) -> RedoResult<()> {
        Ok(())
    }

    fn checkpoint_finished(&self) -> RedoResult<()> {
        let (dir, checkpoint_pos) = {
            let state = self.state.lock();
            (state.log.sink().dir.clone(), state.checkpoint_pos)
        };

        for log_id in list_log_ids(&dir)? {
            if (log_id as i64) >= checkpoint_pos {
                break;
            }
            let path = redo_file_path(&dir, log_id);
            fs::remove_file(&path).map_err(|e| {
                RedoError::io(format!("failed to delete redo file {}", path.display()), e)
            })?;
        }
        sync_dir(&dir)
    }

    fn checkpoint_position(&self) -> i64 {
        self.state.lock().checkpoint_pos
    }

    fn checkpoint_transaction_id(&self) -> u64 {
        self.state.lock().checkpoint_txn_id
    }

    fn last_transaction_id(&self) -> u64 {
        self.state.lock().log.last_transaction_id()
    }

    fn commit_lock(&self) -> &CommitLock {
        &self.commit_lock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redo::RedoOp;
    use tempfile::TempDir;

    fn open(dir: &Path) -> FileRedoWriter {
        FileRedoWriter::open(dir, 4096, Arc::new(DurabilityMetrics::new())).unwrap()
    }

    fn replay_all(dir: &Path, from: u64) -> (Vec<RedoOp>, ReplayStats) {
        let mut ops = Vec::new();
        let stats = replay(dir, from, &mut |op: RedoOp| -> RedoResult<()> {
            ops.push(op);
            Ok(())
        })
        .unwrap();
        (ops, stats)
    }

    #[test]
    fn test_sync_store_is_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let writer = open(temp_dir.path());
        writer
            .store(5, b"key", Some(b"value"), DurabilityMode::Sync)
            .unwrap();

        let (ops, stats) = replay_all(temp_dir.path(), 0);
        assert_eq!(stats.files, 1);
        assert_eq!(
            ops,
            vec![RedoOp::Store {
                index_id: 5,
                key: b"key".to_vec(),
                value: Some(b"value".to_vec()),
            }]
        );
    }

    #[test]
    fn test_no_flush_stays_buffered() {
        let temp_dir = TempDir::new().unwrap();
        let writer = open(temp_dir.path());
        writer
            .store(1, b"k", Some(b"v"), DurabilityMode::NoFlush)
            .unwrap();
        assert!(replay_all(temp_dir.path(), 0).0.is_empty());

        writer.force(false).unwrap();
        assert_eq!(replay_all(temp_dir.path(), 0).0.len(), 1);
    }

    #[test]
    fn test_sync_commit_requests_follow_up_sync() {
        let temp_dir = TempDir::new().unwrap();
        let writer = open(temp_dir.path());
        {
            let _shared = writer.commit_lock().read();
            assert!(writer.txn_commit_final(9, DurabilityMode::Sync).unwrap());
        }
        writer.txn_commit_sync().unwrap();
        assert_eq!(writer.last_transaction_id(), 9);
        assert_eq!(replay_all(temp_dir.path(), 0).1.last_txn_id, 9);
    }

    #[test]
    fn test_checkpoint_rotates_and_deletes_old_files() {
        let temp_dir = TempDir::new().unwrap();
        let writer = open(temp_dir.path());
        writer
            .store(1, b"a", Some(b"1"), DurabilityMode::Sync)
            .unwrap();
        writer.txn_commit_final(3, DurabilityMode::NoSync).unwrap();

        writer.checkpoint_prepare().unwrap();
        {
            let _exclusive = writer.commit_lock().write();
            writer.checkpoint_switch().unwrap();
        }
        writer.checkpoint_started().unwrap();
        assert_eq!(writer.checkpoint_position(), 1);
        assert_eq!(writer.checkpoint_transaction_id(), 3);
        assert_eq!(list_log_ids(temp_dir.path()).unwrap(), vec![0, 1]);

        writer
            .store(1, b"b", Some(b"2"), DurabilityMode::Sync)
            .unwrap();
        writer.checkpoint_finished().unwrap();
        assert_eq!(list_log_ids(temp_dir.path()).unwrap(), vec![1]);

        let (ops, _) = replay_all(temp_dir.path(), writer.checkpoint_position() as u64);
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn test_should_checkpoint_tracks_current_file() {
        let temp_dir = TempDir::new().unwrap();
        let writer = open(temp_dir.path());
        assert!(!writer.should_checkpoint(1));

        writer
            .store(1, b"k", Some(b"v"), DurabilityMode::NoSync)
            .unwrap();
        assert!(writer.should_checkpoint(1));
        // One store record plus its terminator.
        assert!(writer.should_checkpoint(23));
        assert!(!writer.should_checkpoint(24));

        writer.checkpoint_switch().unwrap();
        assert!(!writer.should_checkpoint(1));
    }

    #[test]
    fn test_reopen_continues_in_new_file() {
        let temp_dir = TempDir::new().unwrap();
        {
            let writer = open(temp_dir.path());
            writer.txn_commit_final(17, DurabilityMode::NoSync).unwrap();
            writer.shutdown().unwrap();
        }

        let writer = open(temp_dir.path());
        assert_eq!(writer.current_log_id(), 1);
        assert_eq!(writer.last_transaction_id(), 17);
        assert_eq!(writer.checkpoint_position(), 0);
    }

    #[test]
    fn test_close_writes_marker_and_rejects_later_writes() {
        let temp_dir = TempDir::new().unwrap();
        let writer = open(temp_dir.path());
        writer.close(Some("test")).unwrap();

        let (ops, _) = replay_all(temp_dir.path(), 0);
        assert!(matches!(ops.last(), Some(RedoOp::Close { .. })));

        let err = writer
            .store(1, b"k", None, DurabilityMode::Sync)
            .unwrap_err();
        assert_eq!(err.code(), "REDO_CLOSED");
        assert!(writer.close(None).is_ok());
    }

    #[test]
    fn test_replay_skips_older_files() {
        let temp_dir = TempDir::new().unwrap();
        let writer = open(temp_dir.path());
        writer
            .store(1, b"old", None, DurabilityMode::NoSync)
            .unwrap();
        writer.checkpoint_switch().unwrap();
        writer
            .store(1, b"new", None, DurabilityMode::NoSync)
            .unwrap();

        let (ops, stats) = replay_all(temp_dir.path(), 1);
        assert_eq!(stats.files, 1);
        assert_eq!(
            ops,
            vec![RedoOp::Store {
                index_id: 1,
                key: b"new".to_vec(),
                value: None,
            }]
        );
    }

    #[test]
    fn test_metrics_count_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let metrics = Arc::new(DurabilityMetrics::new());
        let writer = FileRedoWriter::open(temp_dir.path(), 4096, Arc::clone(&metrics)).unwrap();
        writer
            .store(1, b"k", Some(b"v"), DurabilityMode::NoSync)
            .unwrap();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.redo_bytes, 23);
        assert_eq!(snapshot.commits, 1);
    }
}
