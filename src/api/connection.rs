use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::api::session::Session;
use crate::storage::{CommitLog, CommitMark, DurableStore, LogEntry, OperationLog};
use crate::txn::{recover, OverwritePolicy, RecoveryReport};
use crate::TxnKvError;

pub struct ConnectionConfig {
    /// fsync the durable store and both logs on every write.
    pub sync_every_write: bool,
    /// Run recovery before the connection is handed out.
    pub recover_on_open: bool,
    pub overwrite_policy: OverwritePolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            sync_every_write: true,
            recover_on_open: false,
            overwrite_policy: OverwritePolicy::ClearTransaction,
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sync_every_write(mut self, enabled: bool) -> Self {
        self.sync_every_write = enabled;
        self
    }

    pub fn recover_on_open(mut self, enabled: bool) -> Self {
        self.recover_on_open = enabled;
        self
    }

    pub fn overwrite_policy(mut self, policy: OverwritePolicy) -> Self {
        self.overwrite_policy = policy;
        self
    }
}

/// The three durable components, always locked together.
#[derive(Debug)]
pub(crate) struct Tables {
    pub store: DurableStore,
    pub op_log: OperationLog,
    pub commit_log: CommitLog,
}

impl Tables {
    fn open(base_path: &Path, sync_every_write: bool) -> Result<Self, TxnKvError> {
        Ok(Self {
            store: DurableStore::open(base_path, sync_every_write)?,
            op_log: OperationLog::open(base_path, sync_every_write)?,
            commit_log: CommitLog::open(base_path, sync_every_write)?,
        })
    }

    pub fn recover(&mut self) -> Result<RecoveryReport, TxnKvError> {
        recover(&mut self.store, &self.op_log, &self.commit_log)
    }
}

/// An open database directory.
///
/// The connection owns the durable store, the operation log and the commit log behind one
/// mutex. Transactions run in [`Session`]s opened from it.
pub struct Connection {
    base_path: PathBuf,
    tables: Arc<Mutex<Tables>>,
    overwrite_policy: OverwritePolicy,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("base_path", &self.base_path)
            .field("overwrite_policy", &self.overwrite_policy)
            .finish()
    }
}

impl Connection {
    pub fn open<P>(path: P, config: ConnectionConfig) -> Result<Self, TxnKvError>
    where
        P: AsRef<Path>,
    {
        let base_path = path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;

        let mut tables = Tables::open(&base_path, config.sync_every_write)?;
        if config.recover_on_open {
            tables.recover()?;
        }
        info!(path = %base_path.display(), keys = tables.store.key_count(), "opened database");

        Ok(Self {
            base_path,
            tables: Arc::new(Mutex::new(tables)),
            overwrite_policy: config.overwrite_policy,
        })
    }

    pub fn open_session(&self) -> Session {
        Session::new(self.tables.clone(), self.overwrite_policy)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Replay committed writes from the operation log into the durable store.
    pub fn recover(&self) -> Result<RecoveryReport, TxnKvError> {
        self.tables.lock().recover()
    }

    /// Operation log contents, for display.
    pub fn get_log(&self) -> Vec<LogEntry> {
        self.tables.lock().op_log.scan()
    }

    /// Commit marks in commit order, for display.
    pub fn get_commit_log(&self) -> Vec<CommitMark> {
        self.tables.lock().commit_log.marks().to_vec()
    }

    /// Committed key/value pairs sorted by key.
    pub fn get_data(&self) -> Vec<(String, i64)> {
        self.tables.lock().store.snapshot()
    }

    /// Read committed state directly, outside any transaction and without logging.
    pub fn get(&self, key: &str) -> Option<i64> {
        self.tables.lock().store.get(key)
    }

    /// Upsert bootstrap values straight into the durable store.
    pub fn seed<I, K>(&self, pairs: I) -> Result<(), TxnKvError>
    where
        I: IntoIterator<Item = (K, i64)>,
        K: AsRef<str>,
    {
        let mut tables = self.tables.lock();
        for (key, value) in pairs {
            tables.store.set(key.as_ref(), value)?;
        }
        Ok(())
    }

    /// Checkpointing is not implemented; the request is accepted and nothing changes.
    pub fn checkpoint(&self) -> Result<(), TxnKvError> {
        info!(path = %self.base_path.display(), "checkpoint requested; nothing to do");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn config_builder_overrides_defaults() {
        let config = ConnectionConfig::new()
            .sync_every_write(false)
            .recover_on_open(true)
            .overwrite_policy(OverwritePolicy::Upsert);

        assert!(!config.sync_every_write);
        assert!(config.recover_on_open);
        assert_eq!(config.overwrite_policy, OverwritePolicy::Upsert);
    }

    #[test]
    fn open_creates_database_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");

        let conn = Connection::open(&path, ConnectionConfig::default()).unwrap();

        assert_eq!(conn.base_path(), path.as_path());
        assert!(OperationLog::path_for_db(&path).exists());
        assert!(CommitLog::path_for_db(&path).exists());
        assert!(DurableStore::path_for_db(&path).exists());
    }

    #[test]
    fn seed_and_checkpoint_leave_logs_untouched() {
        let dir = tempdir().unwrap();
        let conn = Connection::open(dir.path(), ConnectionConfig::default()).unwrap();

        conn.seed([("A", 100), ("B", 200), ("C", 300)]).unwrap();
        conn.checkpoint().unwrap();

        assert_eq!(conn.get("B"), Some(200));
        assert_eq!(conn.get_data().len(), 3);
        assert!(conn.get_log().is_empty());
        assert!(conn.get_commit_log().is_empty());
    }
}
