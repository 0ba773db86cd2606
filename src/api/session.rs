use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::api::connection::Tables;
use crate::storage::Operation;
use crate::txn::{OverwritePolicy, RecoveryReport, TransactionState, TxnId};
use crate::TxnKvError;

/// A client's transaction context.
///
/// A session runs at most one transaction at a time and is the only owner of that
/// transaction's state: the active id and the buffer of uncommitted writes. Writes reach the
/// durable store only on [`Session::commit`]. Sessions opened from the same connection share
/// storage but are not isolated from each other.
pub struct Session {
    tables: Arc<Mutex<Tables>>,
    overwrite_policy: OverwritePolicy,
    state: TransactionState,
}

impl Session {
    pub(crate) fn new(tables: Arc<Mutex<Tables>>, overwrite_policy: OverwritePolicy) -> Self {
        Self {
            tables,
            overwrite_policy,
            state: TransactionState::new(),
        }
    }

    /// Begin transaction `txn_id`.
    ///
    /// A transaction that is still active is dropped along with its buffered writes; its
    /// operation log entries stay where they are. Ids that already committed are rejected.
    pub fn start_transaction(&mut self, txn_id: TxnId) -> Result<(), TxnKvError> {
        if self.tables.lock().commit_log.contains(txn_id) {
            return Err(TxnKvError::TransactionAlreadyCommitted(txn_id));
        }
        if let Some(previous) = self.state.begin(txn_id) {
            warn!(
                previous,
                txn_id, "superseding transaction that was never committed or aborted"
            );
        }
        debug!(txn_id, "transaction started");
        Ok(())
    }

    pub fn current_transaction(&self) -> Option<TxnId> {
        self.state.current()
    }

    /// Read `key`, seeing this transaction's own uncommitted writes first.
    ///
    /// Reads served from the write buffer are not logged. Reads that go to the durable store
    /// always append a `read` entry, including misses.
    pub fn read(&mut self, key: &str) -> Result<Option<i64>, TxnKvError> {
        let txn_id = self.state.active_id()?;
        if let Some(value) = self.state.cached(key) {
            debug!(txn_id, key, value, "read from write cache");
            return Ok(Some(value));
        }

        let mut tables = self.tables.lock();
        let value = tables.store.get(key);
        tables.op_log.append(txn_id, Operation::Read, key, value)?;
        debug!(txn_id, key, ?value, "read from durable store");
        Ok(value)
    }

    /// Like [`Session::read`], but an absent key is a [`TxnKvError::NotFound`] error.
    pub fn read_existing(&mut self, key: &str) -> Result<i64, TxnKvError> {
        self.read(key)?
            .ok_or_else(|| TxnKvError::NotFound(key.to_string()))
    }

    pub fn write(&mut self, key: &str, value: i64) -> Result<(), TxnKvError> {
        let txn_id = self.state.active_id()?;
        let mut tables = self.tables.lock();

        if self.state.is_cached(key) {
            match self.overwrite_policy {
                OverwritePolicy::ClearTransaction => {
                    let removed = tables.op_log.clear(Some(txn_id))?;
                    debug!(txn_id, key, removed, "cleared transaction log on overwrite");
                }
                OverwritePolicy::Upsert => {}
            }
        }

        self.state.cache_write(key, value);
        tables
            .op_log
            .append(txn_id, Operation::Write, key, Some(value))?;
        debug!(txn_id, key, value, "write buffered");
        Ok(())
    }

    /// Flush buffered writes to the durable store and mark the transaction committed.
    ///
    /// The operation log is cleared after the transaction state has been reset, so the clear
    /// runs with no transaction id and empties the whole log.
    pub fn commit(&mut self) -> Result<(), TxnKvError> {
        let txn_id = self.state.active_id()?;
        let mut tables = self.tables.lock();
        if tables.commit_log.contains(txn_id) {
            return Err(TxnKvError::TransactionAlreadyCommitted(txn_id));
        }

        for (key, value) in self.state.pending_writes() {
            tables.store.set(key, value)?;
        }
        tables.commit_log.append(txn_id)?;

        let written = self.state.pending_count();
        self.state.reset();
        let cleared = tables.op_log.clear(self.state.current())?;
        info!(txn_id, written, cleared, "transaction committed");
        Ok(())
    }

    /// Discard buffered writes and the transaction's operation log entries.
    pub fn abort(&mut self) -> Result<(), TxnKvError> {
        let txn_id = self.state.active_id()?;
        self.state.discard_writes();
        let cleared = self.tables.lock().op_log.clear(Some(txn_id))?;
        self.state.reset();
        info!(txn_id, cleared, "transaction aborted");
        Ok(())
    }

    /// Replay committed writes from the operation log into the durable store.
    ///
    /// Does not touch this session's transaction state.
    pub fn recover(&mut self) -> Result<RecoveryReport, TxnKvError> {
        self.tables.lock().recover()
    }
}
