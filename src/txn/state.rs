use std::collections::BTreeMap;

use crate::errors::TxnKvError;
use crate::txn::TxnId;

/// What a second write to the same key inside one transaction does to the operation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
    /// Clear every operation log entry of the current transaction before logging the new
    /// write. Entries for unrelated keys written earlier in the transaction go too.
    #[default]
    ClearTransaction,
    /// Leave the log alone; the new write entry replaces the old one through the
    /// `(transaction_id, operation, key)` upsert.
    Upsert,
}

/// In-memory state of the transaction a session is running.
///
/// `write_cache` is only non-empty while a transaction is active.
#[derive(Debug, Default)]
pub struct TransactionState {
    current: Option<TxnId>,
    write_cache: BTreeMap<String, i64>,
}

impl TransactionState {
    /// State with no active transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `txn_id`, discarding any cached writes. Returns the id of a transaction that was
    /// still active and is now superseded.
    pub fn begin(&mut self, txn_id: TxnId) -> Option<TxnId> {
        let superseded = self.current.replace(txn_id);
        self.write_cache.clear();
        superseded
    }

    /// Id of the active transaction, if any.
    pub fn current(&self) -> Option<TxnId> {
        self.current
    }

    /// Id of the active transaction, or `NoActiveTransaction`.
    pub fn active_id(&self) -> Result<TxnId, TxnKvError> {
        self.current.ok_or(TxnKvError::NoActiveTransaction)
    }

    /// Value this transaction wrote for `key`.
    pub fn cached(&self, key: &str) -> Option<i64> {
        self.write_cache.get(key).copied()
    }

    /// Whether this transaction already wrote `key`.
    pub fn is_cached(&self, key: &str) -> bool {
        self.write_cache.contains_key(key)
    }

    /// Buffer a write until commit. A later write to the same key replaces it.
    pub fn cache_write(&mut self, key: &str, value: i64) {
        self.write_cache.insert(key.to_string(), value);
    }

    /// Buffered writes, ordered by key.
    pub fn pending_writes(&self) -> impl Iterator<Item = (&str, i64)> + '_ {
        self.write_cache.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of distinct keys written.
    pub fn pending_count(&self) -> usize {
        self.write_cache.len()
    }

    /// Drop buffered writes but keep the transaction active.
    pub fn discard_writes(&mut self) {
        self.write_cache.clear();
    }

    /// Drop buffered writes and end the transaction.
    pub fn reset(&mut self) {
        self.write_cache.clear();
        self.current = None;
    }
}
