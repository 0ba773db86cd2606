//! Crash recovery.
//!
//! Recovery replays the `write` entries of committed transactions from the operation log into
//! the durable store. A transaction counts as committed only if the commit log holds a mark for
//! it; everything else (aborted, superseded, or cut short by a crash) is presumed aborted and
//! skipped.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::errors::TxnKvError;
use crate::storage::{CommitLog, DurableStore, LogEntry, Operation, OperationLog};
use crate::txn::TxnId;

/// Transaction table built from the commit log and the operation log during recovery.
#[derive(Debug, Clone, Default)]
pub struct RecoveryTxnTable {
    committed: HashSet<TxnId>,
    /// Transactions with log entries but no commit mark.
    pending: HashSet<TxnId>,
}

impl RecoveryTxnTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_committed(&mut self, txn_id: TxnId) {
        self.pending.remove(&txn_id);
        self.committed.insert(txn_id);
    }

    pub fn process_entry(&mut self, entry: &LogEntry) {
        if !self.committed.contains(&entry.transaction_id) {
            self.pending.insert(entry.transaction_id);
        }
    }

    pub fn is_committed(&self, txn_id: TxnId) -> bool {
        self.committed.contains(&txn_id)
    }

    /// Only writes of committed transactions are replayed; reads are audit records.
    pub fn should_apply(&self, entry: &LogEntry) -> bool {
        entry.operation == Operation::Write && self.is_committed(entry.transaction_id)
    }

    pub fn committed_count(&self) -> usize {
        self.committed.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Outcome of a recovery pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveryReport {
    pub committed_transactions: usize,
    pub uncommitted_transactions: usize,
    pub replayed_writes: usize,
    pub skipped_entries: usize,
}

/// Replay committed writes from `op_log` into `store`.
///
/// Running this again against the same logs produces the same store contents. Transactions are
/// replayed in commit order, so when two committed transactions wrote the same key the one that
/// committed last wins.
pub fn recover(
    store: &mut DurableStore,
    op_log: &OperationLog,
    commit_log: &CommitLog,
) -> Result<RecoveryReport, TxnKvError> {
    let mut table = RecoveryTxnTable::new();
    for mark in commit_log.marks() {
        table.mark_committed(mark.transaction_id);
    }
    let entries = op_log.scan();
    for entry in &entries {
        table.process_entry(entry);
    }

    let mut report = RecoveryReport {
        committed_transactions: table.committed_count(),
        uncommitted_transactions: table.pending_count(),
        ..RecoveryReport::default()
    };

    let mut writes_by_txn: HashMap<TxnId, Vec<LogEntry>> = HashMap::new();
    for entry in entries {
        if !table.should_apply(&entry) {
            report.skipped_entries += 1;
            continue;
        }
        writes_by_txn
            .entry(entry.transaction_id)
            .or_default()
            .push(entry);
    }

    for mark in commit_log.marks() {
        let Some(writes) = writes_by_txn.remove(&mark.transaction_id) else {
            continue;
        };
        for entry in writes {
            let Some(value) = entry.value else {
                warn!(
                    transaction_id = entry.transaction_id,
                    key = %entry.key,
                    "skipping committed write entry without a value"
                );
                report.skipped_entries += 1;
                continue;
            };
            debug!(transaction_id = entry.transaction_id, key = %entry.key, value, "replaying write");
            store.set(&entry.key, value)?;
            report.replayed_writes += 1;
        }
    }

    info!(
        committed = report.committed_transactions,
        uncommitted = report.uncommitted_transactions,
        replayed = report.replayed_writes,
        skipped = report.skipped_entries,
        "recovery complete"
    );
    Ok(report)
}
