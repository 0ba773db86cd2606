use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{StorageError, TxnKvError};
use crate::storage::log_file::LogFile;
use crate::txn::TxnId;

pub const COMMIT_LOG_FILE_NAME: &str = "commit.log";
const COMMIT_LOG_MAGIC: &[u8; 8] = b"TKVCML1\0";

const RECORD_COMMIT: u8 = 1;

/// Marks that a transaction reached its commit point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMark {
    pub transaction_id: TxnId,
}

/// Append-only record of committed transaction ids.
#[derive(Debug)]
pub struct CommitLog {
    file: LogFile,
    marks: Vec<CommitMark>,
    committed: HashSet<TxnId>,
}

impl CommitLog {
    pub fn path_for_db<P: AsRef<Path>>(db_dir: P) -> PathBuf {
        db_dir.as_ref().join(COMMIT_LOG_FILE_NAME)
    }

    pub fn open<P: AsRef<Path>>(db_dir: P, sync_every_write: bool) -> Result<Self, TxnKvError> {
        let (file, records) =
            LogFile::open_or_create(Self::path_for_db(db_dir), COMMIT_LOG_MAGIC, sync_every_write)?;

        let mut log = Self {
            file,
            marks: Vec::with_capacity(records.len()),
            committed: HashSet::with_capacity(records.len()),
        };

        for record in records {
            if record.record_type != RECORD_COMMIT {
                return Err(StorageError(format!(
                    "invalid commit log record type: {}",
                    record.record_type
                ))
                .into());
            }
            let transaction_id =
                Cursor::new(record.payload.as_slice()).read_u64::<LittleEndian>()?;
            if !log.committed.insert(transaction_id) {
                warn!(transaction_id, "ignoring duplicate commit mark");
                continue;
            }
            log.marks.push(CommitMark { transaction_id });
        }

        Ok(log)
    }

    /// Durably mark `transaction_id` as committed. Each id can be committed once.
    pub fn append(&mut self, transaction_id: TxnId) -> Result<(), TxnKvError> {
        if self.committed.contains(&transaction_id) {
            return Err(TxnKvError::TransactionAlreadyCommitted(transaction_id));
        }
        self.file
            .append(RECORD_COMMIT, &transaction_id.to_le_bytes())?;
        self.committed.insert(transaction_id);
        self.marks.push(CommitMark { transaction_id });
        Ok(())
    }

    /// Whether `transaction_id` has a commit mark.
    pub fn contains(&self, transaction_id: TxnId) -> bool {
        self.committed.contains(&transaction_id)
    }

    /// The set of committed transaction ids, for membership checks without regard to order.
    pub fn scan(&self) -> HashSet<TxnId> {
        self.committed.clone()
    }

    /// Commit marks in the order they were appended.
    pub fn marks(&self) -> &[CommitMark] {
        &self.marks
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn marks_persist_in_append_order() {
        let dir = tempdir().unwrap();

        {
            let mut log = CommitLog::open(dir.path(), true).unwrap();
            log.append(7).unwrap();
            log.append(3).unwrap();
        }

        let log = CommitLog::open(dir.path(), true).unwrap();
        assert_eq!(
            log.marks(),
            &[
                CommitMark { transaction_id: 7 },
                CommitMark { transaction_id: 3 }
            ]
        );
        assert!(log.contains(7));
        assert!(!log.contains(4));
        assert_eq!(log.scan(), HashSet::from([3, 7]));
    }

    #[test]
    fn duplicate_commit_is_rejected() {
        let dir = tempdir().unwrap();
        let mut log = CommitLog::open(dir.path(), true).unwrap();

        log.append(1).unwrap();
        let err = log.append(1).unwrap_err();

        assert!(matches!(err, TxnKvError::TransactionAlreadyCommitted(1)));
        assert_eq!(log.marks().len(), 1);
    }

    #[test]
    fn missing_file_is_an_empty_log() {
        let dir = tempdir().unwrap();
        let log = CommitLog::open(dir.path().join("fresh"), true).unwrap();
        assert!(log.scan().is_empty());
        assert!(log.marks().is_empty());
    }
}
