//! The operation log: an audit and replay trail of every read and write issued inside a
//! transaction.
//!
//! Entries are keyed by `(transaction_id, operation, key)`; appending an entry whose key already
//! exists replaces the previous one. On disk the log is a sequence of entry and clear records
//! that is replayed on open to rebuild the current set of entries.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{StorageError, TxnKvError};
use crate::storage::log_file::{read_string, write_string, LogFile, RawRecord};
use crate::txn::TxnId;

pub const OPERATION_LOG_FILE_NAME: &str = "operation.log";
const OPERATION_LOG_MAGIC: &[u8; 8] = b"TKVOPL1\0";

const RECORD_ENTRY: u8 = 1;
const RECORD_CLEAR_TXN: u8 = 2;

/// Kind of access recorded in the operation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Write,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Write => "write",
        }
    }

    fn code(self) -> u8 {
        match self {
            Operation::Read => 1,
            Operation::Write => 2,
        }
    }
}

impl TryFrom<u8> for Operation {
    type Error = TxnKvError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Operation::Read),
            2 => Ok(Operation::Write),
            _ => Err(StorageError(format!("invalid operation code: {value}")).into()),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One operation log entry. `value` is `None` when a read found nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub transaction_id: TxnId,
    pub operation: Operation,
    pub key: String,
    pub value: Option<i64>,
}

impl LogEntry {
    fn encode(&self) -> Result<Vec<u8>, TxnKvError> {
        let mut buf = Vec::new();
        buf.write_u64::<LittleEndian>(self.transaction_id)?;
        buf.write_u8(self.operation.code())?;
        match self.value {
            Some(value) => {
                buf.write_u8(1)?;
                buf.write_i64::<LittleEndian>(value)?;
            }
            None => buf.write_u8(0)?,
        }
        write_string(&mut buf, &self.key)?;
        Ok(buf)
    }

    fn decode(payload: &[u8]) -> Result<Self, TxnKvError> {
        let mut cursor = Cursor::new(payload);
        let transaction_id = cursor.read_u64::<LittleEndian>()?;
        let operation = Operation::try_from(cursor.read_u8()?)?;
        let value = match cursor.read_u8()? {
            0 => None,
            1 => Some(cursor.read_i64::<LittleEndian>()?),
            flag => return Err(StorageError(format!("invalid value flag: {flag}")).into()),
        };
        let key = read_string(&mut cursor)?;
        Ok(Self {
            transaction_id,
            operation,
            key,
            value,
        })
    }
}

type EntryKey = (TxnId, Operation, String);

#[derive(Debug)]
pub struct OperationLog {
    file: LogFile,
    entries: BTreeMap<EntryKey, Option<i64>>,
}

impl OperationLog {
    pub fn path_for_db<P: AsRef<Path>>(db_dir: P) -> PathBuf {
        db_dir.as_ref().join(OPERATION_LOG_FILE_NAME)
    }

    pub fn open<P: AsRef<Path>>(db_dir: P, sync_every_write: bool) -> Result<Self, TxnKvError> {
        let (file, records) = LogFile::open_or_create(
            Self::path_for_db(db_dir),
            OPERATION_LOG_MAGIC,
            sync_every_write,
        )?;

        let mut log = Self {
            file,
            entries: BTreeMap::new(),
        };
        for record in records {
            log.apply_record(record)?;
        }
        Ok(log)
    }

    fn apply_record(&mut self, record: RawRecord) -> Result<(), TxnKvError> {
        match record.record_type {
            RECORD_ENTRY => {
                let entry = LogEntry::decode(&record.payload)?;
                self.entries
                    .insert((entry.transaction_id, entry.operation, entry.key), entry.value);
            }
            RECORD_CLEAR_TXN => {
                let txn_id = Cursor::new(record.payload.as_slice()).read_u64::<LittleEndian>()?;
                self.remove_txn(txn_id);
            }
            other => {
                return Err(
                    StorageError(format!("invalid operation log record type: {other}")).into(),
                )
            }
        }
        Ok(())
    }

    /// Record an operation, replacing any entry with the same `(transaction_id, operation, key)`.
    pub fn append(
        &mut self,
        transaction_id: TxnId,
        operation: Operation,
        key: &str,
        value: Option<i64>,
    ) -> Result<(), TxnKvError> {
        let entry = LogEntry {
            transaction_id,
            operation,
            key: key.to_string(),
            value,
        };
        self.file.append(RECORD_ENTRY, &entry.encode()?)?;
        self.entries
            .insert((transaction_id, operation, entry.key), value);
        Ok(())
    }

    /// All entries, ordered by transaction id, then operation, then key.
    pub fn scan(&self) -> Vec<LogEntry> {
        self.entries
            .iter()
            .map(|((transaction_id, operation, key), value)| LogEntry {
                transaction_id: *transaction_id,
                operation: *operation,
                key: key.clone(),
                value: *value,
            })
            .collect()
    }

    /// Remove the entries of `transaction_id`, or every entry when it is `None`.
    /// Returns how many entries were removed.
    pub fn clear(&mut self, transaction_id: Option<TxnId>) -> Result<usize, TxnKvError> {
        let removed = match transaction_id {
            Some(txn_id) => {
                self.file
                    .append(RECORD_CLEAR_TXN, &txn_id.to_le_bytes())?;
                self.remove_txn(txn_id)
            }
            None => {
                self.file.truncate()?;
                let removed = self.entries.len();
                self.entries.clear();
                removed
            }
        };
        debug!(
            path = %self.file.path().display(),
            ?transaction_id,
            removed,
            "cleared operation log"
        );
        Ok(removed)
    }

    fn remove_txn(&mut self, txn_id: TxnId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(id, _, _), _| *id != txn_id);
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn same_triple_overwrites() {
        let dir = tempdir().unwrap();
        let mut log = OperationLog::open(dir.path(), true).unwrap();

        log.append(1, Operation::Write, "A", Some(1)).unwrap();
        log.append(1, Operation::Write, "A", Some(2)).unwrap();
        log.append(1, Operation::Read, "A", Some(100)).unwrap();

        let entries = log.scan();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].operation, Operation::Read);
        assert_eq!(entries[1].operation, Operation::Write);
        assert_eq!(entries[1].value, Some(2));
    }

    #[test]
    fn read_miss_records_absent_value() {
        let dir = tempdir().unwrap();
        let mut log = OperationLog::open(dir.path(), true).unwrap();

        log.append(3, Operation::Read, "missing", None).unwrap();

        assert_eq!(
            log.scan(),
            vec![LogEntry {
                transaction_id: 3,
                operation: Operation::Read,
                key: "missing".to_string(),
                value: None,
            }]
        );
    }

    #[test]
    fn clear_by_transaction_survives_reopen() {
        let dir = tempdir().unwrap();

        {
            let mut log = OperationLog::open(dir.path(), true).unwrap();
            log.append(1, Operation::Write, "A", Some(1)).unwrap();
            log.append(1, Operation::Read, "B", Some(200)).unwrap();
            log.append(2, Operation::Write, "C", Some(3)).unwrap();
            assert_eq!(log.clear(Some(1)).unwrap(), 2);
            log.append(1, Operation::Write, "D", Some(4)).unwrap();
        }

        let log = OperationLog::open(dir.path(), true).unwrap();
        let keys: Vec<(TxnId, String)> = log
            .scan()
            .into_iter()
            .map(|e| (e.transaction_id, e.key))
            .collect();
        assert_eq!(keys, vec![(1, "D".to_string()), (2, "C".to_string())]);
    }

    #[test]
    fn clear_all_empties_log_on_disk() {
        let dir = tempdir().unwrap();

        {
            let mut log = OperationLog::open(dir.path(), true).unwrap();
            log.append(1, Operation::Write, "A", Some(1)).unwrap();
            log.append(2, Operation::Write, "B", Some(2)).unwrap();
            assert_eq!(log.clear(None).unwrap(), 2);
            assert!(log.scan().is_empty());
        }

        let log = OperationLog::open(dir.path(), true).unwrap();
        assert!(log.scan().is_empty());
    }

    #[test]
    fn entry_encoding_keeps_negative_values() {
        let entry = LogEntry {
            transaction_id: u64::MAX,
            operation: Operation::Write,
            key: "ключ".to_string(),
            value: Some(-42),
        };
        let decoded = LogEntry::decode(&entry.encode().unwrap()).unwrap();
        assert_eq!(decoded, entry);
    }
}
