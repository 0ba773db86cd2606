mod api;
mod errors;
mod storage;
mod txn;

pub use crate::api::{Connection, ConnectionConfig, Session};
pub use crate::errors::{StorageError, TxnKvError};
pub use crate::storage::{CommitLog, CommitMark, DurableStore, LogEntry, Operation, OperationLog};
pub use crate::txn::{OverwritePolicy, RecoveryReport, RecoveryTxnTable, TransactionState, TxnId};

/// Key/value pairs the shell seeds on startup.
pub const INITIAL_DATA: [(&str, i64); 3] = [("A", 100), ("B", 200), ("C", 300)];
