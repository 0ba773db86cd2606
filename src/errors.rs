use thiserror::Error;

use crate::txn::TxnId;

#[derive(Debug, Error)]
pub enum TxnKvError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("no active transaction")]
    NoActiveTransaction,

    #[error("transaction {0} already committed")]
    TransactionAlreadyCommitted(TxnId),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct StorageError(pub String);
