pub mod recovery;
pub mod state;

pub use recovery::{recover, RecoveryReport, RecoveryTxnTable};
pub use state::{OverwritePolicy, TransactionState};

/// Caller-supplied transaction identifier.
pub type TxnId = u64;

#[cfg(test)]
mod tests;
