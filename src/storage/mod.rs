pub mod commit_log;
pub mod data_store;
pub(crate) mod log_file;
pub mod op_log;

pub use commit_log::{CommitLog, CommitMark};
pub use data_store::DurableStore;
pub use op_log::{LogEntry, Operation, OperationLog};
