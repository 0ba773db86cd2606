use super::{OverwritePolicy, TransactionState};
use crate::errors::TxnKvError;

#[test]
fn new_state_has_no_transaction() {
    let state = TransactionState::new();
    assert_eq!(state.current(), None);
    assert!(matches!(
        state.active_id(),
        Err(TxnKvError::NoActiveTransaction)
    ));
}

#[test]
fn begin_discards_writes_of_superseded_transaction() {
    let mut state = TransactionState::new();
    assert_eq!(state.begin(1), None);
    state.cache_write("A", 1);

    assert_eq!(state.begin(2), Some(1));
    assert_eq!(state.current(), Some(2));
    assert_eq!(state.cached("A"), None);
    assert_eq!(state.pending_count(), 0);
}

#[test]
fn pending_writes_keep_last_value_in_key_order() {
    let mut state = TransactionState::new();
    state.begin(1);
    state.cache_write("b", 1);
    state.cache_write("a", 2);
    state.cache_write("b", 3);

    let writes: Vec<(&str, i64)> = state.pending_writes().collect();
    assert_eq!(writes, vec![("a", 2), ("b", 3)]);
    assert!(state.is_cached("a"));
}

#[test]
fn reset_clears_everything() {
    let mut state = TransactionState::new();
    state.begin(5);
    state.cache_write("A", 1);

    state.reset();

    assert_eq!(state.current(), None);
    assert_eq!(state.pending_count(), 0);
}

#[test]
fn overwrite_policy_defaults_to_transaction_clear() {
    assert_eq!(OverwritePolicy::default(), OverwritePolicy::ClearTransaction);
}
