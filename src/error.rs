//! Error types for the transaction layer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LockError>;

/// Errors surfaced by the lock manager and transaction manager.
///
/// Ordinary lock-acquisition failures (self-abort, wound, illegal upgrade) are
/// NOT represented here: the spec treats them as an expected `false` return
/// paired with an inspectable [`crate::txn::TransactionState`], not as an error
/// to propagate with `?`. This type exists for the one failure the manager
/// cannot express as a boolean: looking up a transaction id the registry
/// never saw.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("no transaction with id {0} in the transaction table")]
    UnknownTransaction(crate::common::TxnId),
}
