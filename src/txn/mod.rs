//! Transaction layer: identity and lifecycle, the lock manager, and the
//! transaction manager that ties id allocation and commit/abort together.

pub mod lock_manager;
pub mod transaction;
pub mod transaction_manager;

pub use lock_manager::{LockManager, LockMode};
pub use transaction::{Transaction, TransactionState};
pub use transaction_manager::{TransactionManager, TransactionTable};
