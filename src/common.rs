//! Identifier types shared across the transaction layer.

/// Identifier of a lockable record. Opaque beyond equality and use as a map key.
pub type Rid = u64;

/// Identifier of a transaction. Monotonically increasing; lower value means older.
///
/// Signed so that [`INVALID_TXN_ID`] can be a value no real transaction ever takes.
pub type TxnId = i64;

/// Sentinel meaning "no transaction". Used for `LockRequestQueue::upgrading`.
pub const INVALID_TXN_ID: TxnId = -1;
