//! Pool error types.

use crate::pool::PoolId;

/// Errors reported by the pool registry and individual pools.
///
/// Out-of-memory is deliberately absent: a failed system allocation aborts
/// the process.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// A pool was requested with a zero object size.
    #[error("pool `{label}`: object size must be greater than zero")]
    ZeroObjectSize {
        /// Label of the rejected pool.
        label: String,
    },

    /// The label is already registered with a different object size.
    #[error("pool `{label}` already exists with object size {existing}, requested {requested}")]
    LabelSizeConflict {
        /// Label shared by both requests.
        label: String,
        /// Object size of the registered pool.
        existing: usize,
        /// Object size of the rejected request.
        requested: usize,
    },

    /// A negative idle limit was supplied.
    #[error("idle limit must not be negative, got {0}")]
    NegativeIdleLimit(i64),

    /// A configuration value is out of range.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// The object belongs to a different pool.
    #[error("object from pool {found} freed into pool {expected}")]
    ForeignObject {
        /// Pool the object was freed into.
        expected: PoolId,
        /// Pool the object was allocated from.
        found: PoolId,
    },

    /// The object is not currently checked out.
    #[error("pool `{label}`: object freed twice")]
    DoubleFree {
        /// Label of the pool.
        label: String,
    },

    /// The object's chunk (or block) was already released.
    #[error("pool `{label}`: object refers to released memory")]
    StaleObject {
        /// Label of the pool.
        label: String,
    },

    /// The object reference points outside any chunk of the pool.
    #[error("pool `{label}`: object reference out of range")]
    InvalidSlot {
        /// Label of the pool.
        label: String,
    },
}
