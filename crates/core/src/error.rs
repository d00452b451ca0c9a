//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Reconciliation failure.
///
/// One taxonomy for the whole pipeline: deterministic validation and
/// invariant failures are surfaced before any write, while the transient
/// pair ([`ConcurrencyConflict`](Self::ConcurrencyConflict),
/// [`StorageUnavailable`](Self::StorageUnavailable)) may be retried with the
/// original inputs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// The referenced order item does not exist.
    #[error("order item not found")]
    OrderItemNotFound,

    /// The referenced delivery item does not exist.
    #[error("delivery item not found")]
    DeliveryItemNotFound,

    /// A delivery asked for more than the order item has left.
    #[error("cannot deliver {delivered}: only {remaining} remaining")]
    InsufficientRemainingQuantity { delivered: i64, remaining: i64 },

    /// The adjustment would drive the remaining quantity below zero.
    #[error("adjustment would drive remaining quantity to {would_be}")]
    WouldUnderflow { would_be: i64 },

    /// The adjustment would push the remaining quantity above the requested
    /// quantity.
    #[error("adjustment would push remaining quantity to {would_be}, above requested {requested}")]
    WouldExceedRequested { would_be: i64, requested: i64 },

    /// An attempt to set the remaining quantity from outside the
    /// reconciliation engine.
    #[error("remaining quantity can only be written by the reconciliation engine")]
    DirectMutationForbidden,

    /// The delivery ledger itself is inconsistent; recovery cannot produce an
    /// in-bounds remaining quantity.
    #[error("recalculation violates quantity bounds: {0}")]
    RecalculationInvariantViolation(String),

    /// A concurrent adjustment won the race on the same order item (transient).
    #[error("concurrent adjustment detected: {0}")]
    ConcurrencyConflict(String),

    /// The backing store could not complete the unit of work (transient).
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A conflict occurred (e.g. duplicate identifier, referenced record).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl ReconcileError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn concurrency(msg: impl Into<String>) -> Self {
        Self::ConcurrencyConflict(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageUnavailable(msg.into())
    }

    pub fn recalculation(msg: impl Into<String>) -> Self {
        Self::RecalculationInvariantViolation(msg.into())
    }

    /// Whether the caller may retry the operation with the original inputs.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict(_) | Self::StorageUnavailable(_)
        )
    }
}
