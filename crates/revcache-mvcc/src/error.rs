//! Error types for MVCC coordination.

use thiserror::Error;

/// A call into the authoritative store failed. The cache never interprets
/// these; they pass through to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("adapter failure: {message}")]
pub struct AdapterError {
    message: String,
}

impl AdapterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors from index construction, chain maintenance, and polling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MvccError {
    /// A transaction-range index was constructed with a reversed or empty
    /// window.
    #[error("invalid tid range: complete_since {complete_since} must precede highest_visible {highest_visible}")]
    InvalidTidRange {
        complete_since: i64,
        highest_visible: i64,
    },

    /// A change datum falls outside the index window.
    #[error("tid {tid} for oid {oid} is outside ({complete_since}, {highest_visible}]")]
    InvalidDatum {
        oid: i64,
        tid: i64,
        complete_since: i64,
        highest_visible: i64,
    },

    /// An index was chained onto one it does not abut.
    #[error("non-contiguous index chain: expected complete_since {expected}, got {got}")]
    NonContiguous { expected: i64, got: i64 },

    /// Pass-through from the storage adapter.
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl MvccError {
    /// Returns `true` for invariant violations, which fail the poll but
    /// leave coordinator state untouched.
    #[inline]
    pub fn is_invariant_violation(&self) -> bool {
        !matches!(self, Self::Adapter(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let err = MvccError::NonContiguous { expected: 5, got: 7 };
        assert!(err.is_invariant_violation());
        let err = MvccError::from(AdapterError::new("connection lost"));
        assert!(!err.is_invariant_violation());
    }
}
