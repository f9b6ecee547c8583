//! Store errors

/// Errors raised by the keyed stores
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A new key could not be admitted because the store is full
    #[error("counter store full ({capacity} keys), cannot track {key}")]
    CapacityExceeded {
        /// Configured key ceiling
        capacity: usize,
        /// Key that was refused
        key: String,
    },
}

impl StoreError {
    /// Create a capacity error for `key`
    #[inline]
    pub fn capacity_exceeded(capacity: usize, key: impl Into<String>) -> Self {
        Self::CapacityExceeded {
            capacity,
            key: key.into(),
        }
    }
}
