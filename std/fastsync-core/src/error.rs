///
/// Primitive error types.
///
/// Ownership and reentrancy violations are programming errors: they are
/// returned to the caller immediately and never retried or swallowed.
/// A waiter that abandons its wait is internal bookkeeping and never
/// surfaces here.
///

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Attempt to {operation} a lock not held by the current thread")]
    NotOwner { operation: &'static str },

    #[error("Deadlock; recursive locking")]
    Reentrancy,

    #[error("Queue is closed")]
    Closed,

    #[error("Queue capacity must be positive, got {0}")]
    InvalidCapacity(usize),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("TOML parse error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    pub fn is_ownership_violation(&self) -> bool {
        matches!(self, SyncError::NotOwner { .. } | SyncError::Reentrancy)
    }
}
