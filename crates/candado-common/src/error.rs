//! Error types for lock handles and the keyed-lock service boundary.
//!
//! Service implementations report recoverable failures as `anyhow::Error`;
//! lock handles translate them into [`LockError::Service`] at the boundary,
//! keeping the original diagnostic message. A denied or timed-out
//! acquisition is a boolean outcome, never an error.

/// Failures surfaced by a keyed lock handle.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The keyed-lock service reported a recoverable failure during
    /// acquire or release.
    #[error("keyed-lock service failure: {0}")]
    Service(String),

    /// `unlock` was invoked by a thread other than the recorded owner.
    #[error("failed to unlock keys: the calling thread does not hold this lock")]
    NotOwner,

    /// The calling thread was interrupted while waiting for acquisition.
    #[error("interrupted while waiting for key-set acquisition")]
    Interrupted,

    /// Condition variables cannot be derived from a keyed lock.
    #[error("keyed locks do not support condition variables")]
    Unsupported,
}

impl From<anyhow::Error> for LockError {
    fn from(err: anyhow::Error) -> Self {
        LockError::Service(err.to_string())
    }
}
