//! Boundary contract of the keyed-lock service.

use std::time::Duration;

use candado_common::{AcquireTimeout, KeySet};

use crate::future::AcquireFuture;

/// External collaborator that performs the actual acquisition and release
/// of a key set.
///
/// # Reentrancy
///
/// Implementations count holds per (owner, key): `acquire_all` by the
/// current holder increments each key's hold count and `release_all`
/// decrements it, freeing the key at zero. [`KeyedLock`] relies on this by
/// calling `release_all` once per `unlock`, which keeps the service-level
/// counts balanced one-to-one with its own reentrancy counter.
///
/// # Errors
///
/// Recoverable failures are reported as `anyhow::Error`; a denied or
/// timed-out acquisition is the `Ok(false)` value, never an error.
/// `acquire_all` with [`AcquireTimeout::Unbounded`] returns `Ok(true)`
/// whenever it returns `Ok`.
///
/// [`KeyedLock`]: crate::handle::KeyedLock
pub trait KeyedLockService: Send + Sync {
    /// Synchronously acquires the full key set, waiting per `timeout`.
    fn acquire_all(&self, keys: &KeySet, timeout: AcquireTimeout) -> anyhow::Result<bool>;

    /// Starts an asynchronous acquisition bounded by `bound`, performed on
    /// behalf of the calling thread.
    ///
    /// The returned future supports cancellation, non-blocking polls, and
    /// an interruptible blocking wait. An implementation whose operation
    /// acquires the keys after the future was cancelled must release them
    /// again rather than leak a held key set.
    fn acquire_all_async(&self, keys: &KeySet, bound: Duration) -> AcquireFuture;

    /// Releases one hold on the full key set.
    fn release_all(&self, keys: &KeySet) -> anyhow::Result<()>;
}
