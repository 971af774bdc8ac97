//! The keyed mutual-exclusion lock handle.

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tracing::trace;

use candado_common::{AcquireTimeout, KeySet, LockError};

use crate::service::KeyedLockService;
use crate::thread;

const NO_OWNER: u64 = 0;

/// Reentrant mutual-exclusion handle over a fixed key set.
///
/// One thread at a time may hold the lock; that thread may re-acquire it
/// any number of times and must balance every acquisition with an
/// [`unlock`](KeyedLock::unlock). The owner token is stored with
/// release/acquire ordering so any thread that later calls `unlock` or a
/// reentrant `lock` observes it; the hold count is only ever written by the
/// thread that holds the lock, so it needs no ordering of its own.
pub struct KeyedLock {
    service: Arc<dyn KeyedLockService>,
    keys: KeySet,
    hold_count: AtomicU32,
    owner: AtomicU64,
}

impl KeyedLock {
    pub fn new(service: Arc<dyn KeyedLockService>, keys: KeySet) -> Self {
        KeyedLock {
            service,
            keys,
            hold_count: AtomicU32::new(0),
            owner: AtomicU64::new(NO_OWNER),
        }
    }

    /// The key set this handle locks. Fixed at construction.
    pub fn keys(&self) -> &KeySet {
        &self.keys
    }

    /// Number of unmatched acquisitions currently held.
    pub fn hold_count(&self) -> u32 {
        self.hold_count.load(Ordering::Relaxed)
    }

    /// Whether the calling thread is the recorded owner.
    pub fn is_held_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Acquire) == thread::current_token().as_u64()
    }

    /// Blocks until the full key set is granted.
    pub fn lock(&self) -> Result<(), LockError> {
        let granted = self
            .service
            .acquire_all(&self.keys, AcquireTimeout::Unbounded)
            .map_err(LockError::from)?;
        if !granted {
            // The service contract forbids Ok(false) on an unbounded wait.
            return Err(LockError::Service(
                "unbounded acquire returned without the key set".to_string(),
            ));
        }
        self.record_acquisition();
        Ok(())
    }

    /// Blocks until granted or the calling thread is interrupted.
    pub fn lock_interruptibly(&self) -> Result<(), LockError> {
        self.try_lock_for(Duration::MAX).map(|_| ())
    }

    /// Attempts the acquisition without waiting.
    ///
    /// `Ok(false)` means the key set was unavailable; handle state is
    /// unchanged in that case.
    pub fn try_lock(&self) -> Result<bool, LockError> {
        let granted = self
            .service
            .acquire_all(&self.keys, AcquireTimeout::NoWait)
            .map_err(LockError::from)?;
        if granted {
            self.record_acquisition();
        }
        Ok(granted)
    }

    /// Attempts the acquisition, waiting at most `timeout`.
    ///
    /// Fails with [`LockError::Interrupted`] if the calling thread's
    /// interrupt flag is already set (consuming it) or if the thread is
    /// interrupted while waiting. An interrupt that arrives after the
    /// underlying acquisition already resolved does not discard the result:
    /// the outcome is consumed, the interrupt flag is restored for the
    /// caller to observe, and the boolean result is returned.
    pub fn try_lock_for(&self, timeout: Duration) -> Result<bool, LockError> {
        if thread::interrupted() {
            return Err(LockError::Interrupted);
        }
        if timeout.is_zero() {
            return self.try_lock();
        }

        let pending = self.service.acquire_all_async(&self.keys, timeout);
        match pending.wait() {
            Ok(granted) => {
                if granted {
                    self.record_acquisition();
                }
                Ok(granted)
            }
            Err(LockError::Interrupted) => {
                if !pending.cancel()
                    && let Some(outcome) = pending.try_outcome()
                {
                    // The acquisition resolved before the cancel landed.
                    // Hand the interrupt back through the flag rather than
                    // the error path, and consume the result.
                    thread::set_interrupted();
                    return match outcome {
                        Ok(granted) => {
                            if granted {
                                self.record_acquisition();
                            }
                            Ok(granted)
                        }
                        Err(err) => Err(err),
                    };
                }
                Err(LockError::Interrupted)
            }
            Err(err) => Err(err),
        }
    }

    /// Releases one hold. The calling thread must be the recorded owner.
    ///
    /// The service is told to release on every unlock; the service contract
    /// counts holds per owner, so the calls stay balanced (see
    /// [`KeyedLockService`]).
    pub fn unlock(&self) -> Result<(), LockError> {
        let me = thread::current_token();
        if self.owner.load(Ordering::Acquire) != me.as_u64() {
            return Err(LockError::NotOwner);
        }

        let held = self.hold_count.load(Ordering::Relaxed);
        debug_assert!(held > 0, "owner recorded with zero holds");
        let remaining = held - 1;
        self.hold_count.store(remaining, Ordering::Relaxed);
        if remaining == 0 {
            self.owner.store(NO_OWNER, Ordering::Release);
        }
        trace!(keys = self.keys.len(), remaining, "released one hold");

        self.service.release_all(&self.keys).map_err(LockError::from)
    }

    /// Condition variables cannot be derived from a keyed lock.
    pub fn new_condition(&self) -> Result<Infallible, LockError> {
        Err(LockError::Unsupported)
    }

    fn record_acquisition(&self) {
        let me = thread::current_token();
        let owner = self.owner.load(Ordering::Acquire);
        let held = self.hold_count.load(Ordering::Relaxed);
        debug_assert!(
            (owner == NO_OWNER && held == 0) || (owner == me.as_u64() && held > 0),
            "key set granted while another thread is recorded as owner"
        );
        self.hold_count.store(held + 1, Ordering::Relaxed);
        self.owner.store(me.as_u64(), Ordering::Release);
        trace!(keys = self.keys.len(), holds = held + 1, "acquired key set");
    }
}

impl fmt::Debug for KeyedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLock")
            .field("keys", &self.keys)
            .field("hold_count", &self.hold_count.load(Ordering::Relaxed))
            .field("owner", &self.owner.load(Ordering::Relaxed))
            .finish()
    }
}
