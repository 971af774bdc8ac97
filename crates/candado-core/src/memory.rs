//! In-process keyed-lock service.
//!
//! Single-process reference implementation of [`KeyedLockService`]: one
//! mutex-guarded key table plus one condvar for waiters. Multi-key
//! acquisition is atomic — a request is granted only when every key is
//! free or already held by the requesting owner — so two overlapping key
//! sets can never deadlock against each other here.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::bail;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use candado_common::{AcquireTimeout, KeySet};

use crate::future::{AcquireCompleter, AcquireFuture};
use crate::service::KeyedLockService;
use crate::thread::{self, ThreadToken, Wake};

/// One held key: the owning thread and its balanced hold count.
struct Hold {
    owner: ThreadToken,
    count: u32,
}

#[derive(Default)]
struct Counters {
    acquisitions: AtomicU64,
    denials: AtomicU64,
    timeouts: AtomicU64,
    cancellations: AtomicU64,
    releases: AtomicU64,
}

/// Snapshot of the service counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceStats {
    /// Granted acquisitions (including reentrant ones).
    pub acquisitions: u64,
    /// Non-blocking attempts denied immediately.
    pub denials: u64,
    /// Bounded waits that elapsed without a grant.
    pub timeouts: u64,
    /// Asynchronous acquisitions abandoned after a cancel.
    pub cancellations: u64,
    /// Completed releases (one per balanced `release_all`).
    pub releases: u64,
}

struct ServiceInner {
    table: Mutex<HashMap<String, Hold>>,
    freed: Condvar,
    counters: Counters,
}

/// In-memory keyed-lock service.
///
/// Holds are counted per (owner, key), which makes service-level acquire
/// and release reentrant for the owning thread as the trait contract
/// requires.
#[derive(Clone)]
pub struct MemoryKeyedLockService {
    inner: Arc<ServiceInner>,
}

impl MemoryKeyedLockService {
    pub fn new() -> Self {
        MemoryKeyedLockService {
            inner: Arc::new(ServiceInner {
                table: Mutex::new(HashMap::new()),
                freed: Condvar::new(),
                counters: Counters::default(),
            }),
        }
    }

    /// Whether any owner currently holds `key`.
    pub fn is_held(&self, key: &str) -> bool {
        self.inner.table.lock().contains_key(key)
    }

    /// Number of distinct keys currently held.
    pub fn held_keys(&self) -> usize {
        self.inner.table.lock().len()
    }

    /// Drops every hold on `keys` regardless of owner and wakes waiters.
    ///
    /// Administrative escape hatch for operator tooling; returns how many
    /// keys were actually freed.
    pub fn force_release_all(&self, keys: &KeySet) -> usize {
        let mut table = self.inner.table.lock();
        let mut freed = 0;
        for key in keys.keys() {
            if table.remove(key).is_some() {
                freed += 1;
            }
        }
        if freed > 0 {
            warn!(freed, "force-released keys");
            self.inner.freed.notify_all();
        }
        freed
    }

    pub fn stats(&self) -> ServiceStats {
        let counters = &self.inner.counters;
        ServiceStats {
            acquisitions: counters.acquisitions.load(Ordering::Relaxed),
            denials: counters.denials.load(Ordering::Relaxed),
            timeouts: counters.timeouts.load(Ordering::Relaxed),
            cancellations: counters.cancellations.load(Ordering::Relaxed),
            releases: counters.releases.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryKeyedLockService {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceInner {
    /// Every key is free or already held by `owner`.
    fn grantable(table: &HashMap<String, Hold>, owner: ThreadToken, keys: &KeySet) -> bool {
        keys.keys().iter().all(|key| match table.get(key) {
            None => true,
            Some(hold) => hold.owner == owner,
        })
    }

    fn grant(table: &mut HashMap<String, Hold>, owner: ThreadToken, keys: &KeySet) {
        for key in keys.keys() {
            let hold = table
                .entry(key.clone())
                .or_insert(Hold { owner, count: 0 });
            hold.count += 1;
        }
    }

    /// Acquires `keys` for `owner`, waiting per `timeout`.
    ///
    /// When `completer` is given (the asynchronous path), the loop checks
    /// for cancellation on every iteration and bails out with `Ok(false)`
    /// — before taking the keys, so a cancelled waiter never transiently
    /// wins a freed key set. The cancel path wakes this loop through the
    /// service's [`Wake`] impl.
    fn acquire(
        &self,
        owner: ThreadToken,
        keys: &KeySet,
        timeout: AcquireTimeout,
        completer: Option<&AcquireCompleter>,
    ) -> anyhow::Result<bool> {
        if keys.is_empty() {
            bail!("cannot lock an empty key set");
        }

        let deadline = match timeout {
            // A bound too large for the clock is an unbounded wait.
            AcquireTimeout::Bounded(bound) => Instant::now().checked_add(bound),
            _ => None,
        };

        let mut table = self.table.lock();
        loop {
            if let Some(completer) = completer
                && completer.is_cancelled()
            {
                self.counters.cancellations.fetch_add(1, Ordering::Relaxed);
                debug!(owner = owner.as_u64(), "key set acquisition cancelled");
                return Ok(false);
            }
            if Self::grantable(&table, owner, keys) {
                Self::grant(&mut table, owner, keys);
                self.counters.acquisitions.fetch_add(1, Ordering::Relaxed);
                debug!(owner = owner.as_u64(), keys = keys.len(), "key set granted");
                return Ok(true);
            }

            match (timeout, deadline) {
                (AcquireTimeout::NoWait, _) => {
                    self.counters.denials.fetch_add(1, Ordering::Relaxed);
                    debug!(owner = owner.as_u64(), "key set denied without waiting");
                    return Ok(false);
                }
                (AcquireTimeout::Unbounded, _) | (AcquireTimeout::Bounded(_), None) => {
                    self.freed.wait(&mut table);
                }
                (AcquireTimeout::Bounded(_), Some(deadline)) => {
                    if self.freed.wait_until(&mut table, deadline).timed_out()
                        && !Self::grantable(&table, owner, keys)
                    {
                        self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                        debug!(owner = owner.as_u64(), "key set acquisition timed out");
                        return Ok(false);
                    }
                }
            }
        }
    }

    fn release(&self, owner: ThreadToken, keys: &KeySet) -> anyhow::Result<()> {
        let mut table = self.table.lock();

        // Validate the whole set before mutating anything, so a bad release
        // cannot leave a partially decremented key set behind.
        for key in keys.keys() {
            match table.get(key) {
                Some(hold) if hold.owner == owner && hold.count > 0 => {}
                _ => bail!("key '{key}' is not held by the releasing owner"),
            }
        }

        for key in keys.keys() {
            let emptied = match table.get_mut(key) {
                Some(hold) => {
                    hold.count -= 1;
                    hold.count == 0
                }
                None => false,
            };
            if emptied {
                table.remove(key);
            }
        }

        self.counters.releases.fetch_add(1, Ordering::Relaxed);
        debug!(owner = owner.as_u64(), keys = keys.len(), "key set released");
        self.freed.notify_all();
        Ok(())
    }
}

impl Wake for ServiceInner {
    /// Wakes every waiter parked on the key table, so a cancelled
    /// acquisition gets to observe the cancellation.
    fn wake(&self) {
        let _guard = self.table.lock();
        self.freed.notify_all();
    }
}

impl KeyedLockService for MemoryKeyedLockService {
    fn acquire_all(&self, keys: &KeySet, timeout: AcquireTimeout) -> anyhow::Result<bool> {
        self.inner.acquire(thread::current_token(), keys, timeout, None)
    }

    fn acquire_all_async(&self, keys: &KeySet, bound: Duration) -> AcquireFuture {
        let (future, completer) = AcquireFuture::pair();
        let inner = Arc::clone(&self.inner);
        let keys = keys.clone();
        let owner = thread::current_token();

        // Installed before the future is handed out, so no cancel can
        // precede the hook.
        completer.on_cancel(Arc::clone(&self.inner) as Arc<dyn Wake>);

        std::thread::spawn(move || {
            let outcome =
                inner.acquire(owner, &keys, AcquireTimeout::Bounded(bound), Some(&completer));
            let acquired = matches!(outcome, Ok(true));
            if !completer.complete(outcome) && acquired {
                // Cancellation landed after the keys were won; roll the
                // acquisition back so it cannot leak.
                if let Err(err) = inner.release(owner, &keys) {
                    warn!(owner = owner.as_u64(), %err, "rollback of cancelled acquisition failed");
                }
            }
        });

        future
    }

    fn release_all(&self, keys: &KeySet) -> anyhow::Result<()> {
        self.inner.release(thread::current_token(), keys)
    }
}
