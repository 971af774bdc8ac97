//! Thread identity and interruption.
//!
//! Each OS thread lazily receives a process-unique token used as the lock
//! owner identity, plus an interrupt flag that other threads can raise
//! through a cloneable [`InterruptHandle`]. A blocking wait registers a
//! waker for its duration so that raising the flag wakes the wait instead
//! of leaving it parked.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

/// Process-unique identity of a thread of control. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadToken(u64);

impl ThreadToken {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Wakes a blocked wait: a thread parked in an interruptible wait, or a
/// service operation parked on its own condvar that must observe a
/// cancellation.
pub trait Wake: Send + Sync {
    fn wake(&self);
}

struct ThreadState {
    token: ThreadToken,
    interrupted: AtomicBool,
    waker: Mutex<Option<Arc<dyn Wake>>>,
}

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: Arc<ThreadState> = Arc::new(ThreadState {
        token: ThreadToken(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)),
        interrupted: AtomicBool::new(false),
        waker: Mutex::new(None),
    });
}

/// Token of the calling thread.
pub fn current_token() -> ThreadToken {
    CURRENT.with(|state| state.token)
}

/// Tests and clears the calling thread's interrupt flag.
pub fn interrupted() -> bool {
    CURRENT.with(|state| state.interrupted.swap(false, Ordering::AcqRel))
}

/// Re-raises the calling thread's interrupt flag without waking anything.
///
/// Used to hand an interrupt back to the caller when the awaited operation
/// had already completed by the time the interrupt was observed.
pub fn set_interrupted() {
    CURRENT.with(|state| state.interrupted.store(true, Ordering::Release));
}

/// Cross-thread handle to one thread's interrupt flag.
#[derive(Clone)]
pub struct InterruptHandle {
    state: Arc<ThreadState>,
}

impl InterruptHandle {
    /// Handle to the calling thread's flag.
    pub fn current() -> Self {
        InterruptHandle {
            state: CURRENT.with(Arc::clone),
        }
    }

    /// Token of the thread this handle belongs to.
    pub fn token(&self) -> ThreadToken {
        self.state.token
    }

    /// Raises the flag and wakes the thread if it is blocked in an
    /// interruptible wait.
    ///
    /// The flag is stored before the waker is read, and wakers notify under
    /// the wait cell's mutex, so an interrupt racing a wait is never lost.
    pub fn interrupt(&self) {
        self.state.interrupted.store(true, Ordering::Release);
        let waker = self.state.waker.lock().clone();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptHandle")
            .field("token", &self.state.token)
            .field("raised", &self.state.interrupted.load(Ordering::Relaxed))
            .finish()
    }
}

/// Registers `waker` for the calling thread for the duration of a blocking
/// wait. The registration is cleared when the guard drops.
pub(crate) fn register_waker(waker: Arc<dyn Wake>) -> WakerGuard {
    CURRENT.with(|state| *state.waker.lock() = Some(waker));
    WakerGuard
}

pub(crate) struct WakerGuard;

impl Drop for WakerGuard {
    fn drop(&mut self) {
        CURRENT.with(|state| *state.waker.lock() = None);
    }
}
