//! Cancellable asynchronous acquisition primitive.
//!
//! An [`AcquireFuture`] / [`AcquireCompleter`] pair shares a completion
//! cell. The consumer can poll, cancel, or block interruptibly; the
//! producer publishes the outcome exactly once and learns whether a cancel
//! beat it, in which case any acquisition it performed must be rolled back
//! so a cancelled-but-won key set never leaks.

use std::sync::Arc;

use candado_common::LockError;
use parking_lot::{Condvar, Mutex};

use crate::thread::{self, Wake};

enum State {
    Pending,
    /// Resolved. Service failures are stored as their diagnostic message so
    /// the outcome stays observable to repeated polls.
    Done(Result<bool, String>),
    Cancelled,
}

struct Shared {
    state: Mutex<State>,
    done: Condvar,
    /// Woken once when a cancel wins, so the producer's wait (e.g. the
    /// service's key-table condvar) can observe the cancellation instead of
    /// sleeping out its bound.
    cancel_hook: Mutex<Option<Arc<dyn Wake>>>,
}

impl Wake for Shared {
    fn wake(&self) {
        // Notify under the cell's mutex so the wakeup cannot slip between a
        // waiter's flag check and its park.
        let _guard = self.state.lock();
        self.done.notify_all();
    }
}

/// Consumer half of an in-flight key-set acquisition.
pub struct AcquireFuture {
    shared: Arc<Shared>,
}

/// Producer half of an in-flight key-set acquisition, owned by whoever
/// performs the work.
pub struct AcquireCompleter {
    shared: Arc<Shared>,
}

impl AcquireFuture {
    /// Creates a connected future/completer pair.
    pub fn pair() -> (AcquireFuture, AcquireCompleter) {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::Pending),
            done: Condvar::new(),
            cancel_hook: Mutex::new(None),
        });
        (
            AcquireFuture {
                shared: Arc::clone(&shared),
            },
            AcquireCompleter { shared },
        )
    }

    /// Attempts to cancel the acquisition.
    ///
    /// Returns `true` when the cancellation won (the operation will never
    /// publish an outcome here), `false` when an outcome already arrived.
    /// A winning cancel fires the producer's cancel hook so an operation
    /// parked on its own wait gets woken to observe the cancellation.
    pub fn cancel(&self) -> bool {
        let (cancelled, transitioned) = {
            let mut state = self.shared.state.lock();
            match *state {
                State::Pending => {
                    *state = State::Cancelled;
                    self.shared.done.notify_all();
                    (true, true)
                }
                State::Cancelled => (true, false),
                State::Done(_) => (false, false),
            }
        };
        if transitioned {
            // The state lock is released first: the hook takes the
            // producer's own lock, which the producer holds while polling
            // `is_cancelled`.
            let hook = self.shared.cancel_hook.lock().clone();
            if let Some(hook) = hook {
                hook.wake();
            }
        }
        cancelled
    }

    /// Whether an outcome is available.
    pub fn is_done(&self) -> bool {
        matches!(*self.shared.state.lock(), State::Done(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(*self.shared.state.lock(), State::Cancelled)
    }

    /// Non-blocking poll for the outcome. Repeatable: the outcome stays in
    /// place so the interrupt-reconcile path can read it after a failed
    /// cancel.
    pub fn try_outcome(&self) -> Option<Result<bool, LockError>> {
        match &*self.shared.state.lock() {
            State::Done(Ok(acquired)) => Some(Ok(*acquired)),
            State::Done(Err(message)) => Some(Err(LockError::Service(message.clone()))),
            _ => None,
        }
    }

    /// Blocks until the acquisition resolves or the calling thread is
    /// interrupted.
    ///
    /// Interruption consumes the thread's interrupt flag and returns
    /// [`LockError::Interrupted`]; the caller decides whether to cancel the
    /// operation or reconcile with an outcome that arrived concurrently.
    pub fn wait(&self) -> Result<bool, LockError> {
        let _waker = thread::register_waker(Arc::clone(&self.shared) as Arc<dyn Wake>);
        let mut state = self.shared.state.lock();
        loop {
            if thread::interrupted() {
                return Err(LockError::Interrupted);
            }
            match &*state {
                State::Done(Ok(acquired)) => return Ok(*acquired),
                State::Done(Err(message)) => return Err(LockError::Service(message.clone())),
                State::Cancelled => return Err(LockError::Interrupted),
                State::Pending => {}
            }
            self.shared.done.wait(&mut state);
        }
    }
}

impl AcquireCompleter {
    /// Publishes the outcome.
    ///
    /// Returns `false` if the future was cancelled first; the caller must
    /// then roll back any acquisition the operation performed.
    pub fn complete(self, outcome: anyhow::Result<bool>) -> bool {
        let mut state = self.shared.state.lock();
        match *state {
            State::Pending => {
                *state = State::Done(outcome.map_err(|err| err.to_string()));
                self.shared.done.notify_all();
                true
            }
            State::Cancelled | State::Done(_) => false,
        }
    }

    /// Whether the consumer already cancelled the acquisition.
    pub fn is_cancelled(&self) -> bool {
        matches!(*self.shared.state.lock(), State::Cancelled)
    }

    /// Installs the waker fired when a cancel wins.
    ///
    /// The producer registers whatever its acquisition loop parks on, then
    /// polls [`is_cancelled`](AcquireCompleter::is_cancelled) after every
    /// wakeup. Install the hook before handing the future to a consumer,
    /// otherwise an early cancel can fire before the hook exists.
    pub fn on_cancel(&self, hook: Arc<dyn Wake>) {
        *self.shared.cancel_hook.lock() = Some(hook);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    use crate::thread::InterruptHandle;

    #[test]
    fn test_complete_then_wait() {
        let (future, completer) = AcquireFuture::pair();
        assert!(completer.complete(Ok(true)));
        assert!(future.is_done());
        assert_eq!(future.wait().unwrap(), true);
        // Outcome stays observable.
        assert_eq!(future.try_outcome(), Some(Ok(true)));
    }

    #[test]
    fn test_cancel_beats_completion() {
        let (future, completer) = AcquireFuture::pair();
        assert!(future.cancel());
        assert!(future.is_cancelled());
        assert!(completer.is_cancelled());
        assert!(!completer.complete(Ok(true)));
        assert_eq!(future.try_outcome(), None);
    }

    #[test]
    fn test_cancel_after_completion_fails() {
        let (future, completer) = AcquireFuture::pair();
        assert!(completer.complete(Ok(false)));
        assert!(!future.cancel());
        assert_eq!(future.try_outcome(), Some(Ok(false)));
    }

    #[test]
    fn test_winning_cancel_fires_the_hook_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingHook(AtomicUsize);
        impl Wake for CountingHook {
            fn wake(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (future, completer) = AcquireFuture::pair();
        let hook = Arc::new(CountingHook(AtomicUsize::new(0)));
        completer.on_cancel(hook.clone());

        assert!(future.cancel());
        assert_eq!(hook.0.load(Ordering::SeqCst), 1);
        // Repeated cancels are idempotent and do not re-fire the hook.
        assert!(future.cancel());
        assert_eq!(hook.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hook_not_fired_when_completion_wins() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingHook(AtomicUsize);
        impl Wake for CountingHook {
            fn wake(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (future, completer) = AcquireFuture::pair();
        let hook = Arc::new(CountingHook(AtomicUsize::new(0)));
        completer.on_cancel(hook.clone());

        assert!(completer.complete(Ok(true)));
        assert!(!future.cancel());
        assert_eq!(hook.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_service_error_carries_message() {
        let (future, completer) = AcquireFuture::pair();
        assert!(completer.complete(Err(anyhow::anyhow!("quorum lost"))));
        assert_eq!(
            future.wait(),
            Err(LockError::Service("quorum lost".to_string()))
        );
    }

    #[test]
    fn test_wait_wakes_on_completion_from_other_thread() {
        let (future, completer) = AcquireFuture::pair();
        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            completer.complete(Ok(true))
        });
        assert_eq!(future.wait().unwrap(), true);
        assert!(worker.join().unwrap());
    }

    #[test]
    fn test_wait_interrupted_by_remote_thread() {
        let (future, _completer) = AcquireFuture::pair();
        let (handle_tx, handle_rx) = mpsc::channel();

        let waiter = std::thread::spawn(move || {
            handle_tx.send(InterruptHandle::current()).unwrap();
            future.wait()
        });

        let handle = handle_rx.recv().unwrap();
        // Give the waiter time to park before interrupting it.
        std::thread::sleep(Duration::from_millis(20));
        handle.interrupt();

        assert_eq!(waiter.join().unwrap(), Err(LockError::Interrupted));
    }
}
