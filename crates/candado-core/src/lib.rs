//! Candado Core - Reentrant keyed-lock handle over a pluggable service
//!
//! This crate provides:
//! - [`KeyedLock`]: a blocking / try / timed / interruptible lock contract
//!   over a fixed set of logical keys, reentrant for the owning thread
//! - [`KeyedLockService`]: the boundary contract of the service that
//!   performs the actual acquisition and release
//! - [`MemoryKeyedLockService`]: single-process reference implementation
//! - [`AcquireFuture`]: cancellable asynchronous acquisition primitive
//! - Thread identity and interruption ([`thread`])

pub mod future;
pub mod handle;
pub mod memory;
pub mod service;
pub mod thread;

// Re-export commonly used types
pub use future::{AcquireCompleter, AcquireFuture};
pub use handle::KeyedLock;
pub use memory::{MemoryKeyedLockService, ServiceStats};
pub use service::KeyedLockService;
pub use thread::{InterruptHandle, ThreadToken, Wake};

pub use candado_common::{AcquireTimeout, KeySet, LockError};
