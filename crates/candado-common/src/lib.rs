//! Candado Common - Shared vocabulary for the keyed-lock workspace
//!
//! This crate provides the types shared between lock handles and keyed-lock
//! service implementations:
//! - Error taxonomy for lock operations
//! - Key-set and acquisition-timeout types

pub mod error;
pub mod types;

// Re-exports for convenience
pub use error::LockError;
pub use types::{AcquireTimeout, KeySet};
