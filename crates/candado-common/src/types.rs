//! Key-set and acquisition-timeout types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fixed collection of logical key identifiers over which mutual exclusion
/// is requested.
///
/// The set is immutable after construction. Caller order is preserved and
/// duplicates are dropped: the service counts holds per key, so a
/// duplicated key must not turn one acquisition into two counted holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySet(Vec<String>);

impl KeySet {
    /// Create a key set, preserving order and dropping duplicates.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for key in keys {
            let key = key.into();
            if !out.contains(&key) {
                out.push(key);
            }
        }
        KeySet(out)
    }

    pub fn keys(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for KeySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        KeySet::new(iter)
    }
}

/// Wait bound for a synchronous key-set acquisition.
///
/// `NoWait` is a distinct sentinel from `Bounded(Duration::ZERO)`: the
/// former means "do not wait at all", the latter is a bounded wait whose
/// deadline has already passed when the wait begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquireTimeout {
    /// Fail immediately if the full key set is not available.
    NoWait,
    /// Block until the full key set is granted.
    Unbounded,
    /// Wait at most this long.
    Bounded(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_set_preserves_order_and_dedupes() {
        let keys = KeySet::new(["b", "a", "b", "c", "a"]);
        assert_eq!(keys.keys(), ["b", "a", "c"]);
        assert_eq!(keys.len(), 3);
        assert!(!keys.is_empty());
    }

    #[test]
    fn test_key_set_from_iterator() {
        let keys: KeySet = ["x", "y"].into_iter().collect();
        assert_eq!(keys.keys(), ["x", "y"]);
    }

    #[test]
    fn test_acquire_timeout_serde() {
        let json = serde_json::to_string(&AcquireTimeout::NoWait).unwrap();
        assert_eq!(json, "\"no_wait\"");

        let bounded: AcquireTimeout =
            serde_json::from_str("{\"bounded\":{\"secs\":1,\"nanos\":0}}").unwrap();
        assert_eq!(bounded, AcquireTimeout::Bounded(Duration::from_secs(1)));
    }
}
