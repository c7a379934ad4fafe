//! Per-channel record of upstream items that were already emitted.
//!
//! Poll windows overlap (every tick re-fetches the latest page), so the same
//! upstream comment or message shows up many times. The store turns that
//! into at-most-once emission for the lifetime of one channel.
//!
//! # Key Design
//!
//! - Keys are stored structurally; `{namespace}_{scope}_{item}` (e.g.
//!   `live_123_c1`) is only their display form
//! - No eviction: memory grows with the number of distinct items seen by a
//!   channel and is released when the channel is dropped.

use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

/// Which upstream collection an item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DedupNamespace {
    LiveComment,
    VideoComment,
    PrivateMessage,
}

impl DedupNamespace {
    pub fn as_str(self) -> &'static str {
        match self {
            DedupNamespace::LiveComment => "live",
            DedupNamespace::VideoComment => "video",
            DedupNamespace::PrivateMessage => "pm",
        }
    }
}

/// Composite identity of an upstream item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    namespace: DedupNamespace,
    scope: String,
    item: String,
}

impl DedupKey {
    pub fn new(namespace: DedupNamespace, scope: impl Into<String>, item: impl Into<String>) -> Self {
        Self {
            namespace,
            scope: scope.into(),
            item: item.into(),
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.namespace.as_str(), self.scope, self.item)
    }
}

/// Set of keys already observed.
#[derive(Debug, Default)]
pub struct DedupStore {
    seen: Mutex<HashSet<DedupKey>>,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `key`, returning `true` only for its first observation.
    ///
    /// Check and insert happen under one lock, so concurrent pollers can
    /// share a store.
    pub fn mark_if_new(&self, key: &DedupKey) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.insert(key.clone())
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        let seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_key_format() {
        let key = DedupKey::new(DedupNamespace::LiveComment, "123", "c1");
        assert_eq!(key.to_string(), "live_123_c1");
        let key = DedupKey::new(DedupNamespace::PrivateMessage, "u7", "m2");
        assert_eq!(key.to_string(), "pm_u7_m2");
    }

    #[test]
    fn test_underscores_in_ids_do_not_collide() {
        let store = DedupStore::new();
        let a = DedupKey::new(DedupNamespace::PrivateMessage, "u_1", "x");
        let b = DedupKey::new(DedupNamespace::PrivateMessage, "u", "1_x");
        assert_eq!(a.to_string(), b.to_string());
        assert!(store.mark_if_new(&a));
        assert!(store.mark_if_new(&b));
        assert!(!store.contains(&DedupKey::new(DedupNamespace::PrivateMessage, "u", "1")));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_first_observation_only() {
        let store = DedupStore::new();
        let key = DedupKey::new(DedupNamespace::VideoComment, "v1", "c1");
        assert!(store.mark_if_new(&key));
        assert!(!store.mark_if_new(&key));
        assert!(!store.mark_if_new(&key));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_namespaces_and_scopes_are_distinct() {
        let store = DedupStore::new();
        assert!(store.mark_if_new(&DedupKey::new(DedupNamespace::LiveComment, "1", "c1")));
        assert!(store.mark_if_new(&DedupKey::new(DedupNamespace::VideoComment, "1", "c1")));
        assert!(store.mark_if_new(&DedupKey::new(DedupNamespace::LiveComment, "2", "c1")));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_repeated_windows_emit_distinct_count() {
        let store = DedupStore::new();
        let windows = [
            vec!["a", "b", "c"],
            vec!["b", "c", "d"],
            vec!["c", "d", "e"],
            vec!["a", "e"],
        ];
        let emitted: usize = windows
            .iter()
            .flatten()
            .filter(|id| store.mark_if_new(&DedupKey::new(DedupNamespace::LiveComment, "r", **id)))
            .count();
        assert_eq!(emitted, 5);
    }

    #[test]
    fn test_concurrent_marks_admit_once() {
        let store = Arc::new(DedupStore::new());
        let key = DedupKey::new(DedupNamespace::LiveComment, "room", "hot");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let key = key.clone();
                std::thread::spawn(move || store.mark_if_new(&key))
            })
            .collect();

        let firsts = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|first| *first)
            .count();
        assert_eq!(firsts, 1);
        assert!(store.contains(&key));
    }
}
