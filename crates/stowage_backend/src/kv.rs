//! Minimal key-value store abstraction.
//!
//! This is the host's "always available" store: the fallback adapter is
//! layered on top of it, and the selector persists its small cross-session
//! record through it. It is injected rather than reached for globally so
//! tests and embedders can substitute their own.

use crate::error::BackendResult;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;

/// An asynchronous string-keyed byte store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`, if any.
    async fn get(&self, key: &str) -> BackendResult<Option<Bytes>>;

    /// Stores `value` under `key`, replacing any prior value.
    async fn set(&self, key: &str, value: Bytes) -> BackendResult<()>;

    /// Removes the value stored under `key`. Absent keys are a no-op.
    async fn remove(&self, key: &str) -> BackendResult<()>;

    /// Lists every key currently present.
    async fn keys(&self) -> BackendResult<Vec<String>>;
}

/// An in-process [`KeyValueStore`].
///
/// Suitable for tests, ephemeral stores, and as the default store when the
/// host provides nothing better.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, Bytes>>,
}

impl MemoryKvStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> BackendResult<Option<Bytes>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Bytes) -> BackendResult<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> BackendResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn keys(&self) -> BackendResult<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_remove() {
        let store = MemoryKvStore::new();
        assert_eq!(store.get("a").await.unwrap(), None);

        store.set("a", Bytes::from_static(b"1")).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(Bytes::from_static(b"1")));

        store.set("a", Bytes::from_static(b"2")).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(Bytes::from_static(b"2")));

        store.remove("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);

        // removing again is a no-op
        store.remove("a").await.unwrap();
    }

    #[tokio::test]
    async fn keys_lists_everything() {
        let store = MemoryKvStore::new();
        store.set("x", Bytes::new()).await.unwrap();
        store.set("y", Bytes::new()).await.unwrap();

        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["x", "y"]);
    }
}
