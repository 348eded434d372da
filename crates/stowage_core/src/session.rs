//! Cross-session selection metadata.
//!
//! A small JSON record persisted through the injected [`KeyValueStore`]
//! outside any adapter's own namespace, so it survives a store `clear()`
//! and a change of backend. The selector loads it before probing and saves
//! it after binding; when the bound kind differs from the recorded one the
//! facade exposes a [`MigrationSignal`] so the embedder can move data
//! between incompatible backends. The move itself stays out of scope here.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StoreResult;
use stowage_backend::{BackendKind, KeyValueStore};

/// Key prefix for per-store metadata records, outside adapter namespaces.
const META_PREFIX: &str = "stowage-meta/";

/// What we remember about a store between sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    /// The kind that was bound the last time selection succeeded.
    pub last_backend: Option<BackendKind>,
}

/// Raised when the newly bound backend differs from the recorded one.
///
/// Data written through `from` is not readable through `to`; whether and
/// how to migrate it is the embedder's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationSignal {
    /// The previously recorded backend kind.
    pub from: BackendKind,
    /// The newly bound backend kind.
    pub to: BackendKind,
}

/// Load/save access to one store's [`SessionMeta`] record.
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl SessionStore {
    /// Binds to the metadata record for the store named `name`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, name: &str) -> Self {
        Self {
            store,
            key: format!("{META_PREFIX}{name}"),
        }
    }

    /// Loads the record. Absent or unreadable records load as empty; an
    /// unreadable record is logged and then overwritten by the next save.
    pub async fn load(&self) -> StoreResult<SessionMeta> {
        let Some(raw) = self.store.get(&self.key).await? else {
            return Ok(SessionMeta::default());
        };
        match serde_json::from_slice(&raw) {
            Ok(meta) => Ok(meta),
            Err(error) => {
                warn!(key = %self.key, %error, "discarding unreadable session record");
                Ok(SessionMeta::default())
            }
        }
    }

    /// Saves the record, replacing any prior one.
    pub async fn save(&self, meta: &SessionMeta) -> StoreResult<()> {
        let raw = serde_json::to_vec(meta).map_err(|e| {
            stowage_backend::BackendError::Io(format!("encode session record: {e}"))
        })?;
        self.store.set(&self.key, Bytes::from(raw)).await?;
        Ok(())
    }

    /// The metadata record key, for tests and diagnostics.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_backend::MemoryKvStore;

    #[tokio::test]
    async fn absent_record_loads_empty() {
        let kv = Arc::new(MemoryKvStore::new());
        let session = SessionStore::new(kv, "s");
        assert_eq!(session.load().await.unwrap(), SessionMeta::default());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let kv = Arc::new(MemoryKvStore::new());
        let session = SessionStore::new(kv, "s");

        let meta = SessionMeta {
            last_backend: Some(BackendKind::Relational),
        };
        session.save(&meta).await.unwrap();
        assert_eq!(session.load().await.unwrap(), meta);
    }

    #[tokio::test]
    async fn records_are_scoped_by_store_name() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        let a = SessionStore::new(Arc::clone(&kv), "a");
        let b = SessionStore::new(Arc::clone(&kv), "b");

        a.save(&SessionMeta {
            last_backend: Some(BackendKind::Filesystem),
        })
        .await
        .unwrap();
        assert_eq!(b.load().await.unwrap(), SessionMeta::default());
    }

    #[tokio::test]
    async fn garbage_record_loads_empty() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        let session = SessionStore::new(Arc::clone(&kv), "s");

        kv.set(session.key(), Bytes::from_static(b"{not json"))
            .await
            .unwrap();
        assert_eq!(session.load().await.unwrap(), SessionMeta::default());
    }
}
