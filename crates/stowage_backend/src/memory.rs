//! In-memory backend adapter.

use crate::adapter::{AdapterConfig, AdapterFactory, BackendAdapter, BackendKind};
use crate::error::{BackendError, BackendResult};
use crate::types::{AttachmentEntry, HandleEntry, ResourceHandle};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct DocRecord {
    contents: Option<Bytes>,
    attachments: HashMap<String, Bytes>,
}

#[derive(Debug, Default)]
struct MemoryState {
    docs: HashMap<String, DocRecord>,
    /// Outstanding handles, by handle -> attachment address.
    handles: HashMap<ResourceHandle, (String, String)>,
    next_handle: u64,
}

impl MemoryState {
    fn used_bytes(&self) -> u64 {
        self.docs
            .values()
            .map(|doc| {
                let contents = doc.contents.as_ref().map_or(0, |c| c.len() as u64);
                let attachments: u64 = doc.attachments.values().map(|a| a.len() as u64).sum();
                contents + attachments
            })
            .sum()
    }
}

/// A full-capability in-memory adapter.
///
/// Stores documents and attachments in process memory. Suitable for unit
/// tests, ephemeral stores, and as a stand-in candidate when wiring the
/// selection cascade without host technologies.
///
/// When constructed with a capacity, writes that would exceed it fail with
/// [`BackendError::QuotaExceeded`].
pub struct MemoryAdapter {
    kind: BackendKind,
    capacity: Option<u64>,
    state: Mutex<MemoryState>,
}

impl MemoryAdapter {
    /// Creates an unbounded in-memory adapter reporting
    /// [`BackendKind::ObjectStore`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_kind(BackendKind::ObjectStore)
    }

    /// Creates an unbounded in-memory adapter reporting the given kind.
    ///
    /// Useful when registering the adapter as a probe candidate for a
    /// specific technology slot.
    #[must_use]
    pub fn with_kind(kind: BackendKind) -> Self {
        Self {
            kind,
            capacity: None,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Creates an in-memory adapter with a byte capacity.
    #[must_use]
    pub fn with_capacity(kind: BackendKind, capacity: u64) -> Self {
        Self {
            kind,
            capacity: Some(capacity),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Returns the number of outstanding (unreleased) handles.
    pub fn outstanding_handles(&self) -> usize {
        self.state.lock().handles.len()
    }

    fn check_quota(&self, state: &MemoryState, incoming: u64, replaced: u64) -> BackendResult<()> {
        if let Some(capacity) = self.capacity {
            let requested = state.used_bytes() - replaced + incoming;
            if requested > capacity {
                return Err(BackendError::QuotaExceeded {
                    requested,
                    capacity,
                });
            }
        }
        Ok(())
    }

    fn mint_handle(state: &mut MemoryState, doc_key: &str, attach_key: &str) -> ResourceHandle {
        state.next_handle += 1;
        let handle = ResourceHandle::new(format!("mem:{}", state.next_handle));
        state
            .handles
            .insert(handle.clone(), (doc_key.to_string(), attach_key.to_string()));
        handle
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendAdapter for MemoryAdapter {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn supports_attachments(&self) -> bool {
        true
    }

    fn capacity(&self) -> Option<u64> {
        self.capacity
    }

    async fn get_contents(&self, doc_key: &str) -> BackendResult<Bytes> {
        let state = self.state.lock();
        state
            .docs
            .get(doc_key)
            .and_then(|doc| doc.contents.clone())
            .ok_or_else(|| BackendError::DocumentNotFound {
                doc_key: doc_key.to_string(),
            })
    }

    async fn set_contents(&self, doc_key: &str, data: Bytes) -> BackendResult<()> {
        let mut state = self.state.lock();
        let replaced = state
            .docs
            .get(doc_key)
            .and_then(|doc| doc.contents.as_ref())
            .map_or(0, |c| c.len() as u64);
        self.check_quota(&state, data.len() as u64, replaced)?;
        state.docs.entry(doc_key.to_string()).or_default().contents = Some(data);
        Ok(())
    }

    async fn remove(&self, doc_key: &str) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.docs.remove(doc_key);
        state.handles.retain(|_, addr| addr.0 != doc_key);
        Ok(())
    }

    async fn list(&self, doc_key: Option<&str>) -> BackendResult<Vec<String>> {
        let state = self.state.lock();
        let mut keys = match doc_key {
            Some(doc_key) => state
                .docs
                .get(doc_key)
                .map(|doc| doc.attachments.keys().cloned().collect())
                .unwrap_or_default(),
            None => state.docs.keys().cloned().collect::<Vec<_>>(),
        };
        keys.sort();
        Ok(keys)
    }

    async fn get_attachment(&self, doc_key: &str, attach_key: &str) -> BackendResult<Bytes> {
        let state = self.state.lock();
        state
            .docs
            .get(doc_key)
            .and_then(|doc| doc.attachments.get(attach_key).cloned())
            .ok_or_else(|| BackendError::AttachmentNotFound {
                doc_key: doc_key.to_string(),
                attach_key: attach_key.to_string(),
            })
    }

    async fn set_attachment(
        &self,
        doc_key: &str,
        attach_key: &str,
        data: Bytes,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        let replaced = state
            .docs
            .get(doc_key)
            .and_then(|doc| doc.attachments.get(attach_key))
            .map_or(0, |a| a.len() as u64);
        self.check_quota(&state, data.len() as u64, replaced)?;
        state
            .docs
            .entry(doc_key.to_string())
            .or_default()
            .attachments
            .insert(attach_key.to_string(), data);
        Ok(())
    }

    async fn remove_attachment(&self, doc_key: &str, attach_key: &str) -> BackendResult<()> {
        let mut state = self.state.lock();
        if let Some(doc) = state.docs.get_mut(doc_key) {
            doc.attachments.remove(attach_key);
        }
        state
            .handles
            .retain(|_, addr| !(addr.0 == doc_key && addr.1 == attach_key));
        Ok(())
    }

    async fn get_all_attachments(&self, doc_key: &str) -> BackendResult<Vec<AttachmentEntry>> {
        let state = self.state.lock();
        let mut entries: Vec<AttachmentEntry> = state
            .docs
            .get(doc_key)
            .map(|doc| {
                doc.attachments
                    .iter()
                    .map(|(attach_key, data)| AttachmentEntry {
                        attach_key: attach_key.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by(|a, b| a.attach_key.cmp(&b.attach_key));
        Ok(entries)
    }

    async fn get_attachment_handle(
        &self,
        doc_key: &str,
        attach_key: &str,
    ) -> BackendResult<ResourceHandle> {
        let mut state = self.state.lock();
        if !state
            .docs
            .get(doc_key)
            .is_some_and(|doc| doc.attachments.contains_key(attach_key))
        {
            return Err(BackendError::AttachmentNotFound {
                doc_key: doc_key.to_string(),
                attach_key: attach_key.to_string(),
            });
        }
        Ok(Self::mint_handle(&mut state, doc_key, attach_key))
    }

    async fn get_all_attachment_handles(
        &self,
        doc_key: &str,
    ) -> BackendResult<Vec<HandleEntry>> {
        let mut state = self.state.lock();
        let mut attach_keys: Vec<String> = state
            .docs
            .get(doc_key)
            .map(|doc| doc.attachments.keys().cloned().collect())
            .unwrap_or_default();
        attach_keys.sort();
        Ok(attach_keys
            .into_iter()
            .map(|attach_key| {
                let handle = Self::mint_handle(&mut state, doc_key, &attach_key);
                HandleEntry {
                    doc_key: doc_key.to_string(),
                    attach_key,
                    handle,
                }
            })
            .collect())
    }

    async fn release_attachment_handle(&self, handle: &ResourceHandle) -> BackendResult<()> {
        // Releasing an unknown or already-released handle is a no-op.
        self.state.lock().handles.remove(handle);
        Ok(())
    }

    async fn clear(&self) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.docs.clear();
        state.handles.clear();
        Ok(())
    }
}

/// Factory producing [`MemoryAdapter`]s for a given technology slot.
pub struct MemoryAdapterFactory {
    kind: BackendKind,
}

impl MemoryAdapterFactory {
    /// Creates a factory that registers as `kind` in the cascade.
    #[must_use]
    pub fn new(kind: BackendKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl AdapterFactory for MemoryAdapterFactory {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn init(&self, config: &AdapterConfig) -> BackendResult<Arc<dyn BackendAdapter>> {
        Ok(Arc::new(MemoryAdapter::with_capacity(
            self.kind,
            config.size,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn contents_round_trip() {
        let adapter = MemoryAdapter::new();
        adapter
            .set_contents("d1", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(
            adapter.get_contents("d1").await.unwrap(),
            Bytes::from_static(b"hello")
        );
    }

    #[tokio::test]
    async fn missing_document_is_not_found() {
        let adapter = MemoryAdapter::new();
        let err = adapter.get_contents("absent").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn remove_drops_attachments_too() {
        let adapter = MemoryAdapter::new();
        adapter
            .set_contents("d1", Bytes::from_static(b"x"))
            .await
            .unwrap();
        adapter
            .set_attachment("d1", "a", Bytes::from_static(b"y"))
            .await
            .unwrap();

        adapter.remove("d1").await.unwrap();
        assert!(adapter.get_contents("d1").await.is_err());
        assert!(adapter.get_attachment("d1", "a").await.is_err());
    }

    #[tokio::test]
    async fn list_documents_and_attachments() {
        let adapter = MemoryAdapter::new();
        adapter
            .set_contents("d1", Bytes::from_static(b"x"))
            .await
            .unwrap();
        adapter
            .set_attachment("d1", "b", Bytes::from_static(b"1"))
            .await
            .unwrap();
        adapter
            .set_attachment("d1", "a", Bytes::from_static(b"2"))
            .await
            .unwrap();
        adapter
            .set_contents("d2", Bytes::from_static(b"x"))
            .await
            .unwrap();

        assert_eq!(adapter.list(None).await.unwrap(), vec!["d1", "d2"]);
        assert_eq!(adapter.list(Some("d1")).await.unwrap(), vec!["a", "b"]);
        assert!(adapter.list(Some("absent")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn handle_lifecycle() {
        let adapter = MemoryAdapter::new();
        adapter
            .set_attachment("d1", "a", Bytes::from_static(b"payload"))
            .await
            .unwrap();

        let handle = adapter.get_attachment_handle("d1", "a").await.unwrap();
        assert_eq!(adapter.outstanding_handles(), 1);

        adapter.release_attachment_handle(&handle).await.unwrap();
        assert_eq!(adapter.outstanding_handles(), 0);

        // double release is a no-op
        adapter.release_attachment_handle(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn handle_for_missing_attachment_fails() {
        let adapter = MemoryAdapter::new();
        let err = adapter.get_attachment_handle("d1", "nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn bulk_handles_cover_every_attachment() {
        let adapter = MemoryAdapter::new();
        adapter
            .set_attachment("d1", "a", Bytes::from_static(b"1"))
            .await
            .unwrap();
        adapter
            .set_attachment("d1", "b", Bytes::from_static(b"2"))
            .await
            .unwrap();

        let entries = adapter.get_all_attachment_handles("d1").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].attach_key, "a");
        assert_eq!(entries[1].attach_key, "b");
        assert_ne!(entries[0].handle, entries[1].handle);
    }

    #[tokio::test]
    async fn quota_is_enforced() {
        let adapter = MemoryAdapter::with_capacity(BackendKind::ObjectStore, 8);
        adapter
            .set_contents("d1", Bytes::from_static(b"12345678"))
            .await
            .unwrap();

        let err = adapter
            .set_attachment("d1", "a", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::QuotaExceeded { .. }));

        // replacing contents with a same-sized value still fits
        adapter
            .set_contents("d1", Bytes::from_static(b"87654321"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn clear_empties_everything() {
        let adapter = MemoryAdapter::new();
        adapter
            .set_contents("d1", Bytes::from_static(b"x"))
            .await
            .unwrap();
        adapter
            .set_attachment("d1", "a", Bytes::from_static(b"y"))
            .await
            .unwrap();
        let _handle = adapter.get_attachment_handle("d1", "a").await.unwrap();

        adapter.clear().await.unwrap();
        assert!(adapter.list(None).await.unwrap().is_empty());
        assert_eq!(adapter.outstanding_handles(), 0);
    }

    #[tokio::test]
    async fn factory_grants_configured_capacity() {
        let factory = MemoryAdapterFactory::new(BackendKind::Relational);
        let adapter = factory
            .init(&AdapterConfig {
                name: "test".into(),
                size: 1024,
            })
            .await
            .unwrap();
        assert_eq!(adapter.kind(), BackendKind::Relational);
        assert_eq!(adapter.capacity(), Some(1024));
        assert!(adapter.supports_attachments());
    }
}
