//! Minimal key-value fallback adapter.
//!
//! The last candidate in the selection cascade. It keeps the whole
//! operation set functional over any [`KeyValueStore`], but reports
//! `supports_attachments() == false` and an unknown capacity so callers can
//! detect that they are running in degraded mode.

use crate::adapter::{AdapterConfig, AdapterFactory, BackendAdapter, BackendKind};
use crate::error::{BackendError, BackendResult};
use crate::kv::KeyValueStore;
use crate::types::{AttachmentEntry, HandleEntry, ResourceHandle};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Separator between the document key and attachment key inside a stored
/// attachment key. Unit separator, not expected in user keys.
const SEP: char = '\u{1f}';

/// Key-value fallback adapter.
///
/// Documents live under `<name>/doc:<doc_key>` and attachments under
/// `<name>/att:<doc_key>\u{1f}<attach_key>`, so a shared [`KeyValueStore`]
/// (which also holds the selector's session record) is never clobbered by
/// [`BackendAdapter::clear`].
///
/// Handles are transient: they are minted in process memory and are not
/// persisted across sessions.
pub struct KvAdapter {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
    handles: Mutex<HandleTable>,
}

#[derive(Debug, Default)]
struct HandleTable {
    by_handle: HashMap<ResourceHandle, (String, String)>,
    next: u64,
}

impl KvAdapter {
    /// Creates a fallback adapter scoped to the given logical store name.
    pub fn new(store: Arc<dyn KeyValueStore>, name: &str) -> Self {
        Self {
            store,
            prefix: format!("{name}/"),
            handles: Mutex::new(HandleTable::default()),
        }
    }

    fn doc_storage_key(&self, doc_key: &str) -> String {
        format!("{}doc:{doc_key}", self.prefix)
    }

    fn attach_storage_key(&self, doc_key: &str, attach_key: &str) -> String {
        format!("{}att:{doc_key}{SEP}{attach_key}", self.prefix)
    }

    fn attach_prefix(&self, doc_key: &str) -> String {
        format!("{}att:{doc_key}{SEP}", self.prefix)
    }

    async fn attachment_keys_under(&self, doc_key: &str) -> BackendResult<Vec<String>> {
        let prefix = self.attach_prefix(doc_key);
        let mut out: Vec<String> = self
            .store
            .keys()
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect();
        out.sort();
        Ok(out)
    }

    fn mint_handle(&self, doc_key: &str, attach_key: &str) -> ResourceHandle {
        let mut table = self.handles.lock();
        table.next += 1;
        let handle = ResourceHandle::new(format!("kv:{}", table.next));
        table
            .by_handle
            .insert(handle.clone(), (doc_key.to_string(), attach_key.to_string()));
        handle
    }
}

#[async_trait]
impl BackendAdapter for KvAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::KeyValue
    }

    fn supports_attachments(&self) -> bool {
        // Attachment storage works but the backing store is assumed tiny;
        // callers use this flag to detect degraded mode.
        false
    }

    async fn get_contents(&self, doc_key: &str) -> BackendResult<Bytes> {
        self.store
            .get(&self.doc_storage_key(doc_key))
            .await?
            .ok_or_else(|| BackendError::DocumentNotFound {
                doc_key: doc_key.to_string(),
            })
    }

    async fn set_contents(&self, doc_key: &str, data: Bytes) -> BackendResult<()> {
        self.store.set(&self.doc_storage_key(doc_key), data).await
    }

    async fn remove(&self, doc_key: &str) -> BackendResult<()> {
        self.store.remove(&self.doc_storage_key(doc_key)).await?;
        for attach_key in self.attachment_keys_under(doc_key).await? {
            self.store
                .remove(&self.attach_storage_key(doc_key, &attach_key))
                .await?;
        }
        self.handles.lock().by_handle.retain(|_, addr| addr.0 != doc_key);
        Ok(())
    }

    async fn list(&self, doc_key: Option<&str>) -> BackendResult<Vec<String>> {
        match doc_key {
            Some(doc_key) => self.attachment_keys_under(doc_key).await,
            None => {
                let prefix = format!("{}doc:", self.prefix);
                let mut out: Vec<String> = self
                    .store
                    .keys()
                    .await?
                    .into_iter()
                    .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
                    .collect();
                out.sort();
                Ok(out)
            }
        }
    }

    async fn get_attachment(&self, doc_key: &str, attach_key: &str) -> BackendResult<Bytes> {
        self.store
            .get(&self.attach_storage_key(doc_key, attach_key))
            .await?
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
        self.store
            .set(&self.attach_storage_key(doc_key, attach_key), data)
            .await
    }

    async fn remove_attachment(&self, doc_key: &str, attach_key: &str) -> BackendResult<()> {
        self.store
            .remove(&self.attach_storage_key(doc_key, attach_key))
            .await?;
        self.handles
            .lock()
            .by_handle
            .retain(|_, addr| !(addr.0 == doc_key && addr.1 == attach_key));
        Ok(())
    }

    async fn get_all_attachments(&self, doc_key: &str) -> BackendResult<Vec<AttachmentEntry>> {
        let mut entries = Vec::new();
        for attach_key in self.attachment_keys_under(doc_key).await? {
            let data = self.get_attachment(doc_key, &attach_key).await?;
            entries.push(AttachmentEntry { attach_key, data });
        }
        Ok(entries)
    }

    async fn get_attachment_handle(
        &self,
        doc_key: &str,
        attach_key: &str,
    ) -> BackendResult<ResourceHandle> {
        // Probe existence first so absent attachments surface NotFound.
        self.get_attachment(doc_key, attach_key).await?;
        Ok(self.mint_handle(doc_key, attach_key))
    }

    async fn get_all_attachment_handles(
        &self,
        doc_key: &str,
    ) -> BackendResult<Vec<HandleEntry>> {
        let mut entries = Vec::new();
        for attach_key in self.attachment_keys_under(doc_key).await? {
            let handle = self.mint_handle(doc_key, &attach_key);
            entries.push(HandleEntry {
                doc_key: doc_key.to_string(),
                attach_key,
                handle,
            });
        }
        Ok(entries)
    }

    async fn release_attachment_handle(&self, handle: &ResourceHandle) -> BackendResult<()> {
        self.handles.lock().by_handle.remove(handle);
        Ok(())
    }

    async fn clear(&self) -> BackendResult<()> {
        for key in self.store.keys().await? {
            if key.starts_with(&self.prefix) {
                self.store.remove(&key).await?;
            }
        }
        self.handles.lock().by_handle.clear();
        Ok(())
    }
}

/// Factory for the key-value fallback. Assumed to always succeed as long as
/// the injected store is reachable.
pub struct KvAdapterFactory {
    store: Arc<dyn KeyValueStore>,
}

impl KvAdapterFactory {
    /// Creates a factory over the host's minimal key-value store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AdapterFactory for KvAdapterFactory {
    fn kind(&self) -> BackendKind {
        BackendKind::KeyValue
    }

    async fn init(&self, config: &AdapterConfig) -> BackendResult<Arc<dyn BackendAdapter>> {
        Ok(Arc::new(KvAdapter::new(
            Arc::clone(&self.store),
            &config.name,
        )))
    }
}
