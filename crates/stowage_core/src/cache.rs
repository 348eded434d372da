//! Resource-handle cache.
//!
//! A pipeline handler that front-runs handle traffic. It keeps a forward
//! index (address to handle) and a reverse index (handle to address),
//! coalesces concurrent requests for the same address into one backend
//! call, and keeps both indices consistent with mutations flowing through
//! the chain: overwriting or removing an attachment expunges its cached
//! handle, removing a document expunges every handle under it, and
//! `clear` empties everything.
//!
//! When revocation management is on (the default) the cache also releases
//! handles it expunges, re-entering the pipeline with the cache bypass
//! flag so its own release interceptor stays out of the way. Bookkeeping
//! runs only on success paths; errors from wrapped operations propagate
//! untouched.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::StoreResult;
use crate::pipeline::{Next, Pipeline, ReleaseOptions, StoreHandler};
use stowage_backend::{HandleEntry, ResourceHandle};

/// The name the cache registers itself under.
pub const HANDLE_CACHE_NAME: &str = "handle-cache";

/// Cache behavior switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// Release handles the cache expunges. On by default; turn off when
    /// the embedder owns handle lifetimes itself.
    pub manage_revocation: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            manage_revocation: true,
        }
    }
}

type PendingHandle = Shared<BoxFuture<'static, StoreResult<ResourceHandle>>>;

#[derive(Default)]
struct CacheState {
    /// doc key -> attach key -> handle.
    forward: HashMap<String, HashMap<String, ResourceHandle>>,
    /// handle -> (doc key, attach key).
    reverse: HashMap<ResourceHandle, (String, String)>,
    /// Addresses with a handle request in flight.
    pending: HashMap<(String, String), PendingHandle>,
}

impl CacheState {
    /// Removes the cached handle for one address from both indices.
    fn expunge_address(&mut self, doc_key: &str, attach_key: &str) -> Option<ResourceHandle> {
        let handle = self.forward.get_mut(doc_key)?.remove(attach_key)?;
        if self.forward.get(doc_key).is_some_and(HashMap::is_empty) {
            self.forward.remove(doc_key);
        }
        self.reverse.remove(&handle);
        Some(handle)
    }

    /// Records a handle in both indices, returning a displaced stale
    /// handle for the same address (if it differs from the new one).
    fn record(
        &mut self,
        doc_key: &str,
        attach_key: &str,
        handle: &ResourceHandle,
    ) -> Option<ResourceHandle> {
        let displaced = self
            .forward
            .entry(doc_key.to_string())
            .or_default()
            .insert(attach_key.to_string(), handle.clone());
        if let Some(stale) = &displaced {
            self.reverse.remove(stale);
        }
        self.reverse.insert(
            handle.clone(),
            (doc_key.to_string(), attach_key.to_string()),
        );
        displaced.filter(|stale| stale != handle)
    }
}

/// The cache handler. Construct and splice in with [`HandleCache::install`].
pub struct HandleCache {
    /// Back-reference for re-entrant revocation; weak so the cache does
    /// not keep its own pipeline alive.
    pipeline: Weak<Pipeline>,
    manage_revocation: bool,
    state: Mutex<CacheState>,
}

impl HandleCache {
    /// Builds the cache and registers it at the front of `pipeline`.
    pub fn install(pipeline: &Arc<Pipeline>, options: CacheOptions) -> Arc<Self> {
        let cache = Arc::new(Self {
            pipeline: Arc::downgrade(pipeline),
            manage_revocation: options.manage_revocation,
            state: Mutex::new(CacheState::default()),
        });
        pipeline.add_first(HANDLE_CACHE_NAME, Arc::clone(&cache) as Arc<dyn StoreHandler>);
        cache
    }

    /// Releases a handle the cache expunged, re-entering the pipeline
    /// with the bypass flag set. Failures are logged, not surfaced: the
    /// triggering operation already succeeded.
    async fn revoke(&self, handle: ResourceHandle) {
        if !self.manage_revocation {
            return;
        }
        let Some(pipeline) = self.pipeline.upgrade() else {
            return;
        };
        if let Err(error) = pipeline
            .context()
            .release_attachment_handle(handle.clone(), ReleaseOptions::bypassing_cache())
            .await
        {
            debug!(%handle, %error, "releasing stale handle failed");
        }
    }

    async fn revoke_all(&self, handles: Vec<ResourceHandle>) {
        for handle in handles {
            self.revoke(handle).await;
        }
    }
}

#[async_trait]
impl StoreHandler for HandleCache {
    async fn get_attachment_handle(
        &self,
        next: Next,
        doc_key: String,
        attach_key: String,
    ) -> StoreResult<ResourceHandle> {
        let address = (doc_key.clone(), attach_key.clone());
        let shared = {
            let mut state = self.state.lock();
            if let Some(handle) = state.forward.get(&doc_key).and_then(|s| s.get(&attach_key)) {
                return Ok(handle.clone());
            }
            match state.pending.get(&address) {
                Some(pending) => {
                    debug!(doc_key, attach_key, "coalescing in-flight handle request");
                    pending.clone()
                }
                None => {
                    let pending = next
                        .get_attachment_handle(doc_key.clone(), attach_key.clone())
                        .shared();
                    state.pending.insert(address.clone(), pending.clone());
                    pending
                }
            }
        };

        let result = shared.await;

        // First waiter through the lock settles the entry; bookkeeping
        // happens exactly once per request, on success or failure alike.
        let displaced = {
            let mut state = self.state.lock();
            if state.pending.remove(&address).is_some() {
                match &result {
                    Ok(handle) => state.record(&doc_key, &attach_key, handle),
                    Err(_) => None,
                }
            } else {
                None
            }
        };
        if let Some(stale) = displaced {
            self.revoke(stale).await;
        }
        result
    }

    async fn get_all_attachment_handles(
        &self,
        next: Next,
        doc_key: String,
    ) -> StoreResult<Vec<HandleEntry>> {
        let entries = next.get_all_attachment_handles(doc_key).await?;
        let displaced: Vec<ResourceHandle> = {
            let mut state = self.state.lock();
            entries
                .iter()
                .filter_map(|e| state.record(&e.doc_key, &e.attach_key, &e.handle))
                .collect()
        };
        self.revoke_all(displaced).await;
        Ok(entries)
    }

    async fn set_attachment(
        &self,
        next: Next,
        doc_key: String,
        attach_key: String,
        data: Bytes,
    ) -> StoreResult<()> {
        let stale = self.state.lock().expunge_address(&doc_key, &attach_key);
        if let Some(handle) = stale {
            self.revoke(handle).await;
        }
        next.set_attachment(doc_key, attach_key, data).await
    }

    async fn remove_attachment(
        &self,
        next: Next,
        doc_key: String,
        attach_key: String,
    ) -> StoreResult<()> {
        let stale = self.state.lock().expunge_address(&doc_key, &attach_key);
        if let Some(handle) = stale {
            self.revoke(handle).await;
        }
        next.remove_attachment(doc_key, attach_key).await
    }

    async fn remove(&self, next: Next, doc_key: String) -> StoreResult<()> {
        let stale: Vec<ResourceHandle> = {
            let mut state = self.state.lock();
            let mut stale = Vec::new();
            if let Some(sub) = state.forward.remove(&doc_key) {
                for handle in sub.into_values() {
                    state.reverse.remove(&handle);
                    stale.push(handle);
                }
            }
            stale
        };
        self.revoke_all(stale).await;
        next.remove(doc_key).await
    }

    async fn release_attachment_handle(
        &self,
        next: Next,
        handle: ResourceHandle,
        options: ReleaseOptions,
    ) -> StoreResult<()> {
        // Bypassed releases come from the cache's own revocation path;
        // the indices were already updated.
        if !options.bypass_handle_cache {
            let mut state = self.state.lock();
            if let Some((doc_key, attach_key)) = state.reverse.remove(&handle) {
                let emptied = state
                    .forward
                    .get_mut(&doc_key)
                    .map_or(false, |sub| {
                        sub.remove(&attach_key);
                        sub.is_empty()
                    });
                if emptied {
                    state.forward.remove(&doc_key);
                }
            }
        }
        next.release_attachment_handle(handle, options).await
    }

    async fn clear(&self, next: Next) -> StoreResult<()> {
        let live: Vec<ResourceHandle> = {
            let mut state = self.state.lock();
            state.forward.clear();
            // In-flight handle requests settle uncached after this.
            state.pending.clear();
            state.reverse.drain().map(|(handle, _)| handle).collect()
        };
        self.revoke_all(live).await;
        next.clear().await
    }
}

#[cfg(test)]
impl HandleCache {
    fn cached(&self, doc_key: &str, attach_key: &str) -> Option<ResourceHandle> {
        self.state
            .lock()
            .forward
            .get(doc_key)
            .and_then(|s| s.get(attach_key).cloned())
    }

    fn forward_is_empty(&self) -> bool {
        self.state.lock().forward.is_empty()
    }

    fn reverse_is_empty(&self) -> bool {
        self.state.lock().reverse.is_empty()
    }

    fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::pipeline::MissingTargetPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use stowage_backend::{
        AttachmentEntry, BackendAdapter, BackendError, BackendKind, BackendResult, MemoryAdapter,
    };

    /// Wraps an adapter, counting handle requests and recording releases.
    /// Handle requests yield once before delegating so concurrent callers
    /// genuinely overlap under a single-threaded test runtime.
    struct Instrumented {
        inner: MemoryAdapter,
        handle_calls: AtomicUsize,
        released: Mutex<Vec<ResourceHandle>>,
    }

    impl Instrumented {
        fn new() -> Self {
            Self {
                inner: MemoryAdapter::new(),
                handle_calls: AtomicUsize::new(0),
                released: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BackendAdapter for Instrumented {
        fn kind(&self) -> BackendKind {
            self.inner.kind()
        }

        fn supports_attachments(&self) -> bool {
            self.inner.supports_attachments()
        }

        async fn get_contents(&self, doc_key: &str) -> BackendResult<Bytes> {
            self.inner.get_contents(doc_key).await
        }

        async fn set_contents(&self, doc_key: &str, data: Bytes) -> BackendResult<()> {
            self.inner.set_contents(doc_key, data).await
        }

        async fn remove(&self, doc_key: &str) -> BackendResult<()> {
            self.inner.remove(doc_key).await
        }

        async fn list(&self, doc_key: Option<&str>) -> BackendResult<Vec<String>> {
            self.inner.list(doc_key).await
        }

        async fn get_attachment(&self, doc_key: &str, attach_key: &str) -> BackendResult<Bytes> {
            self.inner.get_attachment(doc_key, attach_key).await
        }

        async fn set_attachment(
            &self,
            doc_key: &str,
            attach_key: &str,
            data: Bytes,
        ) -> BackendResult<()> {
            self.inner.set_attachment(doc_key, attach_key, data).await
        }

        async fn remove_attachment(&self, doc_key: &str, attach_key: &str) -> BackendResult<()> {
            self.inner.remove_attachment(doc_key, attach_key).await
        }

        async fn get_all_attachments(
            &self,
            doc_key: &str,
        ) -> BackendResult<Vec<AttachmentEntry>> {
            self.inner.get_all_attachments(doc_key).await
        }

        async fn get_attachment_handle(
            &self,
            doc_key: &str,
            attach_key: &str,
        ) -> BackendResult<ResourceHandle> {
            self.handle_calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.inner.get_attachment_handle(doc_key, attach_key).await
        }

        async fn get_all_attachment_handles(
            &self,
            doc_key: &str,
        ) -> BackendResult<Vec<HandleEntry>> {
            self.inner.get_all_attachment_handles(doc_key).await
        }

        async fn release_attachment_handle(&self, handle: &ResourceHandle) -> BackendResult<()> {
            self.released.lock().push(handle.clone());
            self.inner.release_attachment_handle(handle).await
        }

        async fn clear(&self) -> BackendResult<()> {
            self.inner.clear().await
        }
    }

    struct Harness {
        pipeline: Arc<Pipeline>,
        cache: Arc<HandleCache>,
        adapter: Arc<Instrumented>,
    }

    impl Harness {
        fn new(options: CacheOptions) -> Self {
            let pipeline = Arc::new(Pipeline::new(MissingTargetPolicy::Ignore));
            let adapter = Arc::new(Instrumented::new());
            pipeline.bind_terminal(Arc::clone(&adapter) as Arc<dyn BackendAdapter>);
            let cache = HandleCache::install(&pipeline, options);
            Self {
                pipeline,
                cache,
                adapter,
            }
        }

        async fn put(&self, doc: &str, attach: &str, data: &'static [u8]) {
            self.pipeline
                .context()
                .set_attachment(doc.into(), attach.into(), Bytes::from_static(data))
                .await
                .unwrap();
        }

        async fn handle(&self, doc: &str, attach: &str) -> StoreResult<ResourceHandle> {
            self.pipeline
                .context()
                .get_attachment_handle(doc.into(), attach.into())
                .await
        }

        fn handle_calls(&self) -> usize {
            self.adapter.handle_calls.load(Ordering::SeqCst)
        }

        fn released(&self) -> Vec<ResourceHandle> {
            self.adapter.released.lock().clone()
        }
    }

    #[tokio::test]
    async fn repeated_requests_hit_the_cache() {
        let h = Harness::new(CacheOptions::default());
        h.put("doc", "a", b"bytes").await;

        let first = h.handle("doc", "a").await.unwrap();
        let second = h.handle("doc", "a").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(h.handle_calls(), 1);
        assert_eq!(h.cache.cached("doc", "a"), Some(first));
    }

    #[tokio::test]
    async fn concurrent_requests_coalesce_into_one_backend_call() {
        let h = Harness::new(CacheOptions::default());
        h.put("doc", "a", b"bytes").await;

        let (first, second) = tokio::join!(h.handle("doc", "a"), h.handle("doc", "a"));
        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(h.handle_calls(), 1);
        assert_eq!(h.cache.pending_len(), 0);
    }

    #[tokio::test]
    async fn failed_request_clears_the_pending_entry() {
        let h = Harness::new(CacheOptions::default());

        let err = h.handle("doc", "missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(h.cache.pending_len(), 0);
        assert!(h.cache.forward_is_empty());

        // the address is probed again, not served a cached failure
        let _ = h.handle("doc", "missing").await;
        assert_eq!(h.handle_calls(), 2);
    }

    #[tokio::test]
    async fn overwriting_an_attachment_expunges_and_revokes() {
        let h = Harness::new(CacheOptions::default());
        h.put("doc", "a", b"v1").await;
        let stale = h.handle("doc", "a").await.unwrap();

        h.put("doc", "a", b"v2").await;
        assert_eq!(h.cache.cached("doc", "a"), None);
        assert_eq!(h.released(), vec![stale.clone()]);

        let fresh = h.handle("doc", "a").await.unwrap();
        assert_ne!(fresh, stale);
        assert_eq!(h.handle_calls(), 2);
    }

    #[tokio::test]
    async fn removing_an_attachment_expunges_and_revokes() {
        let h = Harness::new(CacheOptions::default());
        h.put("doc", "a", b"v").await;
        let stale = h.handle("doc", "a").await.unwrap();

        h.pipeline
            .context()
            .remove_attachment("doc".into(), "a".into())
            .await
            .unwrap();
        assert!(h.cache.forward_is_empty());
        assert!(h.cache.reverse_is_empty());
        assert_eq!(h.released(), vec![stale]);

        assert!(h.handle("doc", "a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn removing_a_document_expunges_every_handle_under_it() {
        let h = Harness::new(CacheOptions::default());
        h.put("doc", "a", b"1").await;
        h.put("doc", "b", b"2").await;
        h.put("other", "c", b"3").await;
        let ha = h.handle("doc", "a").await.unwrap();
        let hb = h.handle("doc", "b").await.unwrap();
        let hc = h.handle("other", "c").await.unwrap();

        h.pipeline.context().remove("doc".into()).await.unwrap();

        assert_eq!(h.cache.cached("doc", "a"), None);
        assert_eq!(h.cache.cached("doc", "b"), None);
        assert_eq!(h.cache.cached("other", "c"), Some(hc));
        let mut released = h.released();
        released.sort();
        let mut expected = vec![ha, hb];
        expected.sort();
        assert_eq!(released, expected);
    }

    #[tokio::test]
    async fn clear_revokes_and_empties_both_indices() {
        let h = Harness::new(CacheOptions::default());
        h.put("doc", "a", b"1").await;
        h.put("other", "b", b"2").await;
        let _ = h.handle("doc", "a").await.unwrap();
        let _ = h.handle("other", "b").await.unwrap();

        h.pipeline.context().clear().await.unwrap();

        assert!(h.cache.forward_is_empty());
        assert!(h.cache.reverse_is_empty());
        assert_eq!(h.released().len(), 2);
    }

    #[tokio::test]
    async fn caller_release_expunges_without_revoking_again() {
        let h = Harness::new(CacheOptions::default());
        h.put("doc", "a", b"v").await;
        let handle = h.handle("doc", "a").await.unwrap();

        h.pipeline
            .context()
            .release_attachment_handle(handle.clone(), ReleaseOptions::default())
            .await
            .unwrap();

        assert!(h.cache.forward_is_empty());
        assert!(h.cache.reverse_is_empty());
        // exactly one terminal release: the caller's own, forwarded
        assert_eq!(h.released(), vec![handle.clone()]);

        // releasing again is a no-op at the cache, still forwarded
        h.pipeline
            .context()
            .release_attachment_handle(handle.clone(), ReleaseOptions::default())
            .await
            .unwrap();
        assert_eq!(h.released(), vec![handle.clone(), handle]);
    }

    #[tokio::test]
    async fn bulk_handles_populate_the_indices() {
        let h = Harness::new(CacheOptions::default());
        h.put("doc", "a", b"1").await;
        h.put("doc", "b", b"2").await;

        let entries = h
            .pipeline
            .context()
            .get_all_attachment_handles("doc".into())
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        for entry in &entries {
            assert_eq!(
                h.cache.cached(&entry.doc_key, &entry.attach_key),
                Some(entry.handle.clone())
            );
        }
        // follow-up singles are served from the cache
        let calls = h.handle_calls();
        let _ = h.handle("doc", "a").await.unwrap();
        assert_eq!(h.handle_calls(), calls);
    }

    #[tokio::test]
    async fn revocation_management_can_be_disabled() {
        let h = Harness::new(CacheOptions {
            manage_revocation: false,
        });
        h.put("doc", "a", b"v1").await;
        let _ = h.handle("doc", "a").await.unwrap();

        h.put("doc", "a", b"v2").await;
        assert_eq!(h.cache.cached("doc", "a"), None);
        assert!(h.released().is_empty());
    }

    #[tokio::test]
    async fn install_registers_at_the_front() {
        let h = Harness::new(CacheOptions::default());
        assert_eq!(h.pipeline.handler_names(), vec![HANDLE_CACHE_NAME]);
    }

    #[tokio::test]
    async fn wrapped_errors_propagate_untouched() {
        let h = Harness::new(CacheOptions::default());
        let err = h.handle("ghost", "a").await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Backend(BackendError::AttachmentNotFound {
                doc_key: "ghost".into(),
                attach_key: "a".into(),
            })
        );
    }
}
