//! The store facade.
//!
//! Construction returns immediately; backend selection runs on a spawned
//! task and resolves a shared init future. Every data operation checks
//! readiness, then dispatches through the pipeline to whatever chain and
//! terminal adapter are currently installed.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::warn;

use crate::cache::{CacheOptions, HandleCache};
use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::pipeline::{HandlerEntry, Next, Pipeline, ReleaseOptions, StoreHandler, Target};
use crate::selector::{select_backend, AdapterRegistry, SelectionState};
use crate::session::{MigrationSignal, SessionMeta, SessionStore};
use stowage_backend::{
    AttachmentEntry, BackendKind, HandleEntry, KeyValueStore, KvAdapterFactory, ResourceHandle,
};

/// Sentinel document key for attachments stored without a parent document.
///
/// Attachment operations normalize an empty doc key to this value, so the
/// two spellings address the same attachment.
pub const NO_DOC_KEY: &str = "__nodoc__";

type InitFuture = Shared<BoxFuture<'static, StoreResult<BackendKind>>>;

struct FacadeState {
    selection: SelectionState,
    migration: Option<MigrationSignal>,
}

/// A key-plus-attachment store over a host-selected backend.
///
/// Open with [`Store::open`] inside a tokio runtime. Until
/// [`Store::initialized`] resolves, every data operation fails fast with
/// [`StoreError::NotReady`]; pipeline management is available immediately
/// so collaborators can install themselves before first use.
pub struct Store {
    pipeline: Arc<Pipeline>,
    state: Arc<RwLock<FacadeState>>,
    init: InitFuture,
}

impl Store {
    /// Opens a store: spawns the selection task and returns at once.
    ///
    /// `registry` supplies the probe candidates; `kv` is the host's
    /// minimal store, used for the cross-session selection record and for
    /// the key-value fallback. Unless the registry already carries its own
    /// fallback candidate, one over `kv` is pre-seeded, so an otherwise
    /// empty registry still yields a minimally available store.
    pub fn open(config: Config, mut registry: AdapterRegistry, kv: Arc<dyn KeyValueStore>) -> Self {
        if !registry.contains(BackendKind::KeyValue) {
            registry.register(Arc::new(KvAdapterFactory::new(Arc::clone(&kv))));
        }

        let pipeline = Arc::new(Pipeline::new(config.missing_target_policy));
        let state = Arc::new(RwLock::new(FacadeState {
            selection: SelectionState::Unselected,
            migration: None,
        }));
        let session = SessionStore::new(kv, &config.name);

        let task = {
            let pipeline = Arc::clone(&pipeline);
            let state = Arc::clone(&state);
            async move {
                let meta = session.load().await?;
                let adapter = select_backend(&registry, &config, |s| {
                    state.write().selection = s;
                })
                .await?;
                let kind = adapter.kind();

                if let Some(previous) = meta.last_backend {
                    if previous != kind {
                        warn!(
                            store = %config.name,
                            from = %previous,
                            to = %kind,
                            "backend changed since last session; existing data is not visible"
                        );
                        state.write().migration = Some(MigrationSignal {
                            from: previous,
                            to: kind,
                        });
                    }
                }

                pipeline.bind_terminal(adapter);
                session
                    .save(&SessionMeta {
                        last_backend: Some(kind),
                    })
                    .await?;
                Ok(kind)
            }
        };

        let handle = tokio::spawn(task);
        let init = async move {
            match handle.await {
                Ok(result) => result,
                Err(join) => Err(StoreError::Selection(join.to_string())),
            }
        }
        .boxed()
        .shared();

        Self {
            pipeline,
            state,
            init,
        }
    }

    /// Resolves once selection finishes, with the bound backend kind.
    ///
    /// Cloneable rendezvous: any number of callers may await it, before
    /// or after resolution.
    pub async fn initialized(&self) -> StoreResult<BackendKind> {
        self.init.clone().await
    }

    /// True once an adapter is bound.
    pub fn ready(&self) -> bool {
        matches!(self.state.read().selection, SelectionState::Bound(_))
    }

    /// Current progress of the selection cascade.
    pub fn selection_state(&self) -> SelectionState {
        self.state.read().selection
    }

    /// The bound backend kind, if ready.
    pub fn backend_kind(&self) -> Option<BackendKind> {
        match self.state.read().selection {
            SelectionState::Bound(kind) => Some(kind),
            _ => None,
        }
    }

    /// Whether the bound adapter fully supports attachments. False while
    /// not ready and false in degraded fallback mode.
    pub fn supports_attachments(&self) -> bool {
        self.pipeline
            .terminal()
            .map_or(false, |adapter| adapter.supports_attachments())
    }

    /// The migration signal, if this session bound a different backend
    /// than the last one. Acting on it is the embedder's job.
    pub fn migration_signal(&self) -> Option<MigrationSignal> {
        self.state.read().migration
    }

    fn ctx(&self) -> StoreResult<Next> {
        if self.ready() {
            Ok(self.pipeline.context())
        } else {
            Err(StoreError::NotReady)
        }
    }

    fn doc_key(raw: &str) -> String {
        if raw.is_empty() {
            NO_DOC_KEY.to_string()
        } else {
            raw.to_string()
        }
    }

    // ---- data surface -------------------------------------------------

    /// Reads a document's contents.
    pub async fn get_contents(&self, doc_key: &str) -> StoreResult<Bytes> {
        self.ctx()?.get_contents(doc_key.to_string()).await
    }

    /// Writes a document's contents.
    pub async fn set_contents(&self, doc_key: &str, data: impl Into<Bytes>) -> StoreResult<()> {
        self.ctx()?.set_contents(doc_key.to_string(), data.into()).await
    }

    /// Removes a document and everything attached to it.
    pub async fn remove(&self, doc_key: &str) -> StoreResult<()> {
        self.ctx()?.remove(doc_key.to_string()).await
    }

    /// Without a key, lists document keys; with one, lists that
    /// document's attachment keys.
    pub async fn list(&self, doc_key: Option<&str>) -> StoreResult<Vec<String>> {
        self.ctx()?.list(doc_key.map(str::to_string)).await
    }

    /// Reads one attachment.
    pub async fn get_attachment(&self, doc_key: &str, attach_key: &str) -> StoreResult<Bytes> {
        self.ctx()?
            .get_attachment(Self::doc_key(doc_key), attach_key.to_string())
            .await
    }

    /// Writes one attachment.
    pub async fn set_attachment(
        &self,
        doc_key: &str,
        attach_key: &str,
        data: impl Into<Bytes>,
    ) -> StoreResult<()> {
        self.ctx()?
            .set_attachment(Self::doc_key(doc_key), attach_key.to_string(), data.into())
            .await
    }

    /// Removes one attachment.
    pub async fn remove_attachment(&self, doc_key: &str, attach_key: &str) -> StoreResult<()> {
        self.ctx()?
            .remove_attachment(Self::doc_key(doc_key), attach_key.to_string())
            .await
    }

    /// Reads every attachment under a document.
    pub async fn get_all_attachments(&self, doc_key: &str) -> StoreResult<Vec<AttachmentEntry>> {
        self.ctx()?.get_all_attachments(Self::doc_key(doc_key)).await
    }

    /// Obtains a transient handle to one attachment's content. Release it
    /// with [`Store::release_attachment_handle`] when done.
    pub async fn get_attachment_handle(
        &self,
        doc_key: &str,
        attach_key: &str,
    ) -> StoreResult<ResourceHandle> {
        self.ctx()?
            .get_attachment_handle(Self::doc_key(doc_key), attach_key.to_string())
            .await
    }

    /// Obtains handles for every attachment under a document.
    pub async fn get_all_attachment_handles(
        &self,
        doc_key: &str,
    ) -> StoreResult<Vec<HandleEntry>> {
        self.ctx()?
            .get_all_attachment_handles(Self::doc_key(doc_key))
            .await
    }

    /// Releases a handle obtained from this store.
    pub async fn release_attachment_handle(&self, handle: ResourceHandle) -> StoreResult<()> {
        self.release_attachment_handle_with(handle, ReleaseOptions::default())
            .await
    }

    /// Releases a handle with explicit options.
    pub async fn release_attachment_handle_with(
        &self,
        handle: ResourceHandle,
        options: ReleaseOptions,
    ) -> StoreResult<()> {
        self.ctx()?.release_attachment_handle(handle, options).await
    }

    /// Removes every document and attachment in the store. The
    /// cross-session selection record is kept.
    pub async fn clear(&self) -> StoreResult<()> {
        self.ctx()?.clear().await
    }

    /// Total capacity in bytes, or `-1` when the backend cannot say.
    pub async fn get_capacity(&self) -> StoreResult<i64> {
        let capacity = self.ctx()?.capacity().await?;
        Ok(capacity.map_or(-1, |bytes| bytes as i64))
    }

    // ---- pipeline management -----------------------------------------

    /// Installs the handle cache at the front of the pipeline.
    pub fn install_handle_cache(&self, options: CacheOptions) -> Arc<HandleCache> {
        HandleCache::install(&self.pipeline, options)
    }

    /// Inserts a handler at the front of the chain.
    pub fn add_first(&self, name: impl Into<String>, handler: Arc<dyn StoreHandler>) {
        self.pipeline.add_first(name, handler);
    }

    /// Inserts a handler at the back of the chain.
    pub fn add_last(&self, name: impl Into<String>, handler: Arc<dyn StoreHandler>) {
        self.pipeline.add_last(name, handler);
    }

    /// Inserts a handler immediately before `target`.
    pub fn add_before(
        &self,
        target: Target<'_>,
        name: impl Into<String>,
        handler: Arc<dyn StoreHandler>,
    ) -> StoreResult<()> {
        self.pipeline.add_before(target, name, handler)
    }

    /// Inserts a handler immediately after `target`.
    pub fn add_after(
        &self,
        target: Target<'_>,
        name: impl Into<String>,
        handler: Arc<dyn StoreHandler>,
    ) -> StoreResult<()> {
        self.pipeline.add_after(target, name, handler)
    }

    /// Replaces `target` with a new handler.
    pub fn replace(
        &self,
        target: Target<'_>,
        name: impl Into<String>,
        handler: Arc<dyn StoreHandler>,
    ) -> StoreResult<()> {
        self.pipeline.replace(target, name, handler)
    }

    /// Removes and returns the front handler.
    pub fn remove_first(&self) -> Option<HandlerEntry> {
        self.pipeline.remove_first()
    }

    /// Removes and returns the back handler.
    pub fn remove_last(&self) -> Option<HandlerEntry> {
        self.pipeline.remove_last()
    }

    /// Removes `target` from the chain.
    pub fn remove_handler(&self, target: Target<'_>) -> StoreResult<()> {
        self.pipeline.remove(target)
    }

    /// Names of installed handlers, front to back.
    pub fn handler_names(&self) -> Vec<String> {
        self.pipeline.handler_names()
    }
}
