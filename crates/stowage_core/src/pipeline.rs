//! Call-interception pipeline.
//!
//! Every store operation threads through an ordered chain of
//! [`StoreHandler`]s before reaching the terminal slot, which holds the
//! bound backend adapter once selection completes. Handlers intercept only
//! the operations they override; every other operation forwards unchanged
//! through the trait's default bodies.
//!
//! Each invocation captures an [`Arc`] snapshot of the current handler list
//! into a [`Next`] continuation, so reconfiguring the pipeline never
//! disturbs invocations already in flight. `Next` methods consume the
//! continuation, making every handler single-shot: a handler may forward
//! zero times (short-circuit) or once, never more.
//!
//! The pipeline is a transparent conduit: it never catches, wraps, or
//! retries errors from handlers or the terminal.

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::sync::Arc;
use stowage_backend::{AttachmentEntry, BackendAdapter, HandleEntry, ResourceHandle};

/// Options carried by the release operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseOptions {
    /// Skip handle-cache bookkeeping for this release.
    ///
    /// Set by the cache itself when it revokes internally, so its own
    /// release interceptor does not invalidate an already-invalidated
    /// entry twice.
    pub bypass_handle_cache: bool,
}

impl ReleaseOptions {
    /// Options for a cache-bypassing release.
    #[must_use]
    pub fn bypassing_cache() -> Self {
        Self {
            bypass_handle_cache: true,
        }
    }
}

/// A pipeline handler.
///
/// One method per operation in the fixed set; every default body forwards
/// the call unchanged to the next handler. Implementors override only the
/// operations they intercept and may:
///
/// - short-circuit by returning without consuming `next`
/// - transform arguments or the result around a single `next` call
/// - observe and forward as-is
#[allow(missing_docs)] // the operation set is documented on the facade
#[async_trait]
pub trait StoreHandler: Send + Sync {
    async fn get_contents(&self, next: Next, doc_key: String) -> StoreResult<Bytes> {
        next.get_contents(doc_key).await
    }

    async fn set_contents(&self, next: Next, doc_key: String, data: Bytes) -> StoreResult<()> {
        next.set_contents(doc_key, data).await
    }

    async fn remove(&self, next: Next, doc_key: String) -> StoreResult<()> {
        next.remove(doc_key).await
    }

    async fn list(&self, next: Next, doc_key: Option<String>) -> StoreResult<Vec<String>> {
        next.list(doc_key).await
    }

    async fn get_attachment(
        &self,
        next: Next,
        doc_key: String,
        attach_key: String,
    ) -> StoreResult<Bytes> {
        next.get_attachment(doc_key, attach_key).await
    }

    async fn set_attachment(
        &self,
        next: Next,
        doc_key: String,
        attach_key: String,
        data: Bytes,
    ) -> StoreResult<()> {
        next.set_attachment(doc_key, attach_key, data).await
    }

    async fn remove_attachment(
        &self,
        next: Next,
        doc_key: String,
        attach_key: String,
    ) -> StoreResult<()> {
        next.remove_attachment(doc_key, attach_key).await
    }

    async fn get_all_attachments(
        &self,
        next: Next,
        doc_key: String,
    ) -> StoreResult<Vec<AttachmentEntry>> {
        next.get_all_attachments(doc_key).await
    }

    async fn get_attachment_handle(
        &self,
        next: Next,
        doc_key: String,
        attach_key: String,
    ) -> StoreResult<ResourceHandle> {
        next.get_attachment_handle(doc_key, attach_key).await
    }

    async fn get_all_attachment_handles(
        &self,
        next: Next,
        doc_key: String,
    ) -> StoreResult<Vec<HandleEntry>> {
        next.get_all_attachment_handles(doc_key).await
    }

    async fn release_attachment_handle(
        &self,
        next: Next,
        handle: ResourceHandle,
        options: ReleaseOptions,
    ) -> StoreResult<()> {
        next.release_attachment_handle(handle, options).await
    }

    async fn clear(&self, next: Next) -> StoreResult<()> {
        next.clear().await
    }

    async fn capacity(&self, next: Next) -> StoreResult<Option<u64>> {
        next.capacity().await
    }
}

/// A named handler in the chain.
#[derive(Clone)]
pub struct HandlerEntry {
    /// The name the handler was registered under.
    pub name: String,
    /// The handler itself.
    pub handler: Arc<dyn StoreHandler>,
}

/// Locator for a handler in mutation operations: by registered name or by
/// instance identity.
pub enum Target<'a> {
    /// Match the handler registered under this name.
    Name(&'a str),
    /// Match this exact handler instance.
    Handler(&'a Arc<dyn StoreHandler>),
}

impl Target<'_> {
    fn matches(&self, entry: &HandlerEntry) -> bool {
        match self {
            Target::Name(name) => entry.name == *name,
            Target::Handler(handler) => Arc::ptr_eq(handler, &entry.handler),
        }
    }

    fn describe(&self) -> String {
        match self {
            Target::Name(name) => (*name).to_string(),
            Target::Handler(_) => "<handler instance>".to_string(),
        }
    }
}

impl<'a> From<&'a str> for Target<'a> {
    fn from(name: &'a str) -> Self {
        Target::Name(name)
    }
}

impl<'a> From<&'a Arc<dyn StoreHandler>> for Target<'a> {
    fn from(handler: &'a Arc<dyn StoreHandler>) -> Self {
        Target::Handler(handler)
    }
}

/// Behavior when a relative mutation names a target that is not installed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingTargetPolicy {
    /// Silently leave the chain unchanged.
    #[default]
    Ignore,
    /// Fail the mutation with [`StoreError::HandlerNotFound`].
    Error,
}

/// The per-invocation continuation.
///
/// An owned cursor over an immutable snapshot of the handler list taken at
/// dispatch time. Every operation method consumes `self` and returns a
/// `'static` boxed future, so handlers (the cache in particular) can wrap,
/// store, and share forwarded continuations.
pub struct Next {
    handlers: Arc<[HandlerEntry]>,
    index: usize,
    terminal: Option<Arc<dyn BackendAdapter>>,
}

enum Step {
    Handler(Arc<dyn StoreHandler>, Next),
    Bound(Arc<dyn BackendAdapter>),
    Unbound,
}

impl Next {
    fn step(mut self) -> Step {
        if self.index < self.handlers.len() {
            let handler = Arc::clone(&self.handlers[self.index].handler);
            self.index += 1;
            Step::Handler(handler, self)
        } else {
            match self.terminal {
                Some(adapter) => Step::Bound(adapter),
                None => Step::Unbound,
            }
        }
    }

    /// Number of handlers remaining ahead of this continuation.
    pub fn remaining(&self) -> usize {
        self.handlers.len() - self.index
    }

    /// Forwards a contents read.
    pub fn get_contents(self, doc_key: String) -> BoxFuture<'static, StoreResult<Bytes>> {
        Box::pin(async move {
            match self.step() {
                Step::Handler(handler, next) => handler.get_contents(next, doc_key).await,
                Step::Bound(adapter) => Ok(adapter.get_contents(&doc_key).await?),
                Step::Unbound => Err(StoreError::NotImplemented {
                    operation: "get_contents",
                }),
            }
        })
    }

    /// Forwards a contents write.
    pub fn set_contents(
        self,
        doc_key: String,
        data: Bytes,
    ) -> BoxFuture<'static, StoreResult<()>> {
        Box::pin(async move {
            match self.step() {
                Step::Handler(handler, next) => handler.set_contents(next, doc_key, data).await,
                Step::Bound(adapter) => Ok(adapter.set_contents(&doc_key, data).await?),
                Step::Unbound => Err(StoreError::NotImplemented {
                    operation: "set_contents",
                }),
            }
        })
    }

    /// Forwards a document removal.
    pub fn remove(self, doc_key: String) -> BoxFuture<'static, StoreResult<()>> {
        Box::pin(async move {
            match self.step() {
                Step::Handler(handler, next) => handler.remove(next, doc_key).await,
                Step::Bound(adapter) => Ok(adapter.remove(&doc_key).await?),
                Step::Unbound => Err(StoreError::NotImplemented { operation: "remove" }),
            }
        })
    }

    /// Forwards a listing.
    pub fn list(self, doc_key: Option<String>) -> BoxFuture<'static, StoreResult<Vec<String>>> {
        Box::pin(async move {
            match self.step() {
                Step::Handler(handler, next) => handler.list(next, doc_key).await,
                Step::Bound(adapter) => Ok(adapter.list(doc_key.as_deref()).await?),
                Step::Unbound => Err(StoreError::NotImplemented { operation: "list" }),
            }
        })
    }

    /// Forwards an attachment read.
    pub fn get_attachment(
        self,
        doc_key: String,
        attach_key: String,
    ) -> BoxFuture<'static, StoreResult<Bytes>> {
        Box::pin(async move {
            match self.step() {
                Step::Handler(handler, next) => {
                    handler.get_attachment(next, doc_key, attach_key).await
                }
                Step::Bound(adapter) => Ok(adapter.get_attachment(&doc_key, &attach_key).await?),
                Step::Unbound => Err(StoreError::NotImplemented {
                    operation: "get_attachment",
                }),
            }
        })
    }

    /// Forwards an attachment write.
    pub fn set_attachment(
        self,
        doc_key: String,
        attach_key: String,
        data: Bytes,
    ) -> BoxFuture<'static, StoreResult<()>> {
        Box::pin(async move {
            match self.step() {
                Step::Handler(handler, next) => {
                    handler.set_attachment(next, doc_key, attach_key, data).await
                }
                Step::Bound(adapter) => {
                    Ok(adapter.set_attachment(&doc_key, &attach_key, data).await?)
                }
                Step::Unbound => Err(StoreError::NotImplemented {
                    operation: "set_attachment",
                }),
            }
        })
    }

    /// Forwards an attachment removal.
    pub fn remove_attachment(
        self,
        doc_key: String,
        attach_key: String,
    ) -> BoxFuture<'static, StoreResult<()>> {
        Box::pin(async move {
            match self.step() {
                Step::Handler(handler, next) => {
                    handler.remove_attachment(next, doc_key, attach_key).await
                }
                Step::Bound(adapter) => {
                    Ok(adapter.remove_attachment(&doc_key, &attach_key).await?)
                }
                Step::Unbound => Err(StoreError::NotImplemented {
                    operation: "remove_attachment",
                }),
            }
        })
    }

    /// Forwards a bulk attachment read.
    pub fn get_all_attachments(
        self,
        doc_key: String,
    ) -> BoxFuture<'static, StoreResult<Vec<AttachmentEntry>>> {
        Box::pin(async move {
            match self.step() {
                Step::Handler(handler, next) => handler.get_all_attachments(next, doc_key).await,
                Step::Bound(adapter) => Ok(adapter.get_all_attachments(&doc_key).await?),
                Step::Unbound => Err(StoreError::NotImplemented {
                    operation: "get_all_attachments",
                }),
            }
        })
    }

    /// Forwards a handle request.
    pub fn get_attachment_handle(
        self,
        doc_key: String,
        attach_key: String,
    ) -> BoxFuture<'static, StoreResult<ResourceHandle>> {
        Box::pin(async move {
            match self.step() {
                Step::Handler(handler, next) => {
                    handler.get_attachment_handle(next, doc_key, attach_key).await
                }
                Step::Bound(adapter) => {
                    Ok(adapter.get_attachment_handle(&doc_key, &attach_key).await?)
                }
                Step::Unbound => Err(StoreError::NotImplemented {
                    operation: "get_attachment_handle",
                }),
            }
        })
    }

    /// Forwards a bulk handle request.
    pub fn get_all_attachment_handles(
        self,
        doc_key: String,
    ) -> BoxFuture<'static, StoreResult<Vec<HandleEntry>>> {
        Box::pin(async move {
            match self.step() {
                Step::Handler(handler, next) => {
                    handler.get_all_attachment_handles(next, doc_key).await
                }
                Step::Bound(adapter) => Ok(adapter.get_all_attachment_handles(&doc_key).await?),
                Step::Unbound => Err(StoreError::NotImplemented {
                    operation: "get_all_attachment_handles",
                }),
            }
        })
    }

    /// Forwards a handle release.
    pub fn release_attachment_handle(
        self,
        handle: ResourceHandle,
        options: ReleaseOptions,
    ) -> BoxFuture<'static, StoreResult<()>> {
        Box::pin(async move {
            match self.step() {
                Step::Handler(handler, next) => {
                    handler.release_attachment_handle(next, handle, options).await
                }
                Step::Bound(adapter) => Ok(adapter.release_attachment_handle(&handle).await?),
                Step::Unbound => Err(StoreError::NotImplemented {
                    operation: "release_attachment_handle",
                }),
            }
        })
    }

    /// Forwards a store-wide clear.
    pub fn clear(self) -> BoxFuture<'static, StoreResult<()>> {
        Box::pin(async move {
            match self.step() {
                Step::Handler(handler, next) => handler.clear(next).await,
                Step::Bound(adapter) => Ok(adapter.clear().await?),
                Step::Unbound => Err(StoreError::NotImplemented { operation: "clear" }),
            }
        })
    }

    /// Forwards a capacity query.
    pub fn capacity(self) -> BoxFuture<'static, StoreResult<Option<u64>>> {
        Box::pin(async move {
            match self.step() {
                Step::Handler(handler, next) => handler.capacity(next).await,
                Step::Bound(adapter) => Ok(adapter.capacity()),
                Step::Unbound => Err(StoreError::NotImplemented {
                    operation: "capacity",
                }),
            }
        })
    }
}

struct PipelineState {
    handlers: Vec<HandlerEntry>,
    /// Cached snapshot handed to new invocations; rebuilt on mutation.
    snapshot: Arc<[HandlerEntry]>,
    terminal: Option<Arc<dyn BackendAdapter>>,
}

impl PipelineState {
    fn resnapshot(&mut self) {
        self.snapshot = self.handlers.clone().into();
    }
}

/// The ordered, dynamically reconfigurable handler chain.
///
/// Mutation is expected during setup, before data traffic; invocations
/// already in flight keep the snapshot they started with.
pub struct Pipeline {
    state: RwLock<PipelineState>,
    policy: MissingTargetPolicy,
}

impl Pipeline {
    /// Creates an empty pipeline with an unbound terminal.
    #[must_use]
    pub fn new(policy: MissingTargetPolicy) -> Self {
        Self {
            state: RwLock::new(PipelineState {
                handlers: Vec::new(),
                snapshot: Vec::new().into(),
                terminal: None,
            }),
            policy,
        }
    }

    /// Binds the backend adapter into the terminal slot.
    pub fn bind_terminal(&self, adapter: Arc<dyn BackendAdapter>) {
        self.state.write().terminal = Some(adapter);
    }

    /// Returns the bound terminal adapter, if any.
    pub fn terminal(&self) -> Option<Arc<dyn BackendAdapter>> {
        self.state.read().terminal.clone()
    }

    /// Starts a fresh invocation over the current snapshot.
    #[must_use]
    pub fn context(&self) -> Next {
        let state = self.state.read();
        Next {
            handlers: Arc::clone(&state.snapshot),
            index: 0,
            terminal: state.terminal.clone(),
        }
    }

    /// Inserts a handler at the front of the chain.
    pub fn add_first(&self, name: impl Into<String>, handler: Arc<dyn StoreHandler>) {
        let mut state = self.state.write();
        state.handlers.insert(
            0,
            HandlerEntry {
                name: name.into(),
                handler,
            },
        );
        state.resnapshot();
    }

    /// Inserts a handler at the back of the chain.
    pub fn add_last(&self, name: impl Into<String>, handler: Arc<dyn StoreHandler>) {
        let mut state = self.state.write();
        state.handlers.push(HandlerEntry {
            name: name.into(),
            handler,
        });
        state.resnapshot();
    }

    /// Inserts a handler immediately before `target`.
    pub fn add_before(
        &self,
        target: Target<'_>,
        name: impl Into<String>,
        handler: Arc<dyn StoreHandler>,
    ) -> StoreResult<()> {
        self.insert_relative(target, name.into(), handler, 0)
    }

    /// Inserts a handler immediately after `target`.
    pub fn add_after(
        &self,
        target: Target<'_>,
        name: impl Into<String>,
        handler: Arc<dyn StoreHandler>,
    ) -> StoreResult<()> {
        self.insert_relative(target, name.into(), handler, 1)
    }

    fn insert_relative(
        &self,
        target: Target<'_>,
        name: String,
        handler: Arc<dyn StoreHandler>,
        offset: usize,
    ) -> StoreResult<()> {
        let mut state = self.state.write();
        match state.handlers.iter().position(|e| target.matches(e)) {
            Some(i) => {
                state.handlers.insert(i + offset, HandlerEntry { name, handler });
                state.resnapshot();
                Ok(())
            }
            None => self.missing(&target),
        }
    }

    /// Replaces `target` with a new handler registered under `name`.
    pub fn replace(
        &self,
        target: Target<'_>,
        name: impl Into<String>,
        handler: Arc<dyn StoreHandler>,
    ) -> StoreResult<()> {
        let mut state = self.state.write();
        match state.handlers.iter().position(|e| target.matches(e)) {
            Some(i) => {
                state.handlers[i] = HandlerEntry {
                    name: name.into(),
                    handler,
                };
                state.resnapshot();
                Ok(())
            }
            None => self.missing(&target),
        }
    }

    /// Removes and returns the front handler.
    pub fn remove_first(&self) -> Option<HandlerEntry> {
        let mut state = self.state.write();
        if state.handlers.is_empty() {
            return None;
        }
        let entry = state.handlers.remove(0);
        state.resnapshot();
        Some(entry)
    }

    /// Removes and returns the back handler.
    pub fn remove_last(&self) -> Option<HandlerEntry> {
        let mut state = self.state.write();
        let entry = state.handlers.pop()?;
        state.resnapshot();
        Some(entry)
    }

    /// Removes `target` from the chain.
    pub fn remove(&self, target: Target<'_>) -> StoreResult<()> {
        let mut state = self.state.write();
        match state.handlers.iter().position(|e| target.matches(e)) {
            Some(i) => {
                state.handlers.remove(i);
                state.resnapshot();
                Ok(())
            }
            None => self.missing(&target),
        }
    }

    fn missing(&self, target: &Target<'_>) -> StoreResult<()> {
        match self.policy {
            MissingTargetPolicy::Ignore => Ok(()),
            MissingTargetPolicy::Error => Err(StoreError::HandlerNotFound {
                name: target.describe(),
            }),
        }
    }

    /// Number of installed handlers.
    pub fn len(&self) -> usize {
        self.state.read().handlers.len()
    }

    /// Returns true if no handlers are installed.
    pub fn is_empty(&self) -> bool {
        self.state.read().handlers.is_empty()
    }

    /// Names of installed handlers, front to back.
    pub fn handler_names(&self) -> Vec<String> {
        self.state
            .read()
            .handlers
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }
}
