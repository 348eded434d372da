//! Backend adapter trait and type discriminator.

use crate::error::BackendResult;
use crate::types::{AttachmentEntry, HandleEntry, ResourceHandle};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Stable discriminator for the storage technology behind an adapter.
///
/// The variants are ordered from most capable/durable to least; selection
/// probes them in exactly this order (see [`BackendKind::PROBE_ORDER`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// A quota-based filesystem.
    Filesystem,
    /// A transactional object store.
    ObjectStore,
    /// A relational local store.
    Relational,
    /// The minimal key-value fallback, assumed always available.
    KeyValue,
}

impl BackendKind {
    /// The fixed priority order used by the selection cascade.
    pub const PROBE_ORDER: [BackendKind; 4] = [
        BackendKind::Filesystem,
        BackendKind::ObjectStore,
        BackendKind::Relational,
        BackendKind::KeyValue,
    ];

    /// Returns the stable string form of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Filesystem => "filesystem",
            BackendKind::ObjectStore => "object-store",
            BackendKind::Relational => "relational",
            BackendKind::KeyValue => "key-value",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration handed to an adapter initializer.
///
/// A subset of the facade configuration: the logical store name (used to
/// scope host-side namespaces) and the requested size in bytes (used for
/// quota negotiation by technologies that require it).
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Logical store name.
    pub name: String,
    /// Requested store size in bytes.
    pub size: u64,
}

/// A storage adapter bound to one host storage technology.
///
/// Adapters implement the full operation set of the store facade against a
/// single technology. They are thin, mechanical translators: no caching, no
/// retries, no interpretation of keys beyond namespacing.
///
/// # Invariants
///
/// - `get_*` operations surface [`crate::BackendError::DocumentNotFound`] /
///   [`crate::BackendError::AttachmentNotFound`] for absent entries
/// - `remove` deletes the document *and* every attachment scoped to it
/// - releasing a handle that is unknown or already released is a no-op
/// - adapters must be `Send + Sync`; calls may interleave at await points
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// The technology this adapter is bound to.
    fn kind(&self) -> BackendKind;

    /// Whether storing attachments on this backend is advisable.
    ///
    /// The minimal fallback keeps the attachment operations functional but
    /// reports `false` here so callers can detect degraded mode.
    fn supports_attachments(&self) -> bool;

    /// The granted capacity in bytes, or `None` when unknown.
    fn capacity(&self) -> Option<u64> {
        None
    }

    /// Reads the contents of a document.
    async fn get_contents(&self, doc_key: &str) -> BackendResult<Bytes>;

    /// Writes the contents of a document, replacing any prior value.
    async fn set_contents(&self, doc_key: &str, data: Bytes) -> BackendResult<()>;

    /// Removes a document and all of its attachments.
    async fn remove(&self, doc_key: &str) -> BackendResult<()>;

    /// Lists attachment keys under `doc_key`, or all document keys when
    /// `doc_key` is `None`.
    async fn list(&self, doc_key: Option<&str>) -> BackendResult<Vec<String>>;

    /// Reads one attachment.
    async fn get_attachment(&self, doc_key: &str, attach_key: &str) -> BackendResult<Bytes>;

    /// Writes one attachment, replacing any prior value.
    async fn set_attachment(
        &self,
        doc_key: &str,
        attach_key: &str,
        data: Bytes,
    ) -> BackendResult<()>;

    /// Removes one attachment.
    async fn remove_attachment(&self, doc_key: &str, attach_key: &str) -> BackendResult<()>;

    /// Reads every attachment under a document.
    async fn get_all_attachments(&self, doc_key: &str) -> BackendResult<Vec<AttachmentEntry>>;

    /// Mints a handle for one attachment's content.
    async fn get_attachment_handle(
        &self,
        doc_key: &str,
        attach_key: &str,
    ) -> BackendResult<ResourceHandle>;

    /// Mints handles for every attachment under a document.
    async fn get_all_attachment_handles(&self, doc_key: &str)
        -> BackendResult<Vec<HandleEntry>>;

    /// Releases a previously minted handle. Unknown handles are a no-op.
    async fn release_attachment_handle(&self, handle: &ResourceHandle) -> BackendResult<()>;

    /// Removes every document and attachment in the store.
    async fn clear(&self) -> BackendResult<()>;
}

impl fmt::Debug for dyn BackendAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendAdapter")
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

/// Asynchronous initializer for one backend candidate.
///
/// The selection cascade calls `init` for each registered candidate in
/// priority order; a failure is non-fatal unless the backend was forced.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    /// The kind of adapter this factory produces.
    fn kind(&self) -> BackendKind;

    /// Probes the host technology and, on success, returns a bound adapter.
    async fn init(&self, config: &AdapterConfig) -> BackendResult<Arc<dyn BackendAdapter>>;
}
