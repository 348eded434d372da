//! Shared value types for the adapter surface.

use bytes::Bytes;
use std::fmt;

/// An opaque, revocable reference to transient binary content.
///
/// Handles are minted by an adapter when attachment content is materialized
/// for out-of-band consumption and must be explicitly released; an adapter
/// may keep host resources (object URLs, temp files) alive for as long as
/// the handle is outstanding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceHandle(String);

impl ResourceHandle {
    /// Wraps a raw handle string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the raw handle string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the handle, returning the raw string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ResourceHandle {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for ResourceHandle {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// One attachment row returned by a bulk content fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentEntry {
    /// The attachment key within its document.
    pub attach_key: String,
    /// The attachment payload.
    pub data: Bytes,
}

/// One handle row returned by a bulk handle fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleEntry {
    /// The document key the attachment is scoped to.
    pub doc_key: String,
    /// The attachment key within its document.
    pub attach_key: String,
    /// The minted handle.
    pub handle: ResourceHandle,
}
