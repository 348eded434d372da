//! # Stowage Backend
//!
//! Backend adapter contract and built-in adapters for Stowage.
//!
//! This crate defines the surface one host storage technology must satisfy
//! to participate in the selection cascade, plus the two adapters Stowage
//! always ships:
//!
//! - [`MemoryAdapter`] - full-capability, in-process; for tests and
//!   ephemeral stores
//! - [`KvAdapter`] - the minimal key-value fallback, layered over an
//!   injectable [`KeyValueStore`]
//!
//! Concrete adapters for real host technologies (quota filesystems,
//! transactional object stores, relational stores) live with their hosts;
//! they implement [`BackendAdapter`] and register an [`AdapterFactory`]
//! with the selector.
//!
//! ## Example
//!
//! ```rust
//! use stowage_backend::{BackendAdapter, MemoryAdapter};
//! use bytes::Bytes;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let adapter = MemoryAdapter::new();
//! adapter.set_contents("doc", Bytes::from_static(b"hi")).await.unwrap();
//! assert_eq!(adapter.get_contents("doc").await.unwrap(), Bytes::from_static(b"hi"));
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod error;
mod fallback;
mod kv;
mod memory;
mod types;

pub use adapter::{AdapterConfig, AdapterFactory, BackendAdapter, BackendKind};
pub use error::{BackendError, BackendResult};
pub use fallback::{KvAdapter, KvAdapterFactory};
pub use kv::{KeyValueStore, MemoryKvStore};
pub use memory::{MemoryAdapter, MemoryAdapterFactory};
pub use types::{AttachmentEntry, HandleEntry, ResourceHandle};
