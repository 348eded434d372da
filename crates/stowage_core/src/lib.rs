//! # Stowage Core
//!
//! One key-plus-attachment storage interface over whichever storage
//! technology the host actually offers.
//!
//! This crate provides:
//! - the [`Store`] facade: open immediately, operate once selection binds
//! - the interception [`Pipeline`]: an ordered, reconfigurable chain of
//!   [`StoreHandler`]s in front of the backend
//! - backend selection: a priority-ordered cascade over registered
//!   [`AdapterFactory`](stowage_backend::AdapterFactory) probes, tolerant
//!   of individual failures, with a persisted cross-session record
//! - the [`HandleCache`]: coalesces and indexes transient attachment
//!   handles, keeping them consistent under mutation and revocation
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use stowage_backend::{BackendKind, MemoryAdapterFactory, MemoryKvStore};
//! use stowage_core::{AdapterRegistry, CacheOptions, Config, Store};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let mut registry = AdapterRegistry::new();
//! registry.register(Arc::new(MemoryAdapterFactory::new(BackendKind::ObjectStore)));
//!
//! let store = Store::open(Config::default(), registry, Arc::new(MemoryKvStore::new()));
//! store.install_handle_cache(CacheOptions::default());
//! store.initialized().await.unwrap();
//!
//! store.set_contents("album", &b"{\"title\":\"holiday\"}"[..]).await.unwrap();
//! store.set_attachment("album", "cover", &b"<png>"[..]).await.unwrap();
//! let handle = store.get_attachment_handle("album", "cover").await.unwrap();
//! store.release_attachment_handle(handle).await.unwrap();
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod error;
mod pipeline;
mod selector;
mod session;
mod store;

pub use cache::{CacheOptions, HandleCache, HANDLE_CACHE_NAME};
pub use config::{Config, DEFAULT_NAME, DEFAULT_SIZE};
pub use error::{StoreError, StoreResult};
pub use pipeline::{
    HandlerEntry, MissingTargetPolicy, Next, Pipeline, ReleaseOptions, StoreHandler, Target,
};
pub use selector::{select_backend, AdapterRegistry, SelectionState};
pub use session::{MigrationSignal, SessionMeta, SessionStore};
pub use store::{Store, NO_DOC_KEY};
