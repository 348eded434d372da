//! Backend selection.
//!
//! Probes registered adapter factories strictly in priority order until
//! one initializes, tolerating the failure of any individual candidate.
//! A probe failure means that technology is unusable in this host (quota
//! denied, API absent, permission refused); it is logged and the cascade
//! advances. Only exhausting every candidate including the key-value
//! fallback is an error.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use stowage_backend::{AdapterFactory, BackendAdapter, BackendKind};

/// Factories keyed by the backend kind they probe for.
///
/// The host registers a factory per technology it can offer; unregistered
/// kinds are skipped by the cascade. The facade pre-seeds a key-value
/// fallback (see [`crate::Store::open`]) unless the host registers its own.
#[derive(Default)]
pub struct AdapterRegistry {
    factories: HashMap<BackendKind, Arc<dyn AdapterFactory>>,
}

impl AdapterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under its own kind, replacing any prior one.
    pub fn register(&mut self, factory: Arc<dyn AdapterFactory>) -> &mut Self {
        self.factories.insert(factory.kind(), factory);
        self
    }

    /// Returns the factory registered for `kind`, if any.
    #[must_use]
    pub fn get(&self, kind: BackendKind) -> Option<&Arc<dyn AdapterFactory>> {
        self.factories.get(&kind)
    }

    /// True if a factory is registered for `kind`.
    #[must_use]
    pub fn contains(&self, kind: BackendKind) -> bool {
        self.factories.contains_key(&kind)
    }
}

/// Observable progress of the selection cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionState {
    /// Selection has not started.
    Unselected,
    /// Probing the candidate at this position of the priority order.
    Probing(usize),
    /// Terminal: an adapter of this kind is bound.
    Bound(BackendKind),
}

/// Runs the cascade and returns the first adapter that initializes.
///
/// With `Config::force_backend` set, only that factory runs and its
/// failure is fatal. Otherwise candidates are probed strictly one at a
/// time in [`BackendKind::PROBE_ORDER`]; `on_state` observes each
/// transition.
pub async fn select_backend(
    registry: &AdapterRegistry,
    config: &Config,
    mut on_state: impl FnMut(SelectionState),
) -> StoreResult<Arc<dyn BackendAdapter>> {
    let adapter_config = config.adapter_config();

    if let Some(kind) = config.force_backend {
        let Some(factory) = registry.get(kind) else {
            return Err(StoreError::ForcedBackendUnavailable {
                kind,
                reason: "no factory registered".to_string(),
            });
        };
        let adapter = factory.init(&adapter_config).await.map_err(|error| {
            StoreError::ForcedBackendUnavailable {
                kind,
                reason: error.to_string(),
            }
        })?;
        info!(backend = %kind, store = %config.name, "bound forced backend");
        on_state(SelectionState::Bound(kind));
        return Ok(adapter);
    }

    for (position, kind) in BackendKind::PROBE_ORDER.into_iter().enumerate() {
        let Some(factory) = registry.get(kind) else {
            continue;
        };
        on_state(SelectionState::Probing(position));
        match factory.init(&adapter_config).await {
            Ok(adapter) => {
                if kind == BackendKind::KeyValue {
                    warn!(store = %config.name, "running on the key-value fallback (degraded)");
                } else {
                    info!(backend = %kind, store = %config.name, "bound backend");
                }
                on_state(SelectionState::Bound(kind));
                return Ok(adapter);
            }
            Err(error) => {
                warn!(backend = %kind, store = %config.name, %error, "backend probe failed");
            }
        }
    }

    Err(StoreError::SelectionExhausted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use stowage_backend::{AdapterConfig, BackendError, BackendResult, MemoryAdapter};

    /// Factory scripted to fail or succeed, counting init calls.
    struct Probe {
        kind: BackendKind,
        fail: bool,
        calls: Arc<Mutex<Vec<BackendKind>>>,
    }

    #[async_trait]
    impl AdapterFactory for Probe {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        async fn init(&self, _config: &AdapterConfig) -> BackendResult<Arc<dyn BackendAdapter>> {
            self.calls.lock().push(self.kind);
            if self.fail {
                Err(BackendError::unavailable("quota denied"))
            } else {
                Ok(Arc::new(MemoryAdapter::with_kind(self.kind)))
            }
        }
    }

    fn probe(
        kind: BackendKind,
        fail: bool,
        calls: &Arc<Mutex<Vec<BackendKind>>>,
    ) -> Arc<dyn AdapterFactory> {
        Arc::new(Probe {
            kind,
            fail,
            calls: Arc::clone(calls),
        })
    }

    #[tokio::test]
    async fn cascade_advances_past_failing_candidates() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = AdapterRegistry::new();
        registry
            .register(probe(BackendKind::Filesystem, true, &calls))
            .register(probe(BackendKind::ObjectStore, true, &calls))
            .register(probe(BackendKind::Relational, false, &calls));

        let adapter = select_backend(&registry, &Config::default(), |_| {})
            .await
            .unwrap();
        assert_eq!(adapter.kind(), BackendKind::Relational);
        assert_eq!(
            *calls.lock(),
            vec![
                BackendKind::Filesystem,
                BackendKind::ObjectStore,
                BackendKind::Relational
            ]
        );
    }

    #[tokio::test]
    async fn unregistered_kinds_are_skipped_without_probing() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = AdapterRegistry::new();
        registry.register(probe(BackendKind::KeyValue, false, &calls));

        let adapter = select_backend(&registry, &Config::default(), |_| {})
            .await
            .unwrap();
        assert_eq!(adapter.kind(), BackendKind::KeyValue);
        assert_eq!(*calls.lock(), vec![BackendKind::KeyValue]);
    }

    #[tokio::test]
    async fn exhausted_cascade_is_an_error() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = AdapterRegistry::new();
        registry
            .register(probe(BackendKind::Filesystem, true, &calls))
            .register(probe(BackendKind::KeyValue, true, &calls));

        let err = select_backend(&registry, &Config::default(), |_| {})
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::SelectionExhausted);
    }

    #[tokio::test]
    async fn forced_backend_skips_the_cascade() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = AdapterRegistry::new();
        registry
            .register(probe(BackendKind::Filesystem, false, &calls))
            .register(probe(BackendKind::Relational, false, &calls));

        let config = Config::default().force_backend(BackendKind::Relational);
        let adapter = select_backend(&registry, &config, |_| {}).await.unwrap();
        assert_eq!(adapter.kind(), BackendKind::Relational);
        assert_eq!(*calls.lock(), vec![BackendKind::Relational]);
    }

    #[tokio::test]
    async fn forced_backend_failure_is_fatal_without_fallback() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = AdapterRegistry::new();
        registry
            .register(probe(BackendKind::Filesystem, true, &calls))
            .register(probe(BackendKind::KeyValue, false, &calls));

        let config = Config::default().force_backend(BackendKind::Filesystem);
        let err = select_backend(&registry, &config, |_| {}).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::ForcedBackendUnavailable {
                kind: BackendKind::Filesystem,
                ..
            }
        ));
        // the fallback must not have been consulted
        assert_eq!(*calls.lock(), vec![BackendKind::Filesystem]);
    }

    #[tokio::test]
    async fn forcing_an_unregistered_kind_is_fatal() {
        let registry = AdapterRegistry::new();
        let config = Config::default().force_backend(BackendKind::ObjectStore);
        let err = select_backend(&registry, &config, |_| {}).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::ForcedBackendUnavailable {
                kind: BackendKind::ObjectStore,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn states_are_observed_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = AdapterRegistry::new();
        registry
            .register(probe(BackendKind::Filesystem, true, &calls))
            .register(probe(BackendKind::ObjectStore, false, &calls));

        let mut states = Vec::new();
        select_backend(&registry, &Config::default(), |s| states.push(s))
            .await
            .unwrap();
        assert_eq!(
            states,
            vec![
                SelectionState::Probing(0),
                SelectionState::Probing(1),
                SelectionState::Bound(BackendKind::ObjectStore)
            ]
        );
    }
}
