//! Store configuration.

use crate::pipeline::MissingTargetPolicy;
use stowage_backend::{AdapterConfig, BackendKind};

/// Default logical store name.
pub const DEFAULT_NAME: &str = "stowage";

/// Default requested size: 10 MiB.
pub const DEFAULT_SIZE: u64 = 10 * 1024 * 1024;

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Requested store size in bytes, passed to adapters that negotiate
    /// quota.
    pub size: u64,

    /// Logical store name; scopes host-side namespaces and the persisted
    /// session record.
    pub name: String,

    /// Force a specific backend instead of running the cascade. A forced
    /// backend that fails to initialize is fatal (no fallback). Intended
    /// for debugging.
    pub force_backend: Option<BackendKind>,

    /// How pipeline mutations behave when a relative target is missing.
    pub missing_target_policy: MissingTargetPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            size: DEFAULT_SIZE,
            name: DEFAULT_NAME.to_string(),
            force_backend: None,
            missing_target_policy: MissingTargetPolicy::Ignore,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the requested size in bytes.
    #[must_use]
    pub fn size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Sets the logical store name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Forces a specific backend (disables the fallback cascade).
    #[must_use]
    pub fn force_backend(mut self, kind: BackendKind) -> Self {
        self.force_backend = Some(kind);
        self
    }

    /// Sets the missing-target policy for pipeline mutations.
    #[must_use]
    pub fn missing_target_policy(mut self, policy: MissingTargetPolicy) -> Self {
        self.missing_target_policy = policy;
        self
    }

    /// The subset of this configuration handed to adapter initializers.
    pub(crate) fn adapter_config(&self) -> AdapterConfig {
        AdapterConfig {
            name: self.name.clone(),
            size: self.size,
        }
    }
}
