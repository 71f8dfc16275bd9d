//! Locker backend registry

use std::collections::HashMap;

use serde_json::Value;
use tracing::info;

use gantry_common::{ConfigError, backend_type};

use crate::consul::ConsulLocker;
use crate::error::Result;
use crate::locker::Locker;

/// Builds an uninitialized locker
pub type LockerFactory = fn() -> Box<dyn Locker>;

/// Locker backends by configuration `type`.
///
/// Built at startup and only mutated before being shared.
#[derive(Default)]
pub struct LockerRegistry {
    factories: HashMap<&'static str, LockerFactory>,
}

impl LockerRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in backends
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("consul", || Box::new(ConsulLocker::new()));
        registry
    }

    pub fn register(&mut self, name: &'static str, factory: LockerFactory) {
        self.factories.insert(name, factory);
    }

    /// Registered backend names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Create the backend named by `config.type` and initialize it with the section
    pub async fn create_from_config(&self, config: &Value) -> Result<Box<dyn Locker>> {
        let kind = backend_type(config)?;
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| ConfigError::UnknownType(kind.to_string()))?;

        let mut locker = factory();
        locker.init(config).await?;
        info!("Initialized '{}' locker", kind);
        Ok(locker)
    }
}
