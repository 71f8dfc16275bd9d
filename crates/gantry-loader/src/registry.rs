//! Target loader backend registry

use std::collections::HashMap;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use gantry_common::{ConfigError, backend_type};

use crate::consul::ConsulLoader;
use crate::error::Result;
use crate::file::FileLoader;
use crate::http::HttpLoader;
use crate::loader::{LoaderHooks, TargetLoader};

/// Builds an uninitialized loader
pub type LoaderFactory = fn() -> Box<dyn TargetLoader>;

/// Loader backends by configuration `type`.
///
/// Built at startup and only mutated before being shared.
#[derive(Default)]
pub struct LoaderRegistry {
    factories: HashMap<&'static str, LoaderFactory>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the file, http and consul backends
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("file", || Box::new(FileLoader::new()));
        registry.register("http", || Box::new(HttpLoader::new()));
        registry.register("consul", || Box::new(ConsulLoader::new()));
        registry
    }

    pub fn register(&mut self, name: &'static str, factory: LoaderFactory) {
        self.factories.insert(name, factory);
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Create the backend named by `config.type` and initialize it with the section
    pub async fn create_from_config(
        &self,
        cancel: &CancellationToken,
        config: &Value,
        hooks: LoaderHooks,
    ) -> Result<Box<dyn TargetLoader>> {
        let kind = backend_type(config)?;
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| ConfigError::UnknownType(kind.to_string()))?;

        let mut loader = factory();
        loader.init(cancel, config, hooks).await?;
        info!("Initialized '{}' target loader", kind);
        Ok(loader)
    }
}
