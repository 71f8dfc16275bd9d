//! The target loader contract and the hooks supplied by the host

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use gantry_api::{TargetConfig, TargetOperation};

use crate::error::{LoaderError, Result};

/// Fills defaults into a freshly loaded target; an error drops the target for the cycle
pub type TargetsDefaults = Arc<dyn Fn(&mut TargetConfig) -> anyhow::Result<()> + Send + Sync>;

/// An action run against a target when it is added or deleted
#[async_trait]
pub trait TargetAction: Send + Sync {
    async fn run(&self, target: &TargetConfig) -> anyhow::Result<()>;
}

/// Collaborators a loader needs from the host, supplied once to `init`
#[derive(Clone, Default)]
pub struct LoaderHooks {
    pub targets_defaults: Option<TargetsDefaults>,
    /// Actions by name, referenced from `on-add` / `on-delete`
    pub actions: HashMap<String, Arc<dyn TargetAction>>,
    /// Registry receiving the loader metrics when `enable-metrics` is set
    pub registry: Option<prometheus::Registry>,
}

impl LoaderHooks {
    pub fn with_targets_defaults<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut TargetConfig) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.targets_defaults = Some(Arc::new(f));
        self
    }

    pub fn with_action(mut self, name: &str, action: Arc<dyn TargetAction>) -> Self {
        self.actions.insert(name.to_string(), action);
        self
    }

    pub fn with_registry(mut self, registry: prometheus::Registry) -> Self {
        self.registry = Some(registry);
        self
    }
}

impl fmt::Debug for LoaderHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut actions: Vec<&String> = self.actions.keys().collect();
        actions.sort();
        f.debug_struct("LoaderHooks")
            .field("targets_defaults", &self.targets_defaults.is_some())
            .field("actions", &actions)
            .field("registry", &self.registry.is_some())
            .finish()
    }
}

/// Source of `TargetOperation`s describing how the target inventory changes.
#[async_trait]
pub trait TargetLoader: Send + Sync {
    /// Decode the loader section and resolve hooks.
    ///
    /// The loader stops for good once `cancel` fires.
    async fn init(
        &mut self,
        cancel: &CancellationToken,
        config: &Value,
        hooks: LoaderHooks,
    ) -> Result<()>;

    /// Start polling. The stream ends when `cancel` fires.
    fn start(&self, cancel: &CancellationToken) -> Result<mpsc::Receiver<TargetOperation>>;

    /// Fetch the current inventory once, with defaults applied
    async fn run_once(&self) -> Result<HashMap<String, TargetConfig>>;
}

/// Parse a target inventory: a YAML (or JSON) mapping of name to target options.
///
/// An empty document or a `null` entry is accepted; every entry gets its map key
/// as name.
pub fn parse_targets(content: &str) -> Result<HashMap<String, TargetConfig>> {
    if content.trim().is_empty() {
        return Ok(HashMap::new());
    }
    let raw: Option<HashMap<String, Option<TargetConfig>>> =
        serde_yaml::from_str(content).map_err(|e| LoaderError::Parse(e.to_string()))?;

    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(name, target)| {
            let mut target = target.unwrap_or_default();
            target.name = name.clone();
            (name, target)
        })
        .collect())
}
