//! File target loader
//!
//! Reads a YAML or JSON mapping of target name to options from a local file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use gantry_api::{TargetConfig, TargetOperation};
use gantry_common::{ConfigError, decode_options};

use crate::error::{LoaderError, Result};
use crate::loader::{LoaderHooks, TargetLoader, parse_targets};
use crate::options::LoaderOptions;
use crate::poller::{Poller, TargetSource};

const LOADER_TYPE: &str = "file";
const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileLoaderConfig {
    /// Path to the targets file
    pub path: String,
}

impl FileLoaderConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.path.trim().is_empty() {
            return Err(ConfigError::Missing("path"));
        }
        Ok(())
    }
}

struct FileSource {
    path: PathBuf,
}

#[async_trait]
impl TargetSource for FileSource {
    fn loader_type(&self) -> &'static str {
        LOADER_TYPE
    }

    async fn fetch(&self) -> Result<HashMap<String, TargetConfig>> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let targets = parse_targets(&content)?;
        debug!("Read {} target(s) from {}", targets.len(), self.path.display());
        Ok(targets)
    }
}

/// Loader polling a local targets file
#[derive(Default)]
pub struct FileLoader {
    poller: Option<Poller>,
}

impl FileLoader {
    pub fn new() -> Self {
        Self::default()
    }

    fn poller(&self) -> Result<&Poller> {
        self.poller.as_ref().ok_or(LoaderError::NotInitialized)
    }
}

#[async_trait]
impl TargetLoader for FileLoader {
    async fn init(
        &mut self,
        cancel: &CancellationToken,
        config: &Value,
        hooks: LoaderHooks,
    ) -> Result<()> {
        let (options, backend) = LoaderOptions::split(config)?;
        let config: FileLoaderConfig = decode_options(&backend)?;
        config.validate()?;

        let source = FileSource {
            path: PathBuf::from(&config.path),
        };
        self.poller = Some(Poller::new(
            Arc::new(source),
            &options,
            DEFAULT_INTERVAL,
            hooks,
            cancel.child_token(),
        )?);
        Ok(())
    }

    fn start(&self, cancel: &CancellationToken) -> Result<mpsc::Receiver<TargetOperation>> {
        Ok(self.poller()?.start(cancel))
    }

    async fn run_once(&self) -> Result<HashMap<String, TargetConfig>> {
        self.poller()?.run_once().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_init_requires_path() {
        let mut loader = FileLoader::new();
        let err = loader
            .init(&CancellationToken::new(), &json!({"type": "file"}), LoaderHooks::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LoaderError::Config(ConfigError::Missing("path"))));
    }

    #[tokio::test]
    async fn test_init_rejects_unknown_fields() {
        let mut loader = FileLoader::new();
        let result = loader
            .init(
                &CancellationToken::new(),
                &json!({"path": "/tmp/targets.yml", "url": "http://x"}),
                LoaderHooks::default(),
            )
            .await;
        assert!(matches!(result, Err(LoaderError::Config(_))));
    }

    #[tokio::test]
    async fn test_not_initialized() {
        let loader = FileLoader::new();
        assert!(matches!(
            loader.start(&CancellationToken::new()),
            Err(LoaderError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let mut loader = FileLoader::new();
        loader
            .init(
                &CancellationToken::new(),
                &json!({"path": "/nonexistent/gantry/targets.yml"}),
                LoaderHooks::default(),
            )
            .await
            .unwrap();
        assert!(matches!(loader.run_once().await, Err(LoaderError::Io(_))));
    }
}
