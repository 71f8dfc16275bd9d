//! HTTP target loader
//!
//! Fetches the target mapping from an HTTP endpoint. The body may be YAML or JSON.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
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

const LOADER_TYPE: &str = "http";
const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(50);

#[derive(Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct HttpLoaderConfig {
    pub url: String,
    /// Request timeout
    #[serde(with = "gantry_common::duration")]
    pub timeout: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Bearer token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Accept any server certificate
    pub skip_verify: bool,
}

impl Default for HttpLoaderConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: DEFAULT_TIMEOUT,
            username: None,
            password: None,
            token: None,
            skip_verify: false,
        }
    }
}

impl std::fmt::Debug for HttpLoaderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLoaderConfig")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("token", &self.token.as_ref().map(|_| "****"))
            .field("skip_verify", &self.skip_verify)
            .finish()
    }
}

impl HttpLoaderConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(ConfigError::Missing("url"));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "url '{}' must use http or https",
                self.url
            )));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

struct HttpSource {
    client: Client,
    config: HttpLoaderConfig,
}

impl HttpSource {
    fn new(config: HttpLoaderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.skip_verify)
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl TargetSource for HttpSource {
    fn loader_type(&self) -> &'static str {
        LOADER_TYPE
    }

    async fn fetch(&self) -> Result<HashMap<String, TargetConfig>> {
        let mut request = self.client.get(&self.config.url);
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_ref());
        }
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LoaderError::Fetch(format!(
                "{} returned {}",
                self.config.url, status
            )));
        }

        let body = response.text().await?;
        let targets = parse_targets(&body)?;
        debug!("Fetched {} target(s) from {}", targets.len(), self.config.url);
        Ok(targets)
    }
}

/// Loader polling an HTTP endpoint
#[derive(Default)]
pub struct HttpLoader {
    poller: Option<Poller>,
}

impl HttpLoader {
    pub fn new() -> Self {
        Self::default()
    }

    fn poller(&self) -> Result<&Poller> {
        self.poller.as_ref().ok_or(LoaderError::NotInitialized)
    }
}

#[async_trait]
impl TargetLoader for HttpLoader {
    async fn init(
        &mut self,
        cancel: &CancellationToken,
        config: &Value,
        hooks: LoaderHooks,
    ) -> Result<()> {
        let (options, backend) = LoaderOptions::split(config)?;
        let config: HttpLoaderConfig = decode_options(&backend)?;
        config.validate()?;
        debug!("http loader config: {:?}", config);

        let source = HttpSource::new(config)?;
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

    #[test]
    fn test_config_defaults() {
        let config: HttpLoaderConfig =
            decode_options(&json!({"url": "http://inventory:8080/targets"})).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(50));
        assert!(!config.skip_verify);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = HttpLoaderConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::Missing("url"))));

        let config = HttpLoaderConfig {
            url: "ftp://inventory/targets".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = HttpLoaderConfig {
            url: "http://inventory".to_string(),
            password: Some("hunter2".to_string()),
            token: Some("tok".to_string()),
            ..Default::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("tok\""));
    }
}
