//! Consul target loader
//!
//! Every passing instance of the configured services becomes a target named
//! after the instance ID and addressed at `<address>:<port>`.

use std::collections::HashMap;
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
use gantry_consul_client::{ConsulApi, ConsulClient, ConsulClientConfig, ServiceEntry};

use crate::error::{LoaderError, Result};
use crate::loader::{LoaderHooks, TargetLoader};
use crate::options::LoaderOptions;
use crate::poller::{Poller, TargetSource};

const LOADER_TYPE: &str = "consul";
const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_ADDRESS: &str = "localhost:8500";

/// A Consul service whose instances are loaded as targets
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct ConsulServiceConfig {
    pub name: String,
    /// Instances must carry every one of these tags
    pub tags: Vec<String>,
    /// Template applied to every target built from this service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<TargetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct ConsulLoaderConfig {
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub services: Vec<ConsulServiceConfig>,
}

impl Default for ConsulLoaderConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            datacenter: None,
            username: None,
            password: None,
            token: None,
            services: Vec::new(),
        }
    }
}

impl ConsulLoaderConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::Missing("address"));
        }
        if self.services.is_empty() {
            return Err(ConfigError::Missing("services"));
        }
        if self.services.iter().any(|s| s.name.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "every service needs a name".to_string(),
            ));
        }
        Ok(())
    }

    pub fn client_config(&self) -> ConsulClientConfig {
        let mut config = ConsulClientConfig::new(&self.address);
        config.datacenter = self.datacenter.clone();
        config.token = self.token.clone();
        config.username = self.username.clone();
        config.password = self.password.clone();
        config
    }
}

/// Build the target for one service instance
fn service_target(service: &ConsulServiceConfig, entry: &ServiceEntry) -> TargetConfig {
    let mut target = service.config.clone().unwrap_or_default();
    target.name = entry.service.id.clone();

    let address = entry.effective_address();
    target.address = if entry.service.port == 0 {
        address.to_string()
    } else {
        format!("{}:{}", address, entry.service.port)
    };

    for tag in entry.service.tags.iter().flatten() {
        if !target.tags.contains(tag) {
            target.tags.push(tag.clone());
        }
    }
    target
}

struct ConsulSource {
    api: Arc<dyn ConsulApi>,
    services: Vec<ConsulServiceConfig>,
}

#[async_trait]
impl TargetSource for ConsulSource {
    fn loader_type(&self) -> &'static str {
        LOADER_TYPE
    }

    async fn fetch(&self) -> Result<HashMap<String, TargetConfig>> {
        let mut targets = HashMap::new();
        for service in &self.services {
            let entries = self
                .api
                .health_service(&service.name, &service.tags, true)
                .await?;
            debug!(
                "Service {} has {} passing instance(s)",
                service.name,
                entries.len()
            );
            for entry in &entries {
                let target = service_target(service, entry);
                targets.insert(target.name.clone(), target);
            }
        }
        Ok(targets)
    }
}

/// Loader discovering targets from the Consul catalog
#[derive(Default)]
pub struct ConsulLoader {
    api: Option<Arc<dyn ConsulApi>>,
    poller: Option<Poller>,
}

impl ConsulLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// A loader using an existing store client instead of connecting on `init`
    pub fn with_api(api: Arc<dyn ConsulApi>) -> Self {
        Self {
            api: Some(api),
            poller: None,
        }
    }

    fn poller(&self) -> Result<&Poller> {
        self.poller.as_ref().ok_or(LoaderError::NotInitialized)
    }
}

#[async_trait]
impl TargetLoader for ConsulLoader {
    async fn init(
        &mut self,
        cancel: &CancellationToken,
        config: &Value,
        hooks: LoaderHooks,
    ) -> Result<()> {
        let (options, backend) = LoaderOptions::split(config)?;
        let config: ConsulLoaderConfig = decode_options(&backend)?;
        config.validate()?;

        let api: Arc<dyn ConsulApi> = match &self.api {
            Some(api) => api.clone(),
            None => Arc::new(ConsulClient::new(config.client_config())?),
        };
        let source = ConsulSource {
            api,
            services: config.services,
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
