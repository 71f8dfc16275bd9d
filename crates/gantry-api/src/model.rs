// Target and service models shared by loaders, lockers and the orchestrator

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default connection timeout applied to targets that do not set one
pub const DEFAULT_TARGET_TIMEOUT: Duration = Duration::from_secs(10);

/// A named, addressable monitoring target.
///
/// Identity is the `name`; two configs with the same name describe the same
/// target even if the remaining fields differ.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TargetConfig {
    pub name: String,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(with = "gantry_common::duration")]
    pub timeout: Duration,
    pub insecure: bool,
    pub skip_verify: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_ca: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_cert: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_key: Option<String>,
    pub subscriptions: Vec<String>,
    pub outputs: Vec<String>,
    pub tags: Vec<String>,
    pub event_tags: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            address: String::new(),
            username: None,
            password: None,
            token: None,
            timeout: DEFAULT_TARGET_TIMEOUT,
            insecure: false,
            skip_verify: false,
            tls_ca: None,
            tls_cert: None,
            tls_key: None,
            subscriptions: Vec::new(),
            outputs: Vec::new(),
            tags: Vec::new(),
            event_tags: HashMap::new(),
            encoding: None,
        }
    }
}

impl TargetConfig {
    /// Create a target with the given name and default options
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Set the target address
    pub fn with_address(mut self, address: &str) -> Self {
        self.address = address.to_string();
        self
    }

    /// Use the name as address when no address was configured
    pub fn fill_address(&mut self) {
        if self.address.is_empty() {
            self.address = self.name.clone();
        }
    }
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("token", &self.token.as_ref().map(|_| "****"))
            .field("timeout", &self.timeout)
            .field("insecure", &self.insecure)
            .field("skip_verify", &self.skip_verify)
            .field("subscriptions", &self.subscriptions)
            .field("outputs", &self.outputs)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

/// Incremental change of the target inventory produced by one reconciliation cycle.
///
/// `add` and `del` are disjoint by name. Both are always initialized, possibly empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TargetOperation {
    /// Targets that appeared, with their full current configuration
    pub add: Vec<TargetConfig>,
    /// Names of targets that disappeared
    pub del: Vec<String>,
}

impl TargetOperation {
    /// True when the operation carries neither additions nor deletions
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.del.is_empty()
    }

    /// Names of the added targets, in emission order
    pub fn added_names(&self) -> Vec<&str> {
        self.add.iter().map(|t| t.name.as_str()).collect()
    }
}

/// Health-checked advertisement of this instance's ownership of a resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServiceRegistration {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(with = "gantry_common::duration")]
    pub ttl: Duration,
}

/// A healthy service instance as returned by a locker lookup.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Service {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
}
