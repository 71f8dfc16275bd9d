// Consul API payloads used by the coordination layer
// Field names follow the Consul v1 HTTP API

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use gantry_common::format_duration;

// ============================================================================
// Session Models
// ============================================================================

/// What the store does with keys held by a session once it is invalidated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionBehavior {
    /// Keys stay in place, their lock is released
    #[default]
    Release,
    /// Keys are deleted
    Delete,
}

/// Session create request
/// PUT /v1/session/create
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionCreateRequest {
    #[serde(rename = "Name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "LockDelay", skip_serializing_if = "Option::is_none")]
    pub lock_delay: Option<String>,
    #[serde(rename = "Behavior", skip_serializing_if = "Option::is_none")]
    pub behavior: Option<SessionBehavior>,
    #[serde(rename = "TTL", skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

impl SessionCreateRequest {
    /// Request a TTL session with the given invalidation behavior
    pub fn with_ttl(ttl: Duration, lock_delay: Duration, behavior: SessionBehavior) -> Self {
        Self {
            name: None,
            lock_delay: Some(format_duration(lock_delay)),
            behavior: Some(behavior),
            ttl: Some(format_duration(ttl)),
        }
    }

    /// Set the session name
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }
}

/// Session create response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreateResponse {
    #[serde(rename = "ID")]
    pub id: String,
}

// ============================================================================
// KV Models
// ============================================================================

/// KV entry as returned by GET /v1/kv/:key
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct KvPair {
    #[serde(rename = "Key")]
    pub key: String,

    /// Base64 encoded value
    #[serde(rename = "Value", default)]
    pub value: Option<String>,

    /// Session currently holding the key's lock
    #[serde(rename = "Session", default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,

    #[serde(rename = "Flags", default)]
    pub flags: u64,

    #[serde(rename = "LockIndex", default)]
    pub lock_index: u64,

    #[serde(rename = "CreateIndex", default)]
    pub create_index: u64,

    #[serde(rename = "ModifyIndex", default)]
    pub modify_index: u64,
}

impl KvPair {
    /// Build an entry from a raw value
    pub fn new(key: &str, value: &[u8]) -> Self {
        Self {
            key: key.to_string(),
            value: Some(STANDARD.encode(value)),
            ..Default::default()
        }
    }

    /// Decode the base64 value
    pub fn raw_value(&self) -> Option<Vec<u8>> {
        self.value.as_ref().and_then(|v| STANDARD.decode(v).ok())
    }

    /// Decode the value as a (lossy) UTF-8 string
    pub fn value_string(&self) -> String {
        self.raw_value()
            .map(|v| String::from_utf8_lossy(&v).into_owned())
            .unwrap_or_default()
    }

    /// Whether any session holds the key's lock
    pub fn is_locked(&self) -> bool {
        self.session.as_deref().is_some_and(|s| !s.is_empty())
    }
}

// ============================================================================
// Agent / Health Models
// ============================================================================

/// Health status of a check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passing,
    Warning,
    #[default]
    Critical,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Passing => "passing",
            CheckStatus::Warning => "warning",
            CheckStatus::Critical => "critical",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service registration request
/// PUT /v1/agent/service/register
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentServiceRegistration {
    #[serde(rename = "ID", default)]
    pub id: Option<String>,

    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Tags", default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    #[serde(rename = "Address", default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(rename = "Port", default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(rename = "Meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<HashMap<String, String>>,

    /// Single health check definition
    #[serde(rename = "Check", default, skip_serializing_if = "Option::is_none")]
    pub check: Option<AgentServiceCheck>,
}

impl AgentServiceRegistration {
    /// Get the effective service ID
    pub fn service_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| self.name.clone())
    }
}

/// Health check attached to a service registration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentServiceCheck {
    #[serde(rename = "CheckID", default, skip_serializing_if = "Option::is_none")]
    pub check_id: Option<String>,

    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// TTL-based check duration (e.g., "30s")
    #[serde(rename = "TTL", default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,

    /// Deregister after critical for duration
    #[serde(
        rename = "DeregisterCriticalServiceAfter",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub deregister_critical_service_after: Option<String>,

    #[serde(rename = "Notes", default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Initial status
    #[serde(rename = "Status", default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CheckStatus>,
}

/// TTL check update body
/// PUT /v1/agent/check/update/:check_id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckUpdate {
    #[serde(rename = "Status")]
    pub status: CheckStatus,
    #[serde(rename = "Output", default)]
    pub output: String,
}

/// Node part of a health service entry
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Node {
    #[serde(rename = "Node", default)]
    pub node: String,
    #[serde(rename = "Address", default)]
    pub address: String,
    #[serde(rename = "Datacenter", default)]
    pub datacenter: String,
}

/// Service part of a health service entry
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentService {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Service")]
    pub service: String,
    #[serde(rename = "Tags", default)]
    pub tags: Option<Vec<String>>,
    #[serde(rename = "Address", default)]
    pub address: String,
    #[serde(rename = "Port", default)]
    pub port: u16,
    #[serde(rename = "Meta", default)]
    pub meta: Option<HashMap<String, String>>,
}

/// Health check state in a health service entry
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HealthCheck {
    #[serde(rename = "CheckID", default)]
    pub check_id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Status", default)]
    pub status: CheckStatus,
    #[serde(rename = "Output", default)]
    pub output: String,
    #[serde(rename = "ServiceID", default)]
    pub service_id: String,
}

/// One instance returned by GET /v1/health/service/:service
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServiceEntry {
    #[serde(rename = "Node", default)]
    pub node: Node,
    #[serde(rename = "Service")]
    pub service: AgentService,
    #[serde(rename = "Checks", default)]
    pub checks: Vec<HealthCheck>,
}

impl ServiceEntry {
    /// Service address, falling back to the node address
    pub fn effective_address(&self) -> &str {
        if self.service.address.is_empty() {
            &self.node.address
        } else {
            &self.service.address
        }
    }

    /// Whether every check of the entry is passing
    pub fn is_passing(&self) -> bool {
        self.checks.iter().all(|c| c.status == CheckStatus::Passing)
    }
}
