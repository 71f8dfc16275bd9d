//! Store primitive consumed by the locker and the consul target loader

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{
    AgentServiceRegistration, CheckStatus, KvPair, ServiceEntry, SessionCreateRequest,
};

/// Session, KV, agent and health operations of a Consul-compatible store.
///
/// The store is expected to be linearizable for `acquire`: at most one session
/// holds a given key at any time. Sessions created with a TTL are invalidated
/// by the store when not renewed in time, applying their `Behavior` to the keys
/// they hold.
#[async_trait]
pub trait ConsulApi: Send + Sync + 'static {
    /// Create a session, returning its ID
    async fn create_session(&self, request: &SessionCreateRequest) -> Result<String>;

    /// Renew a session. Returns `false` when the session no longer exists.
    async fn renew_session(&self, session_id: &str) -> Result<bool>;

    /// Destroy a session, applying its behavior to held keys
    async fn destroy_session(&self, session_id: &str) -> Result<()>;

    /// Acquire `key` for `session_id` if no other session holds it
    async fn acquire(&self, key: &str, value: &[u8], session_id: &str) -> Result<bool>;

    /// Read a single key
    async fn get_key(&self, key: &str) -> Result<Option<KvPair>>;

    /// Read every key under a prefix
    async fn list_keys(&self, prefix: &str) -> Result<Vec<KvPair>>;

    /// Delete a key
    async fn delete_key(&self, key: &str) -> Result<()>;

    /// Register a service (and its check) with the local agent
    async fn register_service(&self, registration: &AgentServiceRegistration) -> Result<()>;

    /// Remove a service (and its checks) from the local agent
    async fn deregister_service(&self, service_id: &str) -> Result<()>;

    /// Set the state of a TTL check
    async fn update_ttl(&self, check_id: &str, output: &str, status: CheckStatus) -> Result<()>;

    /// Instances of a service carrying every tag in `tags`
    async fn health_service(
        &self,
        service: &str,
        tags: &[String],
        passing_only: bool,
    ) -> Result<Vec<ServiceEntry>>;
}
