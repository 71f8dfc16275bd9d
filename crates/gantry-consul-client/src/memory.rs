//! In-memory Consul store
//!
//! Emulates the parts of Consul the coordination layer depends on: TTL sessions
//! with `release`/`delete` behavior, atomic `acquire`, TTL health checks that turn
//! critical when not updated and services removed after staying critical for
//! `DeregisterCriticalServiceAfter`. Expiry is evaluated lazily on every call.
//! Lock-delay is accepted but not enforced.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use gantry_common::parse_duration;

use crate::api::ConsulApi;
use crate::error::{ClientError, Result};
use crate::model::{
    AgentService, AgentServiceRegistration, CheckStatus, CheckUpdate, HealthCheck, KvPair, Node,
    ServiceEntry, SessionBehavior, SessionCreateRequest,
};

const NODE_NAME: &str = "memory";
const NODE_ADDRESS: &str = "127.0.0.1";
const DATACENTER: &str = "dc1";
/// Check updates retained for `check_history`, across all checks
const HISTORY_LIMIT: usize = 256;

struct StoredSession {
    behavior: SessionBehavior,
    ttl: Option<Duration>,
    last_renewed: Instant,
}

impl StoredSession {
    fn is_expired(&self, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.duration_since(self.last_renewed) > ttl)
    }
}

struct StoredKv {
    value: Vec<u8>,
    session: Option<String>,
    lock_index: u64,
    create_index: u64,
    modify_index: u64,
}

struct StoredCheck {
    service_id: String,
    name: String,
    ttl: Option<Duration>,
    deregister_after: Option<Duration>,
    status: CheckStatus,
    output: String,
    last_update: Instant,
    critical_since: Option<Instant>,
}

#[derive(Default)]
struct MemoryState {
    index: u64,
    sessions: HashMap<String, StoredSession>,
    kv: BTreeMap<String, StoredKv>,
    services: HashMap<String, AgentServiceRegistration>,
    checks: HashMap<String, StoredCheck>,
    history: VecDeque<(String, CheckUpdate)>,
}

impl MemoryState {
    fn next_index(&mut self) -> u64 {
        self.index += 1;
        self.index
    }

    /// Apply every expiry that is due at `now`
    fn purge(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            debug!("Session {} expired", id);
            self.invalidate_session(&id);
        }

        for (check_id, check) in self.checks.iter_mut() {
            if let Some(ttl) = check.ttl
                && check.status != CheckStatus::Critical
                && now.duration_since(check.last_update) > ttl
            {
                debug!("TTL expired for check {}", check_id);
                check.status = CheckStatus::Critical;
                check.output = "TTL expired".to_string();
                check.critical_since = Some(now);
            }
        }

        let reaped: Vec<String> = self
            .checks
            .values()
            .filter(|c| match (c.deregister_after, c.critical_since) {
                (Some(after), Some(since)) => now.duration_since(since) >= after,
                _ => false,
            })
            .map(|c| c.service_id.clone())
            .collect();
        for service_id in reaped {
            debug!("Reaping critical service {}", service_id);
            self.remove_service(&service_id);
        }
    }

    fn invalidate_session(&mut self, session_id: &str) -> bool {
        let Some(session) = self.sessions.remove(session_id) else {
            return false;
        };

        let held: Vec<String> = self
            .kv
            .iter()
            .filter(|(_, e)| e.session.as_deref() == Some(session_id))
            .map(|(k, _)| k.clone())
            .collect();

        for key in held {
            match session.behavior {
                SessionBehavior::Delete => {
                    self.kv.remove(&key);
                }
                SessionBehavior::Release => {
                    let index = self.next_index();
                    if let Some(entry) = self.kv.get_mut(&key) {
                        entry.session = None;
                        entry.modify_index = index;
                    }
                }
            }
        }
        true
    }

    fn remove_service(&mut self, service_id: &str) {
        self.services.remove(service_id);
        self.checks.retain(|_, c| c.service_id != service_id);
    }

    fn kv_pair(key: &str, entry: &StoredKv) -> KvPair {
        let mut pair = KvPair::new(key, &entry.value);
        pair.session = entry.session.clone();
        pair.lock_index = entry.lock_index;
        pair.create_index = entry.create_index;
        pair.modify_index = entry.modify_index;
        pair
    }
}

/// In-process Consul store
pub struct MemoryConsul {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
}

impl MemoryConsul {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every call fail as if the store were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Invalidate a session immediately, as if its holder crashed and the TTL lapsed
    pub fn expire_session(&self, session_id: &str) -> bool {
        self.state.lock().invalidate_session(session_id)
    }

    /// IDs of live sessions
    pub fn session_ids(&self) -> Vec<String> {
        let mut state = self.state.lock();
        state.purge(Instant::now());
        let mut ids: Vec<String> = state.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Session currently holding `key`, if any
    pub fn holder(&self, key: &str) -> Option<String> {
        let mut state = self.state.lock();
        state.purge(Instant::now());
        state.kv.get(key).and_then(|e| e.session.clone())
    }

    /// Whether `key` exists
    pub fn has_key(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        state.purge(Instant::now());
        state.kv.contains_key(key)
    }

    /// IDs of registered services
    pub fn service_ids(&self) -> Vec<String> {
        let mut state = self.state.lock();
        state.purge(Instant::now());
        let mut ids: Vec<String> = state.services.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Current status of a check
    pub fn check_status(&self, check_id: &str) -> Option<CheckStatus> {
        let mut state = self.state.lock();
        state.purge(Instant::now());
        state.checks.get(check_id).map(|c| c.status)
    }

    /// Recent updates applied to a check through `update_ttl`, oldest first
    pub fn check_history(&self, check_id: &str) -> Vec<CheckUpdate> {
        self.state
            .lock()
            .history
            .iter()
            .filter(|(id, _)| id == check_id)
            .map(|(_, update)| update.clone())
            .collect()
    }

    fn guard(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ClientError::Status {
                status: 503,
                body: "store unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn parse_optional(value: &Option<String>) -> Option<Duration> {
        value.as_deref().and_then(|v| parse_duration(v).ok())
    }
}

impl Default for MemoryConsul {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConsulApi for MemoryConsul {
    async fn create_session(&self, request: &SessionCreateRequest) -> Result<String> {
        self.guard()?;
        let now = Instant::now();
        let id = uuid::Uuid::new_v4().to_string();
        let mut state = self.state.lock();
        state.purge(now);
        state.sessions.insert(
            id.clone(),
            StoredSession {
                behavior: request.behavior.unwrap_or_default(),
                ttl: Self::parse_optional(&request.ttl).filter(|ttl| !ttl.is_zero()),
                last_renewed: now,
            },
        );
        Ok(id)
    }

    async fn renew_session(&self, session_id: &str) -> Result<bool> {
        self.guard()?;
        let now = Instant::now();
        let mut state = self.state.lock();
        state.purge(now);
        match state.sessions.get_mut(session_id) {
            Some(session) => {
                session.last_renewed = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn destroy_session(&self, session_id: &str) -> Result<()> {
        self.guard()?;
        let mut state = self.state.lock();
        state.purge(Instant::now());
        state.invalidate_session(session_id);
        Ok(())
    }

    async fn acquire(&self, key: &str, value: &[u8], session_id: &str) -> Result<bool> {
        self.guard()?;
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.purge(Instant::now());
        if !state.sessions.contains_key(session_id) {
            return Err(ClientError::InvalidSession(session_id.to_string()));
        }

        let index = state.next_index();
        match state.kv.get_mut(key) {
            None => {
                state.kv.insert(
                    key.to_string(),
                    StoredKv {
                        value: value.to_vec(),
                        session: Some(session_id.to_string()),
                        lock_index: 1,
                        create_index: index,
                        modify_index: index,
                    },
                );
                Ok(true)
            }
            Some(entry) => match entry.session.as_deref() {
                None => {
                    entry.session = Some(session_id.to_string());
                    entry.value = value.to_vec();
                    entry.lock_index += 1;
                    entry.modify_index = index;
                    Ok(true)
                }
                Some(holder) if holder == session_id => {
                    entry.value = value.to_vec();
                    entry.modify_index = index;
                    Ok(true)
                }
                Some(_) => Ok(false),
            },
        }
    }

    async fn get_key(&self, key: &str) -> Result<Option<KvPair>> {
        self.guard()?;
        let mut state = self.state.lock();
        state.purge(Instant::now());
        Ok(state
            .kv
            .get(key)
            .map(|entry| MemoryState::kv_pair(key, entry)))
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<KvPair>> {
        self.guard()?;
        let mut state = self.state.lock();
        state.purge(Instant::now());
        Ok(state
            .kv
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, entry)| MemoryState::kv_pair(k, entry))
            .collect())
    }

    async fn delete_key(&self, key: &str) -> Result<()> {
        self.guard()?;
        let mut state = self.state.lock();
        state.purge(Instant::now());
        state.kv.remove(key);
        Ok(())
    }

    async fn register_service(&self, registration: &AgentServiceRegistration) -> Result<()> {
        self.guard()?;
        let now = Instant::now();
        let service_id = registration.service_id();
        let mut state = self.state.lock();
        state.purge(now);
        state.remove_service(&service_id);

        if let Some(check) = &registration.check {
            let check_id = check
                .check_id
                .clone()
                .unwrap_or_else(|| format!("service:{}", service_id));
            let status = check.status.unwrap_or(CheckStatus::Critical);
            state.checks.insert(
                check_id,
                StoredCheck {
                    service_id: service_id.clone(),
                    name: check
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("Service '{}' check", registration.name)),
                    ttl: Self::parse_optional(&check.ttl),
                    deregister_after: Self::parse_optional(&check.deregister_critical_service_after),
                    status,
                    output: String::new(),
                    last_update: now,
                    critical_since: (status == CheckStatus::Critical).then_some(now),
                },
            );
        }

        state.services.insert(service_id, registration.clone());
        Ok(())
    }

    async fn deregister_service(&self, service_id: &str) -> Result<()> {
        self.guard()?;
        let mut state = self.state.lock();
        state.purge(Instant::now());
        state.remove_service(service_id);
        Ok(())
    }

    async fn update_ttl(&self, check_id: &str, output: &str, status: CheckStatus) -> Result<()> {
        self.guard()?;
        let now = Instant::now();
        let mut state = self.state.lock();
        state.purge(now);
        let Some(check) = state.checks.get_mut(check_id) else {
            return Err(ClientError::UnknownCheck(check_id.to_string()));
        };

        check.status = status;
        check.output = output.to_string();
        check.last_update = now;
        check.critical_since = match status {
            CheckStatus::Critical => check.critical_since.or(Some(now)),
            _ => None,
        };

        if state.history.len() == HISTORY_LIMIT {
            state.history.pop_front();
        }
        state.history.push_back((
            check_id.to_string(),
            CheckUpdate {
                status,
                output: output.to_string(),
            },
        ));
        Ok(())
    }

    async fn health_service(
        &self,
        service: &str,
        tags: &[String],
        passing_only: bool,
    ) -> Result<Vec<ServiceEntry>> {
        self.guard()?;
        let mut state = self.state.lock();
        state.purge(Instant::now());

        let mut entries: Vec<ServiceEntry> = state
            .services
            .iter()
            .filter(|(_, reg)| reg.name == service)
            .filter(|(_, reg)| {
                let have = reg.tags.as_deref().unwrap_or_default();
                tags.iter().all(|t| have.contains(t))
            })
            .map(|(id, reg)| ServiceEntry {
                node: Node {
                    node: NODE_NAME.to_string(),
                    address: NODE_ADDRESS.to_string(),
                    datacenter: DATACENTER.to_string(),
                },
                service: AgentService {
                    id: id.clone(),
                    service: reg.name.clone(),
                    tags: reg.tags.clone(),
                    address: reg.address.clone().unwrap_or_default(),
                    port: reg.port.unwrap_or(0),
                    meta: reg.meta.clone(),
                },
                checks: state
                    .checks
                    .iter()
                    .filter(|(_, c)| &c.service_id == id)
                    .map(|(check_id, c)| HealthCheck {
                        check_id: check_id.clone(),
                        name: c.name.clone(),
                        status: c.status,
                        output: c.output.clone(),
                        service_id: id.clone(),
                    })
                    .collect(),
            })
            .filter(|entry| !passing_only || entry.is_passing())
            .collect();

        entries.sort_by(|a, b| a.service.id.cmp(&b.service.id));
        Ok(entries)
    }
}
