//! Service registration with TTL heartbeats
//!
//! Each registration advertises that this instance owns a resource. The entry
//! carries a single TTL check that the registrar keeps passing; once the
//! registration is cancelled the check is turned critical and the store drops
//! the entry after it has been critical for twice the TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gantry_api::{Service, ServiceRegistration};
use gantry_common::{ConfigError, format_duration};
use gantry_consul_client::{AgentServiceCheck, AgentServiceRegistration, CheckStatus, ConsulApi};

use crate::error::Result;

const REASON_CANCELLED: &str = "registration cancelled: shutting down";
const REASON_DEREGISTERED: &str = "registration cancelled: deregistered";

/// TTL check ID used for a service registration
pub fn check_id(service_id: &str) -> String {
    format!("service:{}", service_id)
}

struct ActiveRegistration {
    generation: u64,
    cancel: CancellationToken,
}

/// Tracks active registrations and drives their heartbeats
#[derive(Clone)]
pub struct ServiceRegistrar {
    api: Arc<dyn ConsulApi>,
    active: Arc<Mutex<HashMap<String, ActiveRegistration>>>,
    generation: Arc<AtomicU64>,
}

impl ServiceRegistrar {
    pub fn new(api: Arc<dyn ConsulApi>) -> Self {
        Self {
            api,
            active: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register `registration` and heartbeat its check until `cancel` fires.
    ///
    /// Registering an ID that is already active replaces the previous heartbeat.
    pub async fn register(
        &self,
        cancel: &CancellationToken,
        registration: ServiceRegistration,
    ) -> Result<()> {
        if registration.id.is_empty() {
            return Err(ConfigError::Missing("id").into());
        }
        if registration.ttl.is_zero() {
            return Err(ConfigError::Invalid(format!(
                "service '{}' needs a non-zero ttl",
                registration.id
            ))
            .into());
        }

        let token = cancel.child_token();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self.active.lock().insert(
            registration.id.clone(),
            ActiveRegistration {
                generation,
                cancel: token.clone(),
            },
        );
        if let Some(previous) = previous {
            debug!("Replacing heartbeat of service {}", registration.id);
            previous.cancel.cancel();
        }

        let check_id = check_id(&registration.id);
        if let Err(e) = self.announce(&registration, &check_id).await {
            self.forget(&registration.id, generation);
            return Err(e);
        }
        info!(
            "Registered service {} ({}) with ttl {:?}",
            registration.id, registration.name, registration.ttl
        );

        let period = registration.ttl / 2;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.api.update_ttl(&check_id, "", CheckStatus::Passing).await {
                        warn!("Failed to heartbeat service {}: {}", registration.id, e);
                    }
                }
            }
        }

        let reason = {
            let mut active = self.active.lock();
            match active.get(&registration.id) {
                Some(current) if current.generation == generation => {
                    active.remove(&registration.id);
                    Some(REASON_CANCELLED)
                }
                Some(_) => None,
                None => Some(REASON_DEREGISTERED),
            }
        };

        // A newer registration for the same ID owns the check now
        let Some(reason) = reason else {
            return Ok(());
        };

        match self
            .api
            .update_ttl(&check_id, reason, CheckStatus::Critical)
            .await
        {
            Ok(()) => info!("Service {} marked critical: {}", registration.id, reason),
            Err(e) => debug!(
                "Could not mark service {} critical: {}",
                registration.id, e
            ),
        }
        Ok(())
    }

    /// Stop the heartbeat of `id` and remove it from the catalog
    pub async fn deregister(&self, id: &str) -> Result<()> {
        if let Some(active) = self.active.lock().remove(id) {
            active.cancel.cancel();
        }
        self.api.deregister_service(id).await?;
        info!("Deregistered service {}", id);
        Ok(())
    }

    /// Cancel every active heartbeat, leaving catalog entries to expire
    pub fn cancel_all(&self) {
        for registration in self.active.lock().values() {
            registration.cancel.cancel();
        }
    }

    /// IDs with a running heartbeat
    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Passing instances of `name` carrying every tag in `tags`
    pub async fn services(&self, name: &str, tags: &[String]) -> Result<Vec<Service>> {
        let entries = self.api.health_service(name, tags, true).await?;
        let mut services: Vec<Service> = entries
            .iter()
            .map(|entry| Service {
                id: entry.service.id.clone(),
                name: entry.service.service.clone(),
                address: entry.effective_address().to_string(),
                port: entry.service.port,
                tags: entry.service.tags.clone().unwrap_or_default(),
            })
            .collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(services)
    }

    async fn announce(&self, registration: &ServiceRegistration, check_id: &str) -> Result<()> {
        let agent_registration = AgentServiceRegistration {
            id: Some(registration.id.clone()),
            name: registration.name.clone(),
            tags: (!registration.tags.is_empty()).then(|| registration.tags.clone()),
            address: (!registration.address.is_empty()).then(|| registration.address.clone()),
            port: (registration.port != 0).then_some(registration.port),
            meta: None,
            check: Some(AgentServiceCheck {
                check_id: Some(check_id.to_string()),
                name: Some(format!("{} ttl", registration.id)),
                ttl: Some(format_duration(registration.ttl)),
                deregister_critical_service_after: Some(format_duration(registration.ttl * 2)),
                notes: None,
                status: None,
            }),
        };

        self.api.register_service(&agent_registration).await?;
        self.api
            .update_ttl(check_id, "", CheckStatus::Passing)
            .await?;
        Ok(())
    }

    fn forget(&self, id: &str, generation: u64) {
        let mut active = self.active.lock();
        if active.get(id).is_some_and(|a| a.generation == generation) {
            active.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_consul_client::MemoryConsul;
    use std::time::Duration;

    fn registration(id: &str) -> ServiceRegistration {
        ServiceRegistration {
            id: id.to_string(),
            name: "gantry-collector".to_string(),
            address: "10.0.0.5".to_string(),
            port: 7890,
            tags: vec!["router1".to_string()],
            ttl: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_check_id() {
        assert_eq!(check_id("c1-router1"), "service:c1-router1");
    }

    #[tokio::test]
    async fn test_register_rejects_zero_ttl() {
        let registrar = ServiceRegistrar::new(Arc::new(MemoryConsul::new()));
        let mut reg = registration("c1");
        reg.ttl = Duration::ZERO;
        let result = registrar.register(&CancellationToken::new(), reg).await;
        assert!(result.is_err());
        assert!(registrar.active_ids().is_empty());
    }

    #[tokio::test]
    async fn test_register_failure_is_not_tracked() {
        let store = Arc::new(MemoryConsul::new());
        store.set_unavailable(true);
        let registrar = ServiceRegistrar::new(store.clone());
        let result = registrar
            .register(&CancellationToken::new(), registration("c1"))
            .await;
        assert!(result.is_err());
        assert!(registrar.active_ids().is_empty());
    }

    #[tokio::test]
    async fn test_services_lists_passing_instances() {
        let store = Arc::new(MemoryConsul::new());
        let registrar = ServiceRegistrar::new(store.clone());
        let cancel = CancellationToken::new();

        let task = {
            let registrar = registrar.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { registrar.register(&cancel, registration("c1")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let services = registrar.services("gantry-collector", &[]).await.unwrap();
        assert_eq!(
            services,
            vec![Service {
                id: "c1".to_string(),
                name: "gantry-collector".to_string(),
                address: "10.0.0.5".to_string(),
                port: 7890,
                tags: vec!["router1".to_string()],
            }]
        );

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert!(
            registrar
                .services("gantry-collector", &[])
                .await
                .unwrap()
                .is_empty()
        );
    }
}
