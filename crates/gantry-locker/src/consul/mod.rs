//! Consul session locker
//!
//! A lock is a Consul session with `behavior=delete` that holds the key through
//! an atomic acquire. While held, a background task renews the session; if this
//! instance dies the session TTL lapses and the store deletes the key, letting
//! another instance take over.

mod config;
mod renewal;

pub use config::{AcquireWait, ConsulLockerConfig};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use gantry_api::{Service, ServiceRegistration};
use gantry_common::decode_options;
use gantry_consul_client::{ConsulApi, ConsulClient, SessionBehavior, SessionCreateRequest};

use crate::error::{LockerError, Result};
use crate::locker::Locker;
use crate::service::ServiceRegistrar;

struct LockHandle {
    session: String,
    cancel: CancellationToken,
    renewal: JoinHandle<()>,
}

#[derive(Clone)]
struct Connected {
    api: Arc<dyn ConsulApi>,
    registrar: ServiceRegistrar,
}

/// Locker backed by Consul sessions and KV acquire
#[derive(Clone, Default)]
pub struct ConsulLocker {
    config: ConsulLockerConfig,
    connected: Option<Connected>,
    locks: Arc<Mutex<HashMap<String, LockHandle>>>,
}

impl ConsulLocker {
    /// An uninitialized locker, connected by `init`
    pub fn new() -> Self {
        Self::default()
    }

    /// A locker using an existing store client
    pub fn with_api(api: Arc<dyn ConsulApi>, config: ConsulLockerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            connected: Some(Connected {
                registrar: ServiceRegistrar::new(api.clone()),
                api,
            }),
            locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &ConsulLockerConfig {
        &self.config
    }

    /// Keys currently held by this instance, sorted
    pub async fn held_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.locks.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn connected(&self) -> Result<&Connected> {
        self.connected.as_ref().ok_or(LockerError::NotInitialized)
    }

    fn session_request(&self, key: &str) -> SessionCreateRequest {
        SessionCreateRequest::with_ttl(
            self.config.session_ttl,
            self.config.delay,
            SessionBehavior::Delete,
        )
        .with_name(key)
    }

    /// One acquisition attempt, returning the session now holding `key`
    async fn try_acquire(
        api: &dyn ConsulApi,
        request: &SessionCreateRequest,
        key: &str,
        value: &[u8],
    ) -> Result<String> {
        let session = api.create_session(request).await?;
        let outcome = api.acquire(key, value, &session).await;
        if let Ok(true) = outcome {
            return Ok(session);
        }

        if let Err(e) = api.destroy_session(&session).await {
            debug!("Failed to destroy unused session {}: {}", session, e);
        }
        match outcome {
            Err(e) => Err(e.into()),
            Ok(_) => Err(LockerError::Contention(key.to_string())),
        }
    }

    /// Wait out the retry timer. Returns `Err(Cancelled)` when an interruptible
    /// wait is cut short.
    async fn wait_retry(&self, cancel: &CancellationToken) -> Result<()> {
        let delay = self.config.retry_timer;
        match self.config.acquire_wait {
            AcquireWait::Interruptible => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(LockerError::Cancelled),
                    _ = tokio::time::sleep(delay) => Ok(()),
                }
            }
            AcquireWait::Uninterruptible => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    /// Drop a lock acquired by `session` that is never handed to the caller
    async fn abandon(api: &dyn ConsulApi, key: &str, session: &str) {
        if let Err(e) = api.delete_key(key).await {
            warn!("Failed to delete abandoned lock on {}: {}", key, e);
        }
        if let Err(e) = api.destroy_session(session).await {
            debug!("Failed to destroy session {}: {}", session, e);
        }
        debug!("Abandoned lock on {} after cancellation", key);
    }

    async fn release(api: &dyn ConsulApi, key: &str, handle: LockHandle) -> Result<()> {
        handle.cancel.cancel();
        if let Err(e) = handle.renewal.await {
            debug!("Renewal task for {} ended abnormally: {}", key, e);
        }

        // Only delete the key while our session still holds it
        let deleted = match api.get_key(key).await {
            Ok(Some(pair)) if pair.session.as_deref() == Some(handle.session.as_str()) => {
                api.delete_key(key).await
            }
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        };
        let destroyed = api.destroy_session(&handle.session).await;

        deleted.and(destroyed)?;
        info!("Released lock on {}", key);
        Ok(())
    }
}

#[async_trait]
impl Locker for ConsulLocker {
    async fn init(&mut self, config: &Value) -> Result<()> {
        let config: ConsulLockerConfig = decode_options(config)?;
        config.validate()?;

        let api: Arc<dyn ConsulApi> = Arc::new(ConsulClient::new(config.client_config())?);
        debug!(
            "Consul locker at {} (session-ttl {:?}, retry-timer {:?}, acquire-wait {:?})",
            config.address, config.session_ttl, config.retry_timer, config.acquire_wait
        );
        self.connected = Some(Connected {
            registrar: ServiceRegistrar::new(api.clone()),
            api,
        });
        self.config = config;
        Ok(())
    }

    async fn lock(&self, cancel: &CancellationToken, key: &str, value: &[u8]) -> Result<bool> {
        let api = self.connected()?.api.clone();
        if self.locks.lock().await.contains_key(key) {
            debug!("Lock on {} already held", key);
            return Ok(true);
        }

        let request = self.session_request(key);
        loop {
            if cancel.is_cancelled() {
                return Err(LockerError::Cancelled);
            }

            match Self::try_acquire(api.as_ref(), &request, key, value).await {
                Ok(session) if cancel.is_cancelled() => {
                    // the caller gave up while the acquire was in flight
                    Self::abandon(api.as_ref(), key, &session).await;
                    return Err(LockerError::Cancelled);
                }
                Ok(session) => {
                    let renewal_cancel = cancel.child_token();
                    let renewal = renewal::spawn_renewal(
                        api.clone(),
                        key.to_string(),
                        session.clone(),
                        self.config.renew_period(),
                        renewal_cancel.clone(),
                    );
                    self.locks.lock().await.insert(
                        key.to_string(),
                        LockHandle {
                            session: session.clone(),
                            cancel: renewal_cancel,
                            renewal,
                        },
                    );
                    info!("Acquired lock on {} with session {}", key, session);
                    return Ok(true);
                }
                Err(LockerError::Contention(_)) => {
                    // a concurrent call on this locker may have won the key
                    if self.locks.lock().await.contains_key(key) {
                        return Ok(true);
                    }
                    debug!(
                        "Lock on {} is held elsewhere, retrying in {:?}",
                        key, self.config.retry_timer
                    );
                }
                Err(e) => {
                    warn!(
                        "Failed to acquire lock on {}: {}, retrying in {:?}",
                        key, e, self.config.retry_timer
                    );
                }
            }

            self.wait_retry(cancel).await?;
        }
    }

    fn lock_many(
        &self,
        cancel: &CancellationToken,
        keys: Vec<String>,
        value: Vec<u8>,
        notify: mpsc::Sender<String>,
    ) -> Result<()> {
        self.connected()?;
        let value: Arc<[u8]> = value.into();

        for key in keys {
            let locker = self.clone();
            let cancel = cancel.clone();
            let value = value.clone();
            let notify = notify.clone();
            tokio::spawn(async move {
                match locker.lock(&cancel, &key, &value).await {
                    Ok(_) => {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {}
                            sent = notify.send(key.clone()) => {
                                if sent.is_err() {
                                    debug!("Nobody is listening for the acquisition of {}", key);
                                }
                            }
                        }
                    }
                    Err(LockerError::Cancelled) => debug!("Acquisition of {} cancelled", key),
                    Err(e) => warn!("Gave up acquiring {}: {}", key, e),
                }
            });
        }
        Ok(())
    }

    async fn unlock(&self, key: &str) -> Result<()> {
        let mut locks = self.locks.lock().await;
        let handle = locks
            .remove(key)
            .ok_or_else(|| LockerError::UnknownKey(key.to_string()))?;
        let api = self.connected()?.api.clone();

        Self::release(api.as_ref(), key, handle).await
    }

    async fn stop(&self) -> Result<()> {
        let Some(connected) = &self.connected else {
            return Ok(());
        };
        connected.registrar.cancel_all();

        let mut locks = self.locks.lock().await;
        let mut held: Vec<(String, LockHandle)> = locks.drain().collect();
        held.sort_by(|a, b| a.0.cmp(&b.0));

        let mut first_error = None;
        for (key, handle) in held {
            if let Err(e) = Self::release(connected.api.as_ref(), &key, handle).await {
                error!("Failed to release lock on {}: {}", key, e);
                first_error.get_or_insert(e);
            }
        }
        info!("Locker stopped");

        first_error.map_or(Ok(()), Err)
    }

    async fn keep_lock(
        &self,
        cancel: &CancellationToken,
        key: &str,
    ) -> Result<mpsc::Receiver<LockerError>> {
        let api = self.connected()?.api.clone();
        let session = self
            .locks
            .lock()
            .await
            .get(key)
            .map(|h| h.session.clone())
            .ok_or_else(|| LockerError::UnknownKey(key.to_string()))?;

        let (tx, rx) = mpsc::channel(1);
        let cancel = cancel.clone();
        let key = key.to_string();
        let period = self.config.retry_timer;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                let holder = match api.get_key(&key).await {
                    Ok(pair) => pair.and_then(|p| p.session),
                    Err(e) => {
                        warn!("Failed to check lock on {}: {}", key, e);
                        continue;
                    }
                };
                if holder.as_deref() == Some(session.as_str()) {
                    continue;
                }

                warn!("Lock on {} was lost (holder now {:?})", key, holder);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {}
                    _ = tx.send(LockerError::LockLost(key.clone())) => {}
                }
                return;
            }
        });

        Ok(rx)
    }

    async fn is_locked(&self, key: &str) -> Result<bool> {
        let api = &self.connected()?.api;
        Ok(api.get_key(key).await?.is_some_and(|pair| pair.is_locked()))
    }

    async fn list(&self, prefix: &str) -> Result<HashMap<String, String>> {
        let api = &self.connected()?.api;
        Ok(api
            .list_keys(prefix)
            .await?
            .into_iter()
            .map(|pair| {
                let value = pair.value_string();
                (pair.key, value)
            })
            .collect())
    }

    async fn register(
        &self,
        cancel: &CancellationToken,
        registration: ServiceRegistration,
    ) -> Result<()> {
        self.connected()?
            .registrar
            .register(cancel, registration)
            .await
    }

    async fn deregister(&self, id: &str) -> Result<()> {
        self.connected()?.registrar.deregister(id).await
    }

    async fn get_services(&self, name: &str, tags: &[String]) -> Result<Vec<Service>> {
        self.connected()?.registrar.services(name, tags).await
    }

    async fn watch_services(
        &self,
        cancel: &CancellationToken,
        name: &str,
        tags: &[String],
        tx: mpsc::Sender<Vec<Service>>,
        interval_period: Duration,
    ) -> Result<()> {
        let registrar = self.connected()?.registrar.clone();
        let mut ticker = interval(interval_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last: Option<Vec<Service>> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            let services = match registrar.services(name, tags).await {
                Ok(services) => services,
                Err(e) => {
                    warn!("Failed to list instances of service {}: {}", name, e);
                    continue;
                }
            };
            if last.as_ref() == Some(&services) {
                continue;
            }

            debug!("Service {} now has {} instance(s)", name, services.len());
            last = Some(services.clone());
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                sent = tx.send(services) => {
                    if sent.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}
