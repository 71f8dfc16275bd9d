//! Target ownership
//!
//! Every target the loader adds gets an ownership task: it takes the target's
//! lock, advertises the ownership as a health-checked service and keeps both
//! until the target is deleted or the instance shuts down. A task that loses
//! its lock withdraws the service and competes for the lock again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use gantry_api::{ServiceRegistration, TargetConfig, TargetOperation};
use gantry_locker::{Locker, LockerError, Result};

/// How this instance claims and advertises targets
#[derive(Debug, Clone)]
pub struct OwnershipConfig {
    pub instance_name: String,
    pub lock_prefix: String,
    pub service_name: String,
    pub service_address: String,
    pub service_port: u16,
    pub service_ttl: Duration,
}

impl OwnershipConfig {
    pub fn lock_key(&self, target: &str) -> String {
        format!("{}/{}", self.lock_prefix, target)
    }

    pub fn service_id(&self, target: &str) -> String {
        format!("{}-{}", self.instance_name, target)
    }

    fn registration(&self, target: &TargetConfig) -> ServiceRegistration {
        ServiceRegistration {
            id: self.service_id(&target.name),
            name: self.service_name.clone(),
            address: self.service_address.clone(),
            port: self.service_port,
            tags: vec![target.name.clone()],
            ttl: self.service_ttl,
        }
    }
}

struct OwnershipTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Applies target operations by claiming and releasing target locks
pub struct Orchestrator {
    locker: Arc<dyn Locker>,
    config: OwnershipConfig,
    root: CancellationToken,
    tasks: HashMap<String, OwnershipTask>,
}

impl Orchestrator {
    pub fn new(locker: Arc<dyn Locker>, config: OwnershipConfig, root: CancellationToken) -> Self {
        Self {
            locker,
            config,
            root,
            tasks: HashMap::new(),
        }
    }

    /// Targets this instance is trying to own or owns
    pub fn targets(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Apply operations until the stream ends or the root token fires, then release everything
    pub async fn run(mut self, mut ops: mpsc::Receiver<TargetOperation>) -> Result<()> {
        loop {
            tokio::select! {
                biased;
                _ = self.root.cancelled() => break,
                op = ops.recv() => match op {
                    Some(op) => self.apply(op).await,
                    None => {
                        info!("Target stream ended");
                        break;
                    }
                },
            }
        }
        self.shutdown().await
    }

    pub async fn apply(&mut self, op: TargetOperation) {
        for name in &op.del {
            self.release(name).await;
        }
        for target in op.add {
            self.claim(target);
        }
    }

    fn claim(&mut self, target: TargetConfig) {
        if self.tasks.contains_key(&target.name) {
            debug!("Target {} is already being claimed", target.name);
            return;
        }

        let cancel = self.root.child_token();
        let name = target.name.clone();
        let handle = tokio::spawn(own_target(
            self.locker.clone(),
            self.config.clone(),
            target,
            cancel.clone(),
        ));
        self.tasks.insert(name, OwnershipTask { cancel, handle });
    }

    /// Stop owning `name`: end its task, then drop the lock and the service
    pub async fn release(&mut self, name: &str) {
        let Some(task) = self.tasks.remove(name) else {
            debug!("Target {} is not owned here", name);
            return;
        };
        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            warn!("Ownership task for {} ended abnormally: {}", name, e);
        }

        match self.locker.unlock(&self.config.lock_key(name)).await {
            Ok(()) => info!("Released target {}", name),
            Err(LockerError::UnknownKey(_)) => debug!("Target {} was never acquired", name),
            Err(e) => warn!("Failed to release target {}: {}", name, e),
        }
        if let Err(e) = self.locker.deregister(&self.config.service_id(name)).await {
            warn!("Failed to deregister service for {}: {}", name, e);
        }
    }

    /// End every ownership task and release all locks
    pub async fn shutdown(mut self) -> Result<()> {
        info!("Releasing {} target(s)", self.tasks.len());
        for (name, task) in self.tasks.drain() {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                warn!("Ownership task for {} ended abnormally: {}", name, e);
            }
        }
        self.locker.stop().await
    }
}

async fn own_target(
    locker: Arc<dyn Locker>,
    config: OwnershipConfig,
    target: TargetConfig,
    cancel: CancellationToken,
) {
    let key = config.lock_key(&target.name);
    let value = config.instance_name.clone().into_bytes();

    loop {
        match locker.lock(&cancel, &key, &value).await {
            Ok(true) => {}
            Ok(false) | Err(LockerError::Cancelled) => return,
            Err(e) => {
                error!("Giving up on target {}: {}", target.name, e);
                return;
            }
        }
        info!(
            "Acquired target {} ({}), collecting",
            target.name, target.address
        );

        let mut lost = match locker.keep_lock(&cancel, &key).await {
            Ok(lost) => lost,
            Err(e) => {
                warn!("Cannot watch lock on {}: {}", key, e);
                let (_tx, rx) = mpsc::channel(1);
                rx
            }
        };

        let advertise = cancel.child_token();
        let heartbeat = tokio::spawn(advertise_target(
            locker.clone(),
            config.registration(&target),
            advertise.clone(),
        ));

        let relinquished = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            Some(e) = lost.recv() => {
                warn!("Stopped collecting target {}: {}", target.name, e);
                true
            }
        };

        advertise.cancel();
        if let Err(e) = heartbeat.await {
            warn!("Service heartbeat for {} ended abnormally: {}", target.name, e);
        }
        if !relinquished {
            return;
        }

        // Drop the stale local handle so the next attempt really competes
        if let Err(e) = locker.unlock(&key).await {
            debug!("Releasing lost lock {}: {}", key, e);
        }
    }
}

/// Keep the ownership service registered until `cancel` fires, retrying failed registrations
async fn advertise_target(
    locker: Arc<dyn Locker>,
    registration: ServiceRegistration,
    cancel: CancellationToken,
) {
    let retry = registration.ttl;
    loop {
        match locker.register(&cancel, registration.clone()).await {
            Ok(()) => return,
            Err(e) => warn!("Failed to register service {}: {}", registration.id, e),
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(retry) => {}
        }
    }
}
