//! The locker contract shared by all backends

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use gantry_api::{Service, ServiceRegistration};

use crate::error::{LockerError, Result};

/// Distributed lock and service registration client.
///
/// A lock is a lease: it is held as long as the instance keeps renewing it and is
/// released by the store when the instance disappears. Implementations are
/// initialized once through `init` and then shared behind an `Arc`.
#[async_trait]
pub trait Locker: Send + Sync {
    /// Decode the backend configuration section and connect
    async fn init(&mut self, config: &Value) -> Result<()>;

    /// Block until `key` is acquired with `value` attached, or `cancel` fires.
    ///
    /// Returns `Ok(true)` once the key is held. Cancellation yields
    /// `Err(LockerError::Cancelled)`.
    async fn lock(&self, cancel: &CancellationToken, key: &str, value: &[u8]) -> Result<bool>;

    /// Acquire every key in the background, pushing each key to `notify` once held
    fn lock_many(
        &self,
        cancel: &CancellationToken,
        keys: Vec<String>,
        value: Vec<u8>,
        notify: mpsc::Sender<String>,
    ) -> Result<()>;

    /// Release a held key
    async fn unlock(&self, key: &str) -> Result<()>;

    /// Release every held key and cancel active service heartbeats.
    ///
    /// Every key is attempted; the first error seen is returned.
    async fn stop(&self) -> Result<()>;

    /// Watch a held key, reporting `LockLost` once if another session takes it
    /// or it disappears. The channel closes when `cancel` fires.
    async fn keep_lock(
        &self,
        cancel: &CancellationToken,
        key: &str,
    ) -> Result<mpsc::Receiver<LockerError>>;

    /// Whether any session currently holds `key`
    async fn is_locked(&self, key: &str) -> Result<bool>;

    /// Keys and values stored under `prefix`
    async fn list(&self, prefix: &str) -> Result<HashMap<String, String>>;

    /// Register a health-checked service and heartbeat it until `cancel` fires
    async fn register(
        &self,
        cancel: &CancellationToken,
        registration: ServiceRegistration,
    ) -> Result<()>;

    /// Stop heartbeating a service and remove it from the catalog
    async fn deregister(&self, id: &str) -> Result<()>;

    /// Healthy instances of `name` carrying every tag in `tags`
    async fn get_services(&self, name: &str, tags: &[String]) -> Result<Vec<Service>>;

    /// Poll `get_services` every `interval`, sending the instance list whenever it changes
    async fn watch_services(
        &self,
        cancel: &CancellationToken,
        name: &str,
        tags: &[String],
        tx: mpsc::Sender<Vec<Service>>,
        interval: Duration,
    ) -> Result<()>;
}
