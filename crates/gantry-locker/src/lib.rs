//! Gantry Locker - ownership of shared resources across collector instances
//!
//! This crate provides:
//! - `Locker`: the lock/unlock/register contract every backend implements
//! - `LockerRegistry`: backend factories keyed by the configuration `type`
//! - `ConsulLocker`: session based locks with background renewal
//! - `ServiceRegistrar`: TTL health-checked service entries with heartbeats

pub mod consul;
pub mod error;
pub mod locker;
pub mod registry;
pub mod service;

pub use consul::{AcquireWait, ConsulLocker, ConsulLockerConfig};
pub use error::{LockerError, Result};
pub use locker::Locker;
pub use registry::{LockerFactory, LockerRegistry};
pub use service::ServiceRegistrar;
