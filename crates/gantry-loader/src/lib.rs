//! Gantry Loader - turns a refreshed target inventory into add/delete operations
//!
//! This crate provides:
//! - `diff`: the pure snapshot comparison behind every loader
//! - `TargetLoader`: the init/start contract every backend implements
//! - `LoaderRegistry`: backend factories keyed by the configuration `type`
//! - `Poller`: the poll loop shared by the file, http and consul backends
//! - Prometheus gauges and counters describing each loader

pub mod consul;
pub mod diff;
pub mod error;
pub mod file;
pub mod http;
pub mod loader;
pub mod metrics;
pub mod options;
pub mod poller;
pub mod registry;

pub use consul::{ConsulLoader, ConsulLoaderConfig, ConsulServiceConfig};
pub use diff::diff;
pub use error::{LoaderError, Result};
pub use file::{FileLoader, FileLoaderConfig};
pub use http::{HttpLoader, HttpLoaderConfig};
pub use loader::{LoaderHooks, TargetAction, TargetLoader, TargetsDefaults, parse_targets};
pub use metrics::LoaderMetrics;
pub use options::LoaderOptions;
pub use poller::{Poller, TargetSource};
pub use registry::{LoaderFactory, LoaderRegistry};
