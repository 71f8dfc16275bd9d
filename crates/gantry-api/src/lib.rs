//! Gantry API - models exchanged between the coordination components
//!
//! - `TargetConfig` / `TargetOperation`: produced by target loaders
//! - `ServiceRegistration` / `Service`: consumed and returned by lockers

pub mod model;

pub use model::*;
