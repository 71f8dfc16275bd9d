//! Gantry Consul Client - the store primitive behind the coordination layer
//!
//! This crate provides:
//! - `ConsulApi`: the narrow set of session, KV, agent and health calls the
//!   locker and the consul target loader rely on
//! - `ConsulClient`: HTTP implementation against the Consul v1 API
//! - `MemoryConsul`: in-process implementation with the same session, lock and
//!   TTL-check semantics, for tests and single-node runs
//! - Wire models for the Consul API payloads

pub mod api;
pub mod client;
pub mod error;
pub mod memory;
pub mod model;

pub use api::ConsulApi;
pub use client::{ConsulClient, ConsulClientConfig};
pub use error::{ClientError, Result};
pub use memory::MemoryConsul;
pub use model::*;
