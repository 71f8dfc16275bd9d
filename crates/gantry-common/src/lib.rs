//! Gantry Common - shared helpers for the coordination crates
//!
//! This crate provides:
//! - `ConfigError`: the error returned when a backend section fails to decode
//! - Duration-string parsing (`"10s"`, `"1m30s"`) with serde adapters
//! - Typed decoding of untyped backend configuration sections

pub mod duration;
pub mod error;
pub mod options;

pub use duration::{format_duration, parse_duration};
pub use error::ConfigError;
pub use options::{backend_type, decode_options};
