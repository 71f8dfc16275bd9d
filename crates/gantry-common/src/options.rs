//! Decoding of untyped backend configuration sections
//!
//! Every locker and loader backend receives its section of the configuration as
//! a `serde_json::Value` map. The `type` key selects the backend in the registry
//! and is stripped before the remainder is decoded into the backend's typed
//! option struct.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Key selecting the backend implementation inside a configuration section.
pub const TYPE_KEY: &str = "type";

/// Read the backend type name from a configuration section.
pub fn backend_type(config: &Value) -> Result<&str, ConfigError> {
    config
        .get(TYPE_KEY)
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or(ConfigError::Missing(TYPE_KEY))
}

/// Decode a configuration section into a typed option struct.
///
/// `null` decodes as an empty section so that backends with all-default options
/// accept a missing section.
pub fn decode_options<T: DeserializeOwned>(config: &Value) -> Result<T, ConfigError> {
    let mut section = match config {
        Value::Null => Map::new(),
        Value::Object(map) => map.clone(),
        other => {
            return Err(ConfigError::Invalid(format!(
                "expected a mapping, got '{}'",
                other
            )));
        }
    };
    section.remove(TYPE_KEY);

    Ok(serde_json::from_value(Value::Object(section))?)
}
