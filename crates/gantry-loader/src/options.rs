//! Options shared by every loader backend
//!
//! A loader section mixes the common poll options with backend specific ones.
//! The common keys are split off first so each backend can decode the rest with
//! `deny_unknown_fields`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use gantry_common::options::TYPE_KEY;
use gantry_common::{ConfigError, decode_options};

const COMMON_KEYS: [&str; 5] = [
    "interval",
    "on-add",
    "on-delete",
    "enable-metrics",
    "channel-capacity",
];

const DEFAULT_CHANNEL_CAPACITY: usize = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct LoaderOptions {
    /// Poll interval, backend default when unset
    #[serde(
        with = "gantry_common::duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub interval: Option<Duration>,
    /// Actions run for every added target
    pub on_add: Vec<String>,
    /// Actions run for every deleted target
    pub on_delete: Vec<String>,
    pub enable_metrics: bool,
    /// Capacity of the operation channel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_capacity: Option<usize>,
}

impl LoaderOptions {
    /// Split a loader section into the common options and the backend section
    pub fn split(config: &Value) -> Result<(LoaderOptions, Value), ConfigError> {
        let mut backend = match config {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            other => {
                return Err(ConfigError::Invalid(format!(
                    "expected a mapping, got '{}'",
                    other
                )));
            }
        };
        backend.remove(TYPE_KEY);

        let mut common = Map::new();
        for key in COMMON_KEYS {
            if let Some(value) = backend.remove(key) {
                common.insert(key.to_string(), value);
            }
        }

        let options: LoaderOptions = decode_options(&Value::Object(common))?;
        options.validate()?;
        Ok((options, Value::Object(backend)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_some_and(|i| i.is_zero()) {
            return Err(ConfigError::Invalid(
                "interval must be greater than zero".to_string(),
            ));
        }
        if self.channel_capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "channel-capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn interval_or(&self, default: Duration) -> Duration {
        self.interval.unwrap_or(default)
    }

    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split() {
        let (options, backend) = LoaderOptions::split(&json!({
            "type": "file",
            "path": "/etc/gantry/targets.yml",
            "interval": "10s",
            "on-add": ["notify"],
            "enable-metrics": true
        }))
        .unwrap();

        assert_eq!(options.interval, Some(Duration::from_secs(10)));
        assert_eq!(options.on_add, vec!["notify"]);
        assert!(options.on_delete.is_empty());
        assert!(options.enable_metrics);
        assert_eq!(options.channel_capacity(), 1);
        assert_eq!(backend, json!({"path": "/etc/gantry/targets.yml"}));
    }

    #[test]
    fn test_defaults() {
        let (options, backend) = LoaderOptions::split(&Value::Null).unwrap();
        assert_eq!(
            options.interval_or(Duration::from_secs(30)),
            Duration::from_secs(30)
        );
        assert!(!options.enable_metrics);
        assert_eq!(backend, json!({}));
    }

    #[test]
    fn test_invalid() {
        assert!(LoaderOptions::split(&json!({"interval": "0s"})).is_err());
        assert!(LoaderOptions::split(&json!({"channel-capacity": 0})).is_err());
        assert!(LoaderOptions::split(&json!({"interval": "soon"})).is_err());
        assert!(LoaderOptions::split(&json!(["path"])).is_err());
    }
}
