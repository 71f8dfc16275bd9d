use std::time::Duration;

use serde::{Deserialize, Serialize};

use gantry_common::ConfigError;
use gantry_consul_client::ConsulClientConfig;

const DEFAULT_ADDRESS: &str = "localhost:8500";
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(10);
const DEFAULT_LOCK_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_RETRY_TIMER: Duration = Duration::from_secs(2);

/// How the retry wait between acquisition attempts reacts to cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AcquireWait {
    /// The wait ends as soon as the caller cancels
    #[default]
    Interruptible,
    /// The wait runs to completion; cancellation is seen before the next attempt
    Uninterruptible,
}

/// Consul locker options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct ConsulLockerConfig {
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Session TTL; a crashed holder's keys are freed once it lapses
    #[serde(with = "gantry_common::duration")]
    pub session_ttl: Duration,
    /// Lock-delay applied by the store after a session is invalidated
    #[serde(with = "gantry_common::duration")]
    pub delay: Duration,
    /// Wait between acquisition attempts
    #[serde(with = "gantry_common::duration")]
    pub retry_timer: Duration,
    /// Session renewal period, half the TTL when unset
    #[serde(
        with = "gantry_common::duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub renew_period: Option<Duration>,
    pub acquire_wait: AcquireWait,
}

impl Default for ConsulLockerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            datacenter: None,
            username: None,
            password: None,
            token: None,
            session_ttl: DEFAULT_SESSION_TTL,
            delay: DEFAULT_LOCK_DELAY,
            retry_timer: DEFAULT_RETRY_TIMER,
            renew_period: None,
            acquire_wait: AcquireWait::default(),
        }
    }
}

impl ConsulLockerConfig {
    pub fn renew_period(&self) -> Duration {
        self.renew_period.unwrap_or(self.session_ttl / 2)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::Missing("address"));
        }
        if self.session_ttl.is_zero() {
            return Err(ConfigError::Invalid(
                "session-ttl must be greater than zero".to_string(),
            ));
        }
        if self.retry_timer.is_zero() {
            return Err(ConfigError::Invalid(
                "retry-timer must be greater than zero".to_string(),
            ));
        }
        let renew = self.renew_period();
        if renew.is_zero() || renew >= self.session_ttl {
            return Err(ConfigError::Invalid(format!(
                "renew-period must be between zero and session-ttl ({:?}), got {:?}",
                self.session_ttl, renew
            )));
        }
        Ok(())
    }

    /// Connection settings for the store client
    pub fn client_config(&self) -> ConsulClientConfig {
        let mut config = ConsulClientConfig::new(&self.address);
        config.datacenter = self.datacenter.clone();
        config.token = self.token.clone();
        config.username = self.username.clone();
        config.password = self.password.clone();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_common::decode_options;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config: ConsulLockerConfig = decode_options(&json!({"type": "consul"})).unwrap();
        assert_eq!(config.address, "localhost:8500");
        assert_eq!(config.session_ttl, Duration::from_secs(10));
        assert_eq!(config.delay, Duration::from_secs(5));
        assert_eq!(config.retry_timer, Duration::from_secs(2));
        assert_eq!(config.renew_period(), Duration::from_secs(5));
        assert_eq!(config.acquire_wait, AcquireWait::Interruptible);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_decode_overrides() {
        let config: ConsulLockerConfig = decode_options(&json!({
            "address": "consul:8500",
            "datacenter": "dc2",
            "token": "secret",
            "session-ttl": "30s",
            "retry-timer": "500ms",
            "renew-period": 10,
            "acquire-wait": "uninterruptible"
        }))
        .unwrap();
        assert_eq!(config.session_ttl, Duration::from_secs(30));
        assert_eq!(config.retry_timer, Duration::from_millis(500));
        assert_eq!(config.renew_period(), Duration::from_secs(10));
        assert_eq!(config.acquire_wait, AcquireWait::Uninterruptible);

        let client = config.client_config();
        assert_eq!(client.address, "consul:8500");
        assert_eq!(client.datacenter.as_deref(), Some("dc2"));
        assert_eq!(client.token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let result: Result<ConsulLockerConfig, _> =
            decode_options(&json!({"address": "consul:8500", "sesion-ttl": "5s"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate() {
        let config = ConsulLockerConfig {
            renew_period: Some(Duration::from_secs(10)),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ConsulLockerConfig {
            session_ttl: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ConsulLockerConfig {
            address: " ".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("address"))
        ));
    }
}
