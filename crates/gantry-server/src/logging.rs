//! Logging setup for the gantry server

use serde::Deserialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

const DEFAULT_LEVEL: &str = "info";

/// The `log` section of the server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LogConfig {
    /// Level or filter directives; `RUST_LOG` takes precedence when set
    pub level: String,
    /// Emit one JSON object per line instead of human readable text
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL.to_string(),
            json: false,
        }
    }
}

impl LogConfig {
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let layer: Box<dyn Layer<Registry> + Send + Sync> = if config.json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(false)
            .with_filter(config.filter())
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_filter(config.filter())
            .boxed()
    };

    Registry::default()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    tracing::debug!(level = %config.level, json = config.json, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_defaults() {
        let config: LogConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.level, "info");
        assert!(!config.json);

        let config: LogConfig =
            serde_json::from_str(r#"{"level": "gantry_locker=debug,info", "json": true}"#)
                .unwrap();
        assert!(config.json);
        assert_eq!(config.level, "gantry_locker=debug,info");
    }

    #[test]
    fn test_bad_level_falls_back() {
        let config = LogConfig {
            level: "gantry=[[".to_string(),
            json: false,
        };
        // an unparsable directive must not prevent startup
        let _ = config.filter();
    }
}
