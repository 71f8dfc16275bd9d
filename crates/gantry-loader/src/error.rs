//! Loader error types

use gantry_common::ConfigError;
use gantry_consul_client::ClientError;

/// Error type for loader operations
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("loader is not initialized")]
    NotInitialized,

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("consul error: {0}")]
    Client(#[from] ClientError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl LoaderError {
    /// Short label used for the watch-error counter
    pub fn kind(&self) -> &'static str {
        match self {
            LoaderError::Config(_) => "config",
            LoaderError::NotInitialized => "not_initialized",
            LoaderError::Fetch(_) => "fetch",
            LoaderError::Io(_) => "io",
            LoaderError::Parse(_) => "parse",
            LoaderError::Http(_) => "http",
            LoaderError::Client(_) => "consul",
            LoaderError::Metrics(_) => "metrics",
        }
    }
}

pub type Result<T> = std::result::Result<T, LoaderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        assert_eq!(LoaderError::Parse("bad".to_string()).kind(), "parse");
        assert_eq!(
            LoaderError::Io(std::io::Error::from(std::io::ErrorKind::NotFound)).kind(),
            "io"
        );
        assert_eq!(
            LoaderError::Fetch("http://inventory returned 503".to_string()).to_string(),
            "fetch failed: http://inventory returned 503"
        );
    }
}
