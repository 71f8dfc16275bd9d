//! Configuration error type shared by all backends

/// Error raised while decoding or validating a backend configuration section.
///
/// Always fatal to `init`; never retried.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required field '{0}'")]
    Missing(&'static str),

    #[error("invalid duration '{0}'")]
    InvalidDuration(String),

    #[error("unknown backend type '{0}'")]
    UnknownType(String),

    #[error("failed to decode configuration: {0}")]
    Decode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::Missing("path");
        assert_eq!(err.to_string(), "missing required field 'path'");

        let err = ConfigError::UnknownType("etcd".to_string());
        assert_eq!(err.to_string(), "unknown backend type 'etcd'");

        let err = ConfigError::InvalidDuration("10x".to_string());
        assert_eq!(err.to_string(), "invalid duration '10x'");
    }
}
