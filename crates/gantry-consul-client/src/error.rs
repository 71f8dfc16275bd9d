//! Client error types for the Consul store

/// Error type for Consul store operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("consul returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid session '{0}'")]
    InvalidSession(String),

    #[error("unknown check '{0}'")]
    UnknownCheck(String),
}

impl ClientError {
    /// True when the error means the store could not be reached at all
    pub fn is_connectivity(&self) -> bool {
        match self {
            ClientError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClientError::Status {
            status: 500,
            body: "rpc error".to_string(),
        };
        assert_eq!(err.to_string(), "consul returned status 500: rpc error");

        let err = ClientError::InvalidSession("abc".to_string());
        assert_eq!(err.to_string(), "invalid session 'abc'");
        assert!(!err.is_connectivity());
    }
}
