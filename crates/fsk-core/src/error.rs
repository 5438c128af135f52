//! Error types for the core library.

use thiserror::Error;

/// Core library error type.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No usable credentials or an invalid local setup. Not retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// A path resolution or validation error.
    #[error("path error: {0}")]
    Path(String),

    /// An I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The token exchange did not report success.
    #[error("token exchange failed: {0}")]
    RemoteAuth(String),

    /// A call made with a cached token was rejected as unauthorized.
    #[error("request unauthorized: {0}")]
    DownstreamAuth(String),

    /// An API or HTTP error.
    #[error("API error: {0}")]
    Api(String),

    /// Invalid request parameters supplied by the caller.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A generic error for other cases.
    #[error("error: {0}")]
    Other(String),
}

impl CoreError {
    /// Whether a downstream call rejected the bearer token.
    #[must_use]
    pub const fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::DownstreamAuth(_))
    }

    /// Whether the error comes from missing or unusable local configuration.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_auth_and_config_errors() {
        assert!(CoreError::DownstreamAuth("401".into()).is_auth_rejection());
        assert!(!CoreError::RemoteAuth("bad secret".into()).is_auth_rejection());
        assert!(CoreError::Config("no credentials".into()).is_configuration());
        assert!(!CoreError::Api("boom".into()).is_configuration());
    }

    #[test]
    fn display_keeps_context() {
        let err = CoreError::RemoteAuth("code 10003: invalid param".into());
        assert_eq!(err.to_string(), "token exchange failed: code 10003: invalid param");
    }
}
