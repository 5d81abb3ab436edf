use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Empty response from {0}")]
    EmptyResponse(&'static str),
}

impl AiError {
    /// Rate limits, server errors, timeouts and dropped connections are worth retrying.
    /// Everything else will fail the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            AiError::Network(_) | AiError::Timeout(_) => true,
            AiError::Api { status, .. } => *status == 429 || *status >= 500,
            AiError::Config(_) | AiError::Parse(_) | AiError::EmptyResponse(_) => false,
        }
    }
}

impl From<reqwest::Error> for AiError {
    fn from(e: reqwest::Error) -> Self {
        AiError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for AiError {
    fn from(e: serde_json::Error) -> Self {
        AiError::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        assert!(AiError::Api { status: 429, message: String::new() }.is_transient());
        assert!(AiError::Api { status: 503, message: String::new() }.is_transient());
        assert!(AiError::Timeout(Duration::from_secs(1)).is_transient());
    }

    #[test]
    fn client_errors_are_permanent() {
        assert!(!AiError::Api { status: 400, message: String::new() }.is_transient());
        assert!(!AiError::Parse("bad json".into()).is_transient());
        assert!(!AiError::Config("missing key".into()).is_transient());
    }
}
