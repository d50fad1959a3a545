use reqwest::StatusCode;
use thiserror::Error;

/// Why a request never produced an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkFailure {
    Timeout,
    Connection(String),
}

impl std::fmt::Display for NetworkFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkFailure::Timeout => write!(f, "request timed out"),
            NetworkFailure::Connection(reason) => write!(f, "connection failed: {reason}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {reason}")]
    Network { reason: NetworkFailure },

    #[error("HTTP {status}: {body}")]
    Http { status: StatusCode, body: String },

    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Response body is not valid JSON: {0}")]
    Decode(String),

    #[error("Missing credentials for {method} auth: {field}")]
    MissingCredentials {
        method: &'static str,
        field: &'static str,
    },

    #[error("Invalid header value for '{0}'")]
    InvalidHeader(String),
}

impl FetchError {
    pub fn timeout() -> Self {
        FetchError::Network {
            reason: NetworkFailure::Timeout,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FetchError::Network {
                reason: NetworkFailure::Timeout
            }
        )
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::timeout()
        } else if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Network {
                reason: NetworkFailure::Connection(err.to_string()),
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
