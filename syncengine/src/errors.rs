use httpfetcher::FetchError;
use syncstore::errors::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The invocation request itself is malformed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The integration cannot be run as configured.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("A sync run for integration '{0}' is already in progress")]
    AlreadyRunning(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Short label used as the `error` field of failure responses.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "ValidationError",
            EngineError::Configuration(_) => "ConfigurationError",
            EngineError::AlreadyRunning(_) => "AlreadyRunning",
            EngineError::Fetch(FetchError::Http { .. }) => "HttpError",
            EngineError::Fetch(FetchError::Network { .. }) => "NetworkError",
            EngineError::Fetch(_) => "FetchError",
            EngineError::Store(_) => "StoreError",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
