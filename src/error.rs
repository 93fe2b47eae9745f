//! Error types for the attestation client

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Attestation session not initialised - call initialise() first")]
    NotInitialized,

    #[error("Attestation service unreachable: {0}")]
    NetworkFailure(String),

    #[error("Attestation rejected: {0}")]
    AttestationRejected(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Script bridge call rejected: {0}")]
    Bridge(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the failover endpoint should be tried after this error.
    ///
    /// Only transport-level failures qualify; a rejection from the service
    /// would be repeated verbatim by the failover.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::NetworkFailure(_))
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::InvalidUrl(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
