//! Error types for fleetcoord

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Store Errors ===
    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // === Probe Errors ===
    #[error("Probe failed for {target}: {reason}")]
    Probe { target: String, reason: String },

    // === Configuration Errors ===
    #[error("Unknown load-balancing strategy: {0}")]
    UnknownStrategy(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Coordination Errors ===
    #[error("Node {0} is not the active primary")]
    NotPrimary(String),

    #[error("No eligible candidate: {0}")]
    NoCandidate(String),

    // === Network Errors ===
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // === Generic ===
    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this a transient error worth retrying on the next tick?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Store(_) | Error::Timeout(_) | Error::ConnectionFailed(_) | Error::Http(_)
        )
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::UnknownStrategy(_) | Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Error::NotPrimary(_) => StatusCode::CONFLICT,
            Error::NoCandidate(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::Store(_) | Error::ConnectionFailed(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else if e.is_connect() {
            Error::ConnectionFailed(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Internal(e.to_string())
    }
}
