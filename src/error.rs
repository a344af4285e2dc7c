//! Typed failures raised by the HTTP gateways and the service lifecycle.
//!
//! Most of the crate propagates [`anyhow::Error`]; these enums exist for the
//! failures a caller may want to inspect (e.g. a startup routine checking
//! which status the search engine answered with).

use thiserror::Error;

/// A failed exchange with the repository or the search engine.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The remote answered with a status the operation does not accept.
    #[error("{method} {url} failed with status {status}: {body}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    /// The request never produced a response (connect, timeout, TLS, ...).
    #[error("{method} {url} failed: {source}")]
    Transport {
        method: &'static str,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid resource URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    /// The index configuration has no resolvable property map.
    #[error("malformed index configuration: {0}")]
    MalformedConfig(String),

    #[error("{url} did not return a JSON object")]
    NotAnObject { url: String },
}

impl GatewayError {
    /// HTTP status carried by the error, if the remote answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Lifecycle errors of the [`SyncService`](crate::service::SyncService).
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service has been stopped; the event is left unacknowledged.
    #[error("sync service is not running")]
    NotRunning,
}
