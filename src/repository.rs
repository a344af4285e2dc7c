//! Repository gateway: fetches the current representation of a resource.
//!
//! Resources are requested as compact JSON-LD with server-managed triples
//! omitted, which keeps the representation flat enough to be projected onto
//! the index mapping. A `410 Gone` answer means the resource has been
//! deleted since the notification was sent; it is reported as
//! [`Fetched::Tombstoned`] rather than as an error.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde_json::{Map, Value};

use crate::error::GatewayError;

/// `Accept` value asking for the compacted JSON-LD representation.
pub const ACCEPT_COMPACT_JSON_LD: &str =
    "application/ld+json; profile=\"http://www.w3.org/ns/json-ld#compacted\"";

/// `Prefer` value asking the repository to leave out server-managed triples.
pub const PREFER_OMIT_SERVER_MANAGED: &str =
    "return=representation; omit=\"http://fedora.info/definitions/v4/repository#ServerManaged\"";

/// Result of fetching a resource.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    /// The resource's current top-level JSON object.
    Representation(Map<String, Value>),
    /// The resource is gone; a delete notification is expected.
    Tombstoned,
}

/// Source of resource representations.
///
/// Implemented over HTTP by [`HttpRepository`]; tests substitute in-memory
/// fakes.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Fetch the current representation of `resource_uri`.
    ///
    /// # Errors
    ///
    /// Any failure other than a tombstone: transport errors, non-success
    /// statuses, bodies that are not JSON objects.
    async fn fetch(&self, resource_uri: &str) -> Result<Fetched>;
}

/// Basic-auth credentials for the repository.
#[derive(Clone)]
pub struct Credentials {
    user: String,
    password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Repository gateway over authenticated HTTP.
pub struct HttpRepository {
    client: reqwest::Client,
    credentials: Credentials,
}

impl HttpRepository {
    /// Wrap a shared client. The client's timeout bounds every fetch.
    pub fn new(client: reqwest::Client, credentials: Credentials) -> Self {
        Self {
            client,
            credentials,
        }
    }
}

#[async_trait]
impl ResourceFetcher for HttpRepository {
    async fn fetch(&self, resource_uri: &str) -> Result<Fetched> {
        let response = self
            .client
            .get(resource_uri)
            .basic_auth(&self.credentials.user, Some(&self.credentials.password))
            .header(ACCEPT, ACCEPT_COMPACT_JSON_LD)
            .header("Prefer", PREFER_OMIT_SERVER_MANAGED)
            .send()
            .await
            .map_err(|source| GatewayError::Transport {
                method: "GET",
                url: resource_uri.to_string(),
                source,
            })?;

        let status = response.status();

        if status == StatusCode::GONE {
            tracing::debug!(uri = resource_uri, "Resource is tombstoned");
            return Ok(Fetched::Tombstoned);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(uri = resource_uri, status = status.as_u16(), "Failed to retrieve resource");
            return Err(GatewayError::Status {
                method: "GET",
                url: resource_uri.to_string(),
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let json: Value = response
            .json()
            .await
            .map_err(|source| GatewayError::Transport {
                method: "GET",
                url: resource_uri.to_string(),
                source,
            })?;

        match json {
            Value::Object(map) => Ok(Fetched::Representation(map)),
            _ => Err(GatewayError::NotAnObject {
                url: resource_uri.to_string(),
            }
            .into()),
        }
    }
}
