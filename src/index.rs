//! Search engine gateway: index bootstrap and document writes.
//!
//! [`ElasticIndex::connect`] establishes the index before any event is
//! consumed. If the index already exists its configuration is read back and
//! left untouched; otherwise it is created from a [`SchemaSource`]. Either
//! way the resulting mapping becomes the service's [`IndexSchema`].
//!
//! # Document identity
//!
//! Documents are keyed by the URL-safe base64 encoding of the resource URI's
//! path. Scheme, host and port are discarded, so the same resource reached
//! through different hosts maps to one document, and the encoding is
//! injective, so different paths never collide.
//!
//! # Endpoints
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | `GET` | `<index>` | Read existing configuration (404 = absent) |
//! | `PUT` | `<index>` | Create the index |
//! | `POST` | `<index>/_doc/<id>` | Create or replace a document |
//! | `DELETE` | `<index>/_doc/<id>` | Remove a document |

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use reqwest::{StatusCode, Url};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::GatewayError;
use crate::models::{DocumentId, NormalizedDocument};
use crate::schema::{builtin_index_config, IndexSchema};

/// Derive the document id for a resource URI.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidUri`] if `resource_uri` is not an
/// absolute URI.
pub fn document_id(resource_uri: &str) -> Result<DocumentId, GatewayError> {
    Url::parse(resource_uri).map_err(|e| GatewayError::InvalidUri {
        uri: resource_uri.to_string(),
        reason: e.to_string(),
    })?;
    let path = raw_path(resource_uri.trim());
    Ok(DocumentId::new(URL_SAFE.encode(path.as_bytes())))
}

/// The path of an absolute URI exactly as written: no dot-segment removal,
/// no percent-encoding, no separator rewriting.
fn raw_path(uri: &str) -> &str {
    let rest = uri.split_once(':').map_or(uri, |(_, rest)| rest);
    let rest = match rest.strip_prefix("//") {
        Some(authority_and_path) => {
            let end = authority_and_path
                .find(&['/', '?', '#'][..])
                .unwrap_or(authority_and_path.len());
            &authority_and_path[end..]
        }
        None => rest,
    };
    let end = rest.find(&['?', '#'][..]).unwrap_or(rest.len());
    match &rest[..end] {
        "" => "/",
        path => path,
    }
}

/// Where the index configuration comes from when the index must be created.
#[derive(Debug, Clone, Default)]
pub enum SchemaSource {
    /// The configuration shipped with this crate.
    #[default]
    BuiltIn,
    /// A JSON file on disk.
    File(PathBuf),
}

impl SchemaSource {
    /// Load the configuration document.
    pub fn load(&self) -> Result<Value> {
        match self {
            SchemaSource::BuiltIn => builtin_index_config(),
            SchemaSource::File(path) => {
                let content = std::fs::read_to_string(path).with_context(|| {
                    format!("Failed to read index configuration: {}", path.display())
                })?;
                serde_json::from_str(&content).with_context(|| {
                    format!("Index configuration is not valid JSON: {}", path.display())
                })
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            SchemaSource::BuiltIn => "built-in configuration".to_string(),
            SchemaSource::File(path) => path.display().to_string(),
        }
    }
}

/// What became of a delete request.
///
/// Deletes never fail the caller: deleting a document that was filtered out
/// or never written is expected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Removed,
    /// The index had no such document.
    Absent,
    /// The request failed; the reason has been logged.
    Failed(String),
}

/// Write side of the search index.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Create or fully replace the document for `resource_uri`.
    async fn upsert(&self, resource_uri: &str, document: &NormalizedDocument) -> Result<DocumentId>;

    /// Remove the document for `resource_uri`, logging any failure.
    async fn delete(&self, resource_uri: &str) -> DeleteOutcome;
}

/// Search engine gateway speaking the Elasticsearch document API.
pub struct ElasticIndex {
    client: reqwest::Client,
    /// Index root, always ending in `/`.
    root: String,
    schema: Arc<IndexSchema>,
}

impl ElasticIndex {
    /// Establish the index at `index_url` and derive its schema.
    ///
    /// # Errors
    ///
    /// Fatal for startup: the existing configuration cannot be read, the
    /// supplied configuration cannot be loaded, the create request is
    /// rejected, or the mapping has no resolvable property map.
    pub async fn connect(
        client: reqwest::Client,
        index_url: &str,
        source: &SchemaSource,
    ) -> Result<Self> {
        let root = if index_url.ends_with('/') {
            index_url.to_string()
        } else {
            format!("{}/", index_url)
        };

        let config = match fetch_index_config(&client, &root).await? {
            Some(existing) => {
                tracing::info!(index = %root, "Found existing index");
                existing
            }
            None => {
                tracing::info!(index = %root, source = %source.describe(), "Index does not exist, creating it");
                let config = source.load()?;
                create_index(&client, &root, &config).await?;
                config
            }
        };

        let schema = IndexSchema::from_index_config(&config)
            .with_context(|| format!("Cannot derive schema for index {}", root))?;

        tracing::info!(
            index = %root,
            fields = schema.supported_fields().len(),
            completions = schema.suggest_fields().len(),
            "Index schema loaded"
        );

        Ok(Self {
            client,
            root,
            schema: Arc::new(schema),
        })
    }

    pub fn schema(&self) -> Arc<IndexSchema> {
        Arc::clone(&self.schema)
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    fn document_url(&self, id: &DocumentId) -> String {
        format!("{}_doc/{}", self.root, id)
    }
}

#[async_trait]
impl DocumentIndex for ElasticIndex {
    async fn upsert(&self, resource_uri: &str, document: &NormalizedDocument) -> Result<DocumentId> {
        let id = document_id(resource_uri)?;
        let url = self.document_url(&id);

        let response = self
            .client
            .post(&url)
            .json(document)
            .send()
            .await
            .map_err(|source| GatewayError::Transport {
                method: "POST",
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(uri = resource_uri, id = %id, status = status.as_u16(), "Update failure");
            return Err(GatewayError::Status {
                method: "POST",
                url,
                status: status.as_u16(),
                body,
            }
            .into());
        }

        tracing::debug!(uri = resource_uri, id = %id, "Update success");
        Ok(id)
    }

    async fn delete(&self, resource_uri: &str) -> DeleteOutcome {
        let id = match document_id(resource_uri) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(uri = resource_uri, error = %e, "Delete skipped");
                return DeleteOutcome::Failed(e.to_string());
            }
        };
        let url = self.document_url(&id);

        let response = match self.client.delete(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(uri = resource_uri, id = %id, error = %e, "Delete failed");
                return DeleteOutcome::Failed(e.to_string());
            }
        };

        let status = response.status();
        if status.is_success() {
            tracing::debug!(uri = resource_uri, id = %id, "Delete success");
            DeleteOutcome::Removed
        } else if status == StatusCode::NOT_FOUND {
            tracing::debug!(uri = resource_uri, id = %id, "Delete of absent document");
            DeleteOutcome::Absent
        } else {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(uri = resource_uri, id = %id, status = status.as_u16(), body = %body, "Delete failed");
            DeleteOutcome::Failed(format!("status {}", status.as_u16()))
        }
    }
}

/// Return the current index configuration, or `None` if the index is absent.
async fn fetch_index_config(client: &reqwest::Client, root: &str) -> Result<Option<Value>> {
    let response = client
        .get(root)
        .send()
        .await
        .map_err(|source| GatewayError::Transport {
            method: "GET",
            url: root.to_string(),
            source,
        })?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::Status {
            method: "GET",
            url: root.to_string(),
            status: status.as_u16(),
            body,
        }
        .into());
    }

    let config = response
        .json()
        .await
        .with_context(|| format!("Index configuration from {} is not valid JSON", root))?;
    Ok(Some(config))
}

async fn create_index(client: &reqwest::Client, root: &str, config: &Value) -> Result<()> {
    let response = client
        .put(root)
        .json(config)
        .send()
        .await
        .map_err(|source| GatewayError::Transport {
            method: "PUT",
            url: root.to_string(),
            source,
        })?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if !status.is_success() {
        tracing::error!(index = root, status = status.as_u16(), body = %body, "Failed to create index");
        return Err(GatewayError::Status {
            method: "PUT",
            url: root.to_string(),
            status: status.as_u16(),
            body,
        }
        .into());
    }

    tracing::info!(index = root, response = %body, "Created index");
    Ok(())
}
