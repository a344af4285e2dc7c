//! Event routing: admission filter and dispatch to the index pipeline.
//!
//! ```text
//! ChangeEvent ──▶ admits? ──no──▶ Ignored
//!                   │yes
//!        ┌──────────┴─────────────┐
//!   Created/Modified           Deleted
//!        │                        │
//!   fetch ─▶ Tombstoned       delete ─▶ Deleted
//!        │
//!   normalize ─▶ upsert ─▶ Indexed
//! ```

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;

use crate::index::{DeleteOutcome, DocumentIndex};
use crate::models::{Action, ChangeEvent, DocumentId};
use crate::normalize::normalize;
use crate::repository::{Fetched, ResourceFetcher};
use crate::schema::IndexSchema;

/// How an event was handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// None of the resource types passed the admission filter.
    Ignored,
    /// The document was written under `id`.
    Indexed { id: DocumentId },
    /// The resource is gone; nothing was written.
    Tombstoned,
    /// A delete was issued; failures are reported, not raised.
    Deleted { removal: DeleteOutcome },
}

/// Routes admitted events through fetch → normalize → write.
pub struct EventRouter<F, I> {
    allowed_type_prefix: String,
    schema: Arc<IndexSchema>,
    fetcher: F,
    index: I,
}

impl<F, I> EventRouter<F, I>
where
    F: ResourceFetcher,
    I: DocumentIndex,
{
    pub fn new(
        allowed_type_prefix: impl Into<String>,
        schema: Arc<IndexSchema>,
        fetcher: F,
        index: I,
    ) -> Self {
        Self {
            allowed_type_prefix: allowed_type_prefix.into(),
            schema,
            fetcher,
            index,
        }
    }

    /// Whether any of the event's resource types has the allowed prefix.
    pub fn admits(&self, event: &ChangeEvent) -> bool {
        event
            .resource_types()
            .iter()
            .any(|t| t.starts_with(&self.allowed_type_prefix))
    }

    pub fn schema(&self) -> Arc<IndexSchema> {
        Arc::clone(&self.schema)
    }

    /// Handle one event to completion.
    ///
    /// # Errors
    ///
    /// Fetch failures other than a tombstone and upsert failures. The index
    /// keeps its previous state for the resource.
    pub async fn route(&self, event: &ChangeEvent) -> Result<Outcome> {
        if !self.admits(event) {
            tracing::debug!(uri = event.resource_uri(), "Ignoring event without an allowed resource type");
            return Ok(Outcome::Ignored);
        }

        let uri = event.resource_uri();
        tracing::debug!(uri, action = %event.action(), "Handling event");

        match event.action() {
            Action::Created | Action::Modified => {
                let raw = match self
                    .fetcher
                    .fetch(uri)
                    .await
                    .with_context(|| format!("Failed to retrieve resource {}", uri))?
                {
                    Fetched::Representation(raw) => raw,
                    Fetched::Tombstoned => {
                        // A delete notification for this resource is expected.
                        tracing::debug!(uri, "Resource was deleted, skipping update");
                        return Ok(Outcome::Tombstoned);
                    }
                };

                let doc = normalize(&raw, &self.schema);
                let id = self
                    .index
                    .upsert(uri, &doc)
                    .await
                    .with_context(|| format!("Failed to index resource {}", uri))?;
                Ok(Outcome::Indexed { id })
            }
            Action::Deleted => {
                let removal = self.index.delete(uri).await;
                Ok(Outcome::Deleted { removal })
            }
        }
    }
}
