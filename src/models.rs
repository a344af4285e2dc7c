//! Core data models shared by the synchronization pipeline.
//!
//! These types describe what flows from the event source to the index:
//! the decoded [`ChangeEvent`], the [`NormalizedDocument`] written to the
//! search engine and the [`DocumentId`] it is stored under.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

/// What happened to a repository resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Created,
    Modified,
    Deleted,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Created => "created",
            Action::Modified => "modified",
            Action::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// A decoded change notification for one repository resource.
///
/// Built once per inbound message and consumed once by the
/// [`EventRouter`](crate::router::EventRouter). The type set is unordered;
/// only membership matters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    action: Action,
    resource_uri: String,
    resource_types: BTreeSet<String>,
}

impl ChangeEvent {
    pub fn new<I, S>(action: Action, resource_uri: impl Into<String>, resource_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            action,
            resource_uri: resource_uri.into(),
            resource_types: resource_types.into_iter().map(Into::into).collect(),
        }
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn resource_uri(&self) -> &str {
        &self.resource_uri
    }

    pub fn resource_types(&self) -> &BTreeSet<String> {
        &self.resource_types
    }
}

/// Identifier of a search document, derived from a resource URI's path.
///
/// See [`document_id`](crate::index::document_id) for the encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub(crate) fn new(encoded: String) -> Self {
        Self(encoded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An index-legal projection of a resource representation.
///
/// Holds only top-level fields the index schema accepts, each mapped to a
/// scalar or an array, plus any injected `<field>_suggest` completion arrays.
/// Serializes as a flat JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct NormalizedDocument(Map<String, Value>);

impl NormalizedDocument {
    pub(crate) fn insert(&mut self, field: String, value: Value) {
        self.0.insert(field, value);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn contains_field(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }
}
