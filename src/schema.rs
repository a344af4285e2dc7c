//! Index schema derived from the search engine's mapping.
//!
//! The [`IndexSchema`] answers two questions for the normalizer: may a
//! field be indexed at all, and does it have a `<field>_suggest` companion
//! of completion type that needs to be filled in.
//!
//! # Accepted configuration shapes
//!
//! The index configuration may be the body used to create the index or the
//! body the search engine returns for `GET <index>`, which nests everything
//! under the index name:
//!
//! ```json
//! { "mappings": { "properties": { "name": {}, "name_suggest": {} } } }
//! { "resources": { "mappings": { "properties": { ... } } } }
//! { "mappings": { "_doc": { "properties": { ... } } } }
//! ```
//!
//! The last form is the legacy single-type mapping.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::error::GatewayError;

/// Suffix naming the completion companion of a field.
pub const SUGGEST_SUFFIX: &str = "_suggest";

/// Index configuration used when the index is absent and none is supplied.
const BUILTIN_INDEX_CONFIG: &str = include_str!("../schema/index.json");

/// Parse the built-in index configuration.
pub fn builtin_index_config() -> Result<Value> {
    serde_json::from_str(BUILTIN_INDEX_CONFIG).context("Built-in index configuration is not valid JSON")
}

/// Fields accepted by the index and the subset needing completion data.
///
/// Built once at startup and shared read-only for the lifetime of the
/// service. A mapping change requires a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSchema {
    supported_fields: BTreeSet<String>,
    suggest_fields: BTreeSet<String>,
}

impl IndexSchema {
    /// Build a schema from the set of mapped field names.
    pub fn new<I, S>(supported_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let supported_fields: BTreeSet<String> =
            supported_fields.into_iter().map(Into::into).collect();

        let suggest_fields = supported_fields
            .iter()
            .filter_map(|f| f.strip_suffix(SUGGEST_SUFFIX))
            .filter(|base| !base.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            supported_fields,
            suggest_fields,
        }
    }

    /// Derive the schema from an index configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::MalformedConfig`] when no property map can be
    /// located in the document.
    pub fn from_index_config(config: &Value) -> Result<Self, GatewayError> {
        let mappings = locate_mappings(config)?;
        let properties = locate_properties(mappings)?;
        Ok(Self::new(properties.keys().cloned()))
    }

    pub fn is_supported(&self, field: &str) -> bool {
        self.supported_fields.contains(field)
    }

    /// Whether `field` has a `<field>_suggest` companion in the mapping.
    pub fn needs_completion(&self, field: &str) -> bool {
        self.suggest_fields.contains(field)
    }

    pub fn supported_fields(&self) -> &BTreeSet<String> {
        &self.supported_fields
    }

    pub fn suggest_fields(&self) -> &BTreeSet<String> {
        &self.suggest_fields
    }
}

/// Name of the completion companion of `field`.
pub fn suggest_field_name(field: &str) -> String {
    format!("{}{}", field, SUGGEST_SUFFIX)
}

/// Find the `mappings` object, unwrapping a single index-name key if needed.
fn locate_mappings(config: &Value) -> Result<&Map<String, Value>, GatewayError> {
    let root = config.as_object().ok_or_else(|| {
        GatewayError::MalformedConfig("index configuration is not a JSON object".to_string())
    })?;

    let root = if root.contains_key("mappings") {
        root
    } else if root.len() == 1 {
        root.values()
            .next()
            .and_then(Value::as_object)
            .ok_or_else(|| {
                GatewayError::MalformedConfig(
                    "single top-level key does not hold an object".to_string(),
                )
            })?
    } else {
        return Err(GatewayError::MalformedConfig(
            "no `mappings` key at top level or under a single index key".to_string(),
        ));
    };

    root.get("mappings")
        .and_then(Value::as_object)
        .ok_or_else(|| GatewayError::MalformedConfig("`mappings` is missing or not an object".to_string()))
}

fn locate_properties(mappings: &Map<String, Value>) -> Result<Map<String, Value>, GatewayError> {
    // An index created without any mapping reports `"mappings": {}`.
    if mappings.is_empty() {
        return Ok(Map::new());
    }

    if let Some(properties) = mappings.get("properties") {
        return properties.as_object().cloned().ok_or_else(|| {
            GatewayError::MalformedConfig("`mappings.properties` is not an object".to_string())
        });
    }

    // Legacy typed mapping, e.g. `mappings._doc.properties`.
    if mappings.len() == 1 {
        if let Some(properties) = mappings
            .values()
            .next()
            .and_then(|t| t.get("properties"))
            .and_then(Value::as_object)
        {
            return Ok(properties.clone());
        }
    }

    Err(GatewayError::MalformedConfig(
        "no property definitions under `mappings`".to_string(),
    ))
}
