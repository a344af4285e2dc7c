//! Projection of a fetched resource representation onto the index schema.
//!
//! The repository returns compact JSON-LD, which may carry properties the
//! index has no mapping for (`@context`, new predicates, ...) and nested
//! objects the index cannot hold. Those are dropped with a warning; the
//! remaining fields are copied through and completion companions are filled
//! in where the schema asks for them.

use serde_json::{Map, Value};

use crate::completion::tokenize;
use crate::models::NormalizedDocument;
use crate::schema::{suggest_field_name, IndexSchema};

/// Build the index document for a raw representation.
///
/// Never fails: a field the schema rejects is logged and skipped without
/// affecting the rest of the document. The same input and schema always
/// produce the same output.
pub fn normalize(raw: &Map<String, Value>, schema: &IndexSchema) -> NormalizedDocument {
    let mut doc = NormalizedDocument::default();
    let mut completions = Vec::new();

    for (field, value) in raw {
        if !schema.is_supported(field) {
            tracing::warn!(field = %field, value = %value, "Unexpected property ignored");
            continue;
        }

        if value.is_object() {
            tracing::warn!(field = %field, value = %value, "Property with object value ignored");
            continue;
        }

        if schema.needs_completion(field) {
            let entries = tokenize(&string_value(value))
                .into_iter()
                .map(Value::String)
                .collect();
            completions.push((suggest_field_name(field), Value::Array(entries)));
        }

        doc.insert(field.clone(), value.clone());
    }

    // Generated completions replace any companion value carried by the resource.
    for (field, entries) in completions {
        doc.insert(field, entries);
    }

    doc
}

/// Text used to build completions: strings as-is, anything else as JSON.
fn string_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
