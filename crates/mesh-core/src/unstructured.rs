//! Duck-typed objects for kinds the core does not fully understand.
//!
//! Custom resources and status objects are treated as opaque maps with the
//! recognized top-level fields {apiVersion, kind, metadata, spec, status};
//! unknown top-level fields are rejected at construction.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const KNOWN_FIELDS: &[&str] = &["apiVersion", "kind", "metadata", "spec", "status"];

/// An opaque object restricted to the recognized top-level fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Unstructured {
    fields: Map<String, Value>,
}

impl Unstructured {
    /// Build from a JSON object, rejecting unknown top-level fields.
    pub fn from_map(fields: Map<String, Value>) -> Result<Self, String> {
        for key in fields.keys() {
            if !KNOWN_FIELDS.contains(&key.as_str()) {
                return Err(format!("unknown top-level field {key:?}"));
            }
        }
        Ok(Self { fields })
    }

    /// Parse from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Object(map) => Self::from_map(map),
            other => Err(format!("expected object, got {other}")),
        }
    }

    /// The object's `kind` field, when present and a string.
    pub fn kind(&self) -> Option<&str> {
        self.fields.get("kind").and_then(Value::as_str)
    }

    /// `metadata.name`, when present.
    pub fn name(&self) -> Option<&str> {
        self.metadata_field("name")
    }

    /// `metadata.namespace`, when present.
    pub fn namespace(&self) -> Option<&str> {
        self.metadata_field("namespace")
    }

    /// `metadata.resourceVersion`, when present.
    pub fn resource_version(&self) -> Option<&str> {
        self.metadata_field("resourceVersion")
    }

    fn metadata_field(&self, field: &str) -> Option<&str> {
        self.fields
            .get("metadata")
            .and_then(Value::as_object)
            .and_then(|m| m.get(field))
            .and_then(Value::as_str)
    }

    /// The `status` field.
    pub fn status(&self) -> Option<&Value> {
        self.fields.get("status")
    }

    /// Replace the `status` field.
    pub fn set_status(&mut self, status: Value) {
        self.fields.insert("status".to_string(), status);
    }

    /// Borrow the underlying map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }
}

impl TryFrom<Map<String, Value>> for Unstructured {
    type Error = String;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        Self::from_map(map)
    }
}

impl From<Unstructured> for Map<String, Value> {
    fn from(u: Unstructured) -> Self {
        u.fields
    }
}
