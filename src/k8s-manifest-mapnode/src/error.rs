//! Tree parsing and serialization errors.

use thiserror::Error;

/// Errors that can occur while building or serializing a tree.
#[derive(Debug, Error)]
pub enum MapnodeError {
    /// Input was not valid JSON.
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Input was not valid YAML.
    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Input parsed, but the document root is not a mapping.
    #[error("Document root must be a mapping, found {found}")]
    NotAnObject {
        /// JSON type name of the root that was found.
        found: &'static str,
    },
}

impl MapnodeError {
    /// Create a not-an-object error for the given value.
    #[must_use]
    pub fn not_an_object(value: &serde_json::Value) -> Self {
        let found = match value {
            serde_json::Value::Null => "null",
            serde_json::Value::Bool(_) => "boolean",
            serde_json::Value::Number(_) => "number",
            serde_json::Value::String(_) => "string",
            serde_json::Value::Array(_) => "array",
            serde_json::Value::Object(_) => "object",
        };
        Self::NotAnObject { found }
    }
}
