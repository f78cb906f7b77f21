//! Live resource objects and manifest document lookup.

use std::collections::BTreeMap;
use std::fmt;

use k8s_manifest_mapnode::{MapnodeError, Node};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::VerifyError;

/// Kind name that receives extra masking in dry-run comparisons.
pub const CRD_KIND: &str = "CustomResourceDefinition";

/// The identity used to locate a resource's manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    /// e.g. `apps/v1`.
    pub api_version: String,
    /// e.g. `Deployment`.
    pub kind: String,
    /// Object name.
    pub name: String,
    /// Namespace, empty for cluster-scoped resources.
    pub namespace: String,
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{} {}/{}", self.api_version, self.kind, self.name)
        } else {
            write!(
                f,
                "{} {}/{}/{}",
                self.api_version, self.kind, self.namespace, self.name
            )
        }
    }
}

/// A live object read from the cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    node: Node,
}

impl Resource {
    /// Wrap an object value.
    pub fn from_value(value: Value) -> Result<Self, VerifyError> {
        let node = Node::from_value(value).map_err(|e| VerifyError::parse("object", e))?;
        Ok(Self { node })
    }

    /// Parse an object from YAML (or JSON) bytes.
    pub fn from_yaml_bytes(bytes: &[u8]) -> Result<Self, VerifyError> {
        let node = Node::from_yaml_bytes(bytes).map_err(|e| VerifyError::parse("object", e))?;
        Ok(Self { node })
    }

    /// Parse an object from JSON bytes.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, VerifyError> {
        let node = Node::from_json_bytes(bytes).map_err(|e| VerifyError::parse("object", e))?;
        Ok(Self { node })
    }

    /// The object as a tree.
    #[must_use]
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// The object as a JSON value.
    #[must_use]
    pub fn value(&self) -> &Value {
        self.node.value()
    }

    fn str_at(&self, path: &[&str]) -> &str {
        path.iter()
            .try_fold(self.node.value(), |v, key| v.get(key))
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    fn string_map_at(&self, path: &[&str]) -> BTreeMap<String, String> {
        path.iter()
            .try_fold(self.node.value(), |v, key| v.get(key))
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `apiVersion`.
    #[must_use]
    pub fn api_version(&self) -> &str {
        self.str_at(&["apiVersion"])
    }

    /// API group, empty for the core group.
    #[must_use]
    pub fn group(&self) -> &str {
        self.api_version()
            .rsplit_once('/')
            .map_or("", |(group, _)| group)
    }

    /// API version without the group.
    #[must_use]
    pub fn version(&self) -> &str {
        let api_version = self.api_version();
        api_version
            .rsplit_once('/')
            .map_or(api_version, |(_, version)| version)
    }

    /// `kind`.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.str_at(&["kind"])
    }

    /// `metadata.name`.
    #[must_use]
    pub fn name(&self) -> &str {
        self.str_at(&["metadata", "name"])
    }

    /// `metadata.generateName`.
    #[must_use]
    pub fn generate_name(&self) -> &str {
        self.str_at(&["metadata", "generateName"])
    }

    /// `metadata.namespace`, empty for cluster-scoped resources.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.str_at(&["metadata", "namespace"])
    }

    /// `metadata.labels`.
    #[must_use]
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.string_map_at(&["metadata", "labels"])
    }

    /// `metadata.annotations`.
    #[must_use]
    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.string_map_at(&["metadata", "annotations"])
    }

    /// A single annotation value.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.node
            .value()
            .get("metadata")
            .and_then(|m| m.get("annotations"))
            .and_then(|a| a.get(key))
            .and_then(Value::as_str)
    }

    /// Whether the object has no namespace.
    #[must_use]
    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace().is_empty()
    }

    /// Whether the object is a `CustomResourceDefinition`.
    #[must_use]
    pub fn is_crd(&self) -> bool {
        self.kind() == CRD_KIND
    }

    /// Identity used for manifest lookup.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        ResourceId {
            api_version: self.api_version().to_string(),
            kind: self.kind().to_string(),
            name: self.name().to_string(),
            namespace: self.namespace().to_string(),
        }
    }

    /// Serialize as JSON.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, VerifyError> {
        self.node
            .to_json()
            .map(String::into_bytes)
            .map_err(|e| VerifyError::parse("object", e))
    }

    /// Serialize as YAML.
    pub fn to_yaml_bytes(&self) -> Result<Vec<u8>, VerifyError> {
        self.node
            .to_yaml()
            .map(String::into_bytes)
            .map_err(|e| VerifyError::parse("object", e))
    }
}

/// Whether a manifest document describes the resource `id`.
///
/// A document without a name matches when its `generateName` is a prefix of
/// the object name. A document without a namespace matches any namespace.
fn document_matches(doc: &Value, id: &ResourceId) -> bool {
    fn field<'a>(doc: &'a Value, path: &[&str]) -> &'a str {
        path.iter()
            .try_fold(doc, |v, key| v.get(key))
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    if field(doc, &["apiVersion"]) != id.api_version || field(doc, &["kind"]) != id.kind {
        return false;
    }

    let name = field(doc, &["metadata", "name"]);
    let name_matches = if name.is_empty() {
        let generate_name = field(doc, &["metadata", "generateName"]);
        !generate_name.is_empty() && id.name.starts_with(generate_name)
    } else {
        name == id.name
    };
    if !name_matches {
        return false;
    }

    let namespace = field(doc, &["metadata", "namespace"]);
    namespace.is_empty() || namespace == id.namespace
}

/// Split multi-document YAML into object documents, expanding `List` kinds.
pub fn split_documents(manifest: &[u8]) -> Result<Vec<Value>, VerifyError> {
    let mut docs = Vec::new();
    for document in serde_yaml::Deserializer::from_slice(manifest) {
        let value = Value::deserialize(document)
            .map_err(|e| VerifyError::parse("manifest", MapnodeError::Yaml(e)))?;
        match value {
            Value::Null => {},
            Value::Object(ref map)
                if map
                    .get("kind")
                    .and_then(Value::as_str)
                    .is_some_and(|k| k.ends_with("List"))
                    && map.get("items").is_some_and(Value::is_array) =>
            {
                if let Some(Value::Array(items)) = map.get("items") {
                    docs.extend(items.iter().filter(|i| i.is_object()).cloned());
                }
            },
            Value::Object(_) => docs.push(value),
            other => {
                return Err(VerifyError::parse(
                    "manifest",
                    MapnodeError::not_an_object(&other),
                ))
            },
        }
    }
    Ok(docs)
}

/// Find the single manifest document describing `id`.
///
/// Returns the document as YAML bytes, or `None` when no document matches.
/// When several documents match, the first one wins and a warning is logged.
pub fn find_single_yaml(manifest: &[u8], id: &ResourceId) -> Result<Option<Vec<u8>>, VerifyError> {
    let docs = split_documents(manifest)?;
    let mut matching = docs.iter().filter(|doc| document_matches(doc, id));

    let Some(found) = matching.next() else {
        debug!(resource = %id, documents = docs.len(), "no manifest document matched");
        return Ok(None);
    };

    let extra = matching.count();
    if extra > 0 {
        warn!(
            resource = %id,
            additional = extra,
            "multiple manifest documents match this resource; using the first"
        );
    }

    let yaml = serde_yaml::to_string(found)
        .map_err(|e| VerifyError::parse("manifest", MapnodeError::Yaml(e)))?;
    Ok(Some(yaml.into_bytes()))
}
