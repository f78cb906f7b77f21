//! Resource trees built from JSON or YAML bytes.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::diff::{DiffResult, DiffValues, Difference};
use crate::error::MapnodeError;
use crate::path::{join_path, split_path, FieldMask};

/// A JSON object tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    value: Value,
}

impl Node {
    /// Wrap a value. The root must be an object.
    pub fn from_value(value: Value) -> Result<Self, MapnodeError> {
        if value.is_object() {
            Ok(Self { value })
        } else {
            Err(MapnodeError::not_an_object(&value))
        }
    }

    /// Parse JSON bytes.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, MapnodeError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Parse YAML bytes (a single document). JSON input is accepted too.
    pub fn from_yaml_bytes(bytes: &[u8]) -> Result<Self, MapnodeError> {
        let value: Value = serde_yaml::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// The underlying value.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consume the node, returning the underlying value.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Look up the value at a dotted path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        split_path(path)
            .iter()
            .try_fold(&self.value, |current, key| match current {
                Value::Object(map) => map.get(key),
                Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }

    /// String at a dotted path, or `""` when absent or not a string.
    #[must_use]
    pub fn get_string(&self, path: &str) -> String {
        self.get(path)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    /// A copy of this tree with every path matched by `mask` removed.
    ///
    /// Containers left empty only because their contents were masked are
    /// removed as well, so masking an object's only annotation does not
    /// leave an `annotations: {}` behind.
    #[must_use]
    pub fn mask(&self, mask: &FieldMask) -> Self {
        let mut value = self.value.clone();
        if !mask.is_empty() {
            let mut path = Vec::new();
            prune(&mut value, &mut path, mask);
        }
        Self { value }
    }

    /// Leaf values keyed by dotted path. Empty objects and arrays are leaves.
    #[must_use]
    pub fn flatten(&self) -> BTreeMap<String, Value> {
        let mut leaves = BTreeMap::new();
        let mut path = Vec::new();
        collect_leaves(&self.value, &mut path, &mut leaves);
        leaves
    }

    /// Structural diff against `other`.
    ///
    /// `before` holds this tree's value and `after` holds `other`'s.
    #[must_use]
    pub fn diff(&self, other: &Self) -> DiffResult {
        let mut left = self.flatten();
        let right = other.flatten();
        let mut items = Vec::new();

        for (key, after) in right {
            match left.remove(&key) {
                Some(before) if before == after => {},
                before => items.push(Difference {
                    key,
                    values: DiffValues {
                        before,
                        after: Some(after),
                    },
                }),
            }
        }
        for (key, before) in left {
            items.push(Difference {
                key,
                values: DiffValues {
                    before: Some(before),
                    after: None,
                },
            });
        }

        items.sort_by(|a, b| a.key.cmp(&b.key));
        DiffResult::from_items(items)
    }

    /// Serialize as YAML.
    pub fn to_yaml(&self) -> Result<String, MapnodeError> {
        Ok(serde_yaml::to_string(&self.value)?)
    }

    /// Serialize as compact JSON.
    pub fn to_json(&self) -> Result<String, MapnodeError> {
        Ok(serde_json::to_string(&self.value)?)
    }
}

/// Remove masked children of `value`. Returns true when `value` itself was
/// emptied by masking and should be dropped by its parent.
fn prune(value: &mut Value, path: &mut Vec<String>, mask: &FieldMask) -> bool {
    match value {
        Value::Object(map) => {
            let mut removed = false;
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                path.push(key.clone());
                let drop_child = mask.matches(path.as_slice())
                    || map
                        .get_mut(&key)
                        .is_some_and(|child| prune(child, path, mask));
                path.pop();
                if drop_child {
                    map.remove(&key);
                    removed = true;
                }
            }
            removed && map.is_empty()
        },
        Value::Array(items) => {
            let mut removed = false;
            for index in (0..items.len()).rev() {
                path.push(index.to_string());
                let drop_item =
                    mask.matches(path.as_slice()) || prune(&mut items[index], path, mask);
                path.pop();
                if drop_item {
                    items.remove(index);
                    removed = true;
                }
            }
            removed && items.is_empty()
        },
        _ => false,
    }
}

fn collect_leaves(value: &Value, path: &mut Vec<String>, leaves: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                path.push(key.clone());
                collect_leaves(child, path, leaves);
                path.pop();
            }
        },
        Value::Array(items) if !items.is_empty() => {
            for (index, child) in items.iter().enumerate() {
                path.push(index.to_string());
                collect_leaves(child, path, leaves);
                path.pop();
            }
        },
        // The root itself is never a leaf, even when empty.
        _ if path.is_empty() => {},
        _ => {
            leaves.insert(join_path(path), value.clone());
        },
    }
}

impl Default for Node {
    fn default() -> Self {
        Self {
            value: Value::Object(Map::new()),
        }
    }
}
