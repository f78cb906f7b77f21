//! Config-driven object matchers.
//!
//! Three matchers decide how a resource is treated:
//!
//! - [`ObjectReferenceList`] (`skipObjects`): resources excluded from scope
//! - [`ObjectFieldBindingList`] (`ignoreFields`): extra field paths ignored
//!   for matching resources
//! - [`SignerList`] (`signers`): trusted signer identities
//!
//! Every string in a reference may contain `*` wildcards. An empty field
//! matches anything.

use std::collections::BTreeMap;

use k8s_manifest_mapnode::glob_match;
use serde::{Deserialize, Serialize};

use crate::resource::Resource;

fn field_matches(pattern: &str, value: &str) -> bool {
    pattern.is_empty() || glob_match(pattern, value)
}

/// Selects resources by group, version, kind, namespace, name and labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API group (`apps`, empty for core).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    /// API version without group (`v1`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Kind.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Namespace.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Labels the resource must carry; values may contain wildcards.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ObjectReference {
    /// Reference matching every resource of `kind`.
    #[must_use]
    pub fn kind(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    /// Set the name pattern.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the namespace pattern.
    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Whether `resource` is selected by this reference.
    #[must_use]
    pub fn matches(&self, resource: &Resource) -> bool {
        if !(field_matches(&self.group, resource.group())
            && field_matches(&self.version, resource.version())
            && field_matches(&self.kind, resource.kind())
            && field_matches(&self.namespace, resource.namespace())
            && field_matches(&self.name, resource.name()))
        {
            return false;
        }

        if self.labels.is_empty() {
            return true;
        }
        let labels = resource.labels();
        self.labels.iter().all(|(key, pattern)| {
            labels
                .get(key)
                .is_some_and(|value| field_matches(pattern, value))
        })
    }
}

/// A list of references; matches when any entry matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectReferenceList(pub Vec<ObjectReference>);

impl ObjectReferenceList {
    /// Whether any reference selects `resource`.
    #[must_use]
    pub fn matches(&self, resource: &Resource) -> bool {
        self.0.iter().any(|r| r.matches(resource))
    }

    /// Whether the list has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<ObjectReference>> for ObjectReferenceList {
    fn from(refs: Vec<ObjectReference>) -> Self {
        Self(refs)
    }
}

/// Field patterns bound to the objects they apply to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectFieldBinding {
    /// Dotted field path patterns.
    #[serde(default)]
    pub fields: Vec<String>,
    /// Objects the fields apply to.
    #[serde(default)]
    pub objects: ObjectReferenceList,
}

/// A list of field bindings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectFieldBindingList(pub Vec<ObjectFieldBinding>);

impl ObjectFieldBindingList {
    /// Fields of every binding that selects `resource`, in order.
    ///
    /// Returns `None` when no binding selects the resource.
    #[must_use]
    pub fn matches(&self, resource: &Resource) -> Option<Vec<String>> {
        let mut matched = false;
        let mut fields = Vec::new();
        for binding in self.0.iter().filter(|b| b.objects.matches(resource)) {
            matched = true;
            fields.extend(binding.fields.iter().cloned());
        }
        matched.then_some(fields)
    }

    /// Whether the list has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<ObjectFieldBinding>> for ObjectFieldBindingList {
    fn from(bindings: Vec<ObjectFieldBinding>) -> Self {
        Self(bindings)
    }
}

/// Trusted signer identity patterns.
///
/// An empty list places no restriction on the signer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignerList(pub Vec<String>);

impl SignerList {
    /// Whether `signer` is trusted.
    #[must_use]
    pub fn matches(&self, signer: &str) -> bool {
        self.0.is_empty() || self.0.iter().any(|p| glob_match(p, signer))
    }

    /// Whether the list has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<String>> for SignerList {
    fn from(signers: Vec<String>) -> Self {
        Self(signers)
    }
}
