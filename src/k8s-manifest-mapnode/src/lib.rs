//! # k8s-manifest-mapnode
//!
//! Tree primitives used to compare Kubernetes resources with their manifests.
//!
//! A [`Node`] wraps a JSON object tree parsed from JSON or YAML bytes. Trees
//! can be masked with a [`FieldMask`] (an ordered list of dotted path
//! patterns) and compared structurally, producing a [`DiffResult`].
//!
//! ## Path Patterns
//!
//! Patterns are dotted paths. Keys containing dots are written as quoted
//! segments, and unquoted segments may contain `*` wildcards:
//!
//! ```text
//! metadata.annotations."cosign.sigstore.dev/signature"
//! spec.template.spec.containers.*.imagePullPolicy
//! status
//! ```
//!
//! A pattern masks the node at its exact path together with everything
//! below it. Array elements are addressed by their index.
//!
//! ## Diff Emptiness
//!
//! [`DiffResult`] is either `Empty` or `NonEmpty`; a diff with no entries is
//! always normalized to `Empty` when it is constructed.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod diff;
mod error;
mod node;
mod path;

pub use diff::{DiffReport, DiffResult, DiffValues, Difference};
pub use error::MapnodeError;
pub use node::Node;
pub use path::{glob_match, join_path, split_path, FieldMask, FieldPath};
