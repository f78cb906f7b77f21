//! # k8s-manifest-verify-core
//!
//! Verifies that a live Kubernetes resource derives from a signed manifest
//! and that the signature is valid and from a trusted signer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ResourceVerifier                          │
//! │                                                              │
//! │  image ref ── skipObjects ── ignoreFields + known changes   │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌──────────────────────────────────────────────────┐      │
//! │  │              ManifestFetcher                      │      │
//! │  └──────────────────────────────────────────────────┘      │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌──────────────────────────────────────────────────┐      │
//! │  │              ManifestMatcher                      │      │
//! │  │   direct → dry-run create → dry-run apply        │      │
//! │  │          → filtered diff      (DryRunClient)      │      │
//! │  └──────────────────────────────────────────────────┘      │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌──────────────────────────────────────────────────┐      │
//! │  │              SignatureVerifier + signers          │      │
//! │  └──────────────────────────────────────────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Properties
//!
//! - **Tolerant**: fields the cluster mutates on its own are masked or ignored
//! - **Strict**: injected labels, removed fields and spec drift all mismatch
//! - **Side-effect free**: every cluster simulation is a server-side dry run

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::must_use_candidate)] // Not all functions need must_use

pub mod binding;
pub mod config;
pub mod dryrun;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod known_changes;
pub mod matcher;
pub mod resource;
pub mod signature;
pub mod types;

pub use binding::{
    ObjectFieldBinding, ObjectFieldBindingList, ObjectReference, ObjectReferenceList, SignerList,
};
pub use config::{common_resource_mask, VerifyConfig, VerifyResourceOption};
pub use dryrun::{ApplyPatch, DryRunClient, KubectlDryRun};
pub use engine::{verify_resource, ResourceVerifier};
pub use error::{Stage, VerifyError};
pub use fetch::{AnnotationManifestFetcher, FileManifestFetcher, ManifestFetcher};
pub use known_changes::known_k8s_ignore_fields;
pub use matcher::ManifestMatcher;
pub use resource::{find_single_yaml, split_documents, Resource, ResourceId};
pub use signature::{key_fingerprint, AnnotationSignatureVerifier, SignatureVerifier};
pub use types::{MatchOutcome, MatchStrategy, SignatureVerdict, VerifyResourceResult};

pub use k8s_manifest_mapnode::{DiffResult, FieldMask, Node};
