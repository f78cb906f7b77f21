//! Configuration for the verification engine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use k8s_manifest_mapnode::FieldMask;
use serde::{Deserialize, Serialize};

use crate::binding::{ObjectFieldBindingList, ObjectReferenceList, SignerList};
use crate::error::VerifyError;

/// Annotation holding the image reference the manifest was signed into.
pub const IMAGE_REF_ANNOTATION_KEY: &str = "cosign.sigstore.dev/imageRef";
/// Annotation holding the base64 signature.
pub const SIGNATURE_ANNOTATION_KEY: &str = "cosign.sigstore.dev/signature";
/// Annotation holding the signing certificate.
pub const CERTIFICATE_ANNOTATION_KEY: &str = "cosign.sigstore.dev/certificate";
/// Annotation holding the base64 signed message (the manifest).
pub const MESSAGE_ANNOTATION_KEY: &str = "cosign.sigstore.dev/message";
/// Annotation holding the transparency log bundle.
pub const BUNDLE_ANNOTATION_KEY: &str = "cosign.sigstore.dev/bundle";

/// Namespace used for dry-run simulation of namespaced resources.
pub const DEFAULT_DRY_RUN_NAMESPACE: &str = "default";

/// Paths every comparison masks: signature annotations, fields managed by
/// the API server, and status.
pub const COMMON_RESOURCE_MASK_KEYS: &[&str] = &[
    "metadata.annotations.\"cosign.sigstore.dev/imageRef\"",
    "metadata.annotations.\"cosign.sigstore.dev/signature\"",
    "metadata.annotations.\"cosign.sigstore.dev/certificate\"",
    "metadata.annotations.\"cosign.sigstore.dev/message\"",
    "metadata.annotations.\"cosign.sigstore.dev/bundle\"",
    "metadata.annotations.namespace",
    "metadata.annotations.\"kubectl.kubernetes.io/last-applied-configuration\"",
    "metadata.annotations.\"deprecated.daemonset.template.generation\"",
    "metadata.managedFields",
    "metadata.creationTimestamp",
    "metadata.generation",
    "metadata.namespace",
    "metadata.resourceVersion",
    "metadata.selfLink",
    "metadata.uid",
    "status",
];

/// The common baseline mask.
#[must_use]
pub fn common_resource_mask() -> FieldMask {
    FieldMask::new(COMMON_RESOURCE_MASK_KEYS)
}

/// Runtime configuration for the engine and its default collaborators.
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    /// Namespace for dry-run simulation of namespaced resources.
    pub dry_run_namespace: String,
    /// Upper bound on a single dry-run call.
    pub dry_run_timeout: Duration,
    /// `kubectl` executable used by the default dry-run client.
    pub kubectl_path: PathBuf,
    /// Kubeconfig passed to `kubectl`, if not the default.
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context passed to `kubectl`, if not the current one.
    pub context: Option<String>,
    /// Baseline mask applied to every comparison.
    pub common_mask: FieldMask,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            dry_run_namespace: DEFAULT_DRY_RUN_NAMESPACE.into(),
            dry_run_timeout: Duration::from_secs(30),
            kubectl_path: PathBuf::from("kubectl"),
            kubeconfig: None,
            context: None,
            common_mask: common_resource_mask(),
        }
    }
}

/// Per-call verification options, loadable from YAML.
///
/// ```yaml
/// imageRef: registry.example.com/manifests:v1
/// keyPath: /etc/keys/cosign.pub
/// checkDryRunForApply: true
/// skipObjects:
/// - kind: Secret
/// ignoreFields:
/// - fields:
///   - metadata.labels."app.kubernetes.io/version"
///   objects:
///   - kind: Deployment
/// signers:
/// - "*@example.com"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResourceOption {
    /// Image the manifest was signed into; falls back to the object's annotation.
    #[serde(default)]
    pub image_ref: String,
    /// Path to a public verification key.
    #[serde(default)]
    pub key_path: String,
    /// Objects excluded from scope.
    #[serde(default)]
    pub skip_objects: ObjectReferenceList,
    /// Extra fields ignored per object.
    #[serde(default)]
    pub ignore_fields: ObjectFieldBindingList,
    /// Trusted signer identities.
    #[serde(default)]
    pub signers: SignerList,
    /// Also try the dry-run apply strategy.
    #[serde(default)]
    pub check_dry_run_for_apply: bool,
}

impl VerifyResourceOption {
    /// Parse options from YAML bytes.
    pub fn from_yaml_bytes(bytes: &[u8]) -> Result<Self, VerifyError> {
        serde_yaml::from_slice(bytes).map_err(|e| VerifyError::config(format!("invalid options: {}", e)))
    }

    /// Load options from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, VerifyError> {
        let bytes = std::fs::read(path).map_err(|e| {
            VerifyError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_bytes(&bytes)
    }

    /// The key path, if one is set.
    #[must_use]
    pub fn key_path(&self) -> Option<&Path> {
        (!self.key_path.is_empty()).then(|| Path::new(&self.key_path))
    }
}
