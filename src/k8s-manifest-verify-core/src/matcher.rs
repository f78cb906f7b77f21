//! Resource-to-manifest matching.
//!
//! A live object never equals its manifest byte for byte: the cluster fills
//! in defaults, generates names and injects metadata. [`ManifestMatcher`]
//! therefore tries a cascade of comparisons, each more permissive than the
//! last, and stops at the first that finds no difference:
//!
//! 1. **Direct**: the object against the manifest as written.
//! 2. **Dry-run create**: the object against what the server would store if
//!    the manifest were created now.
//! 3. **Dry-run apply** (opt-in): the object against a dry-run create of the
//!    manifest after applying it over the live object.
//! 4. **Filtered diff**: the last diff with ignored fields removed.
//!
//! Every comparison masks the common baseline fields first. The live object
//! already exists, so dry runs submit a renamed copy (`<name>-dryrun`, and for
//! custom resource definitions renamed `spec.names`). Dry-run comparisons
//! mask those renamed fields.

use std::sync::Arc;

use k8s_manifest_mapnode::{DiffResult, FieldMask, Node};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use crate::config::VerifyConfig;
use crate::dryrun::DryRunClient;
use crate::error::{Stage, VerifyError};
use crate::resource::{find_single_yaml, Resource, CRD_KIND};
use crate::types::{MatchOutcome, MatchStrategy};

/// Appended to names submitted for a dry run.
const DRY_RUN_SUFFIX: &str = "-dryrun";

/// Appended to CRD kinds submitted for a dry run.
const DRY_RUN_KIND_SUFFIX: &str = "DryRun";

/// Removed before a dry-run create. Apply results carry server-populated
/// metadata that the server refuses on create.
const SERVER_METADATA_KEYS: &[&str] = &[
    "metadata.namespace",
    "metadata.uid",
    "metadata.resourceVersion",
    "metadata.creationTimestamp",
    "metadata.deletionTimestamp",
    "metadata.deletionGracePeriodSeconds",
    "metadata.generation",
    "metadata.managedFields",
    "metadata.selfLink",
];

/// Masked in dry-run comparisons; the simulated object is renamed.
const SIMULATION_MASK_KEYS: &[&str] = &["metadata.name"];

/// Masked in dry-run comparisons of custom resource definitions.
const CRD_SIMULATION_MASK_KEYS: &[&str] = &[
    "spec.names.kind",
    "spec.names.listKind",
    "spec.names.singular",
    "spec.names.plural",
];

/// One comparison of the cascade.
#[derive(Debug, Clone, Copy)]
enum Comparison {
    Direct,
    DryRunCreate,
    DryRunApply,
}

impl Comparison {
    fn strategy(self) -> MatchStrategy {
        match self {
            Self::Direct => MatchStrategy::Direct,
            Self::DryRunCreate => MatchStrategy::DryRunCreate,
            Self::DryRunApply => MatchStrategy::DryRunApply,
        }
    }

    fn stage(self) -> Stage {
        match self {
            Self::Direct => Stage::DirectMatch,
            Self::DryRunCreate => Stage::DryRunCreateMatch,
            Self::DryRunApply => Stage::DryRunApplyMatch,
        }
    }
}

/// Append `suffix` to the string at `key`, if there is a non-empty one.
fn append_suffix(map: &mut Map<String, Value>, key: &str, suffix: &str) {
    if let Some(Value::String(value)) = map.get_mut(key) {
        if !value.is_empty() {
            value.push_str(suffix);
        }
    }
}

/// Rename the generated names of a custom resource definition, keeping
/// `metadata.name` equal to `<plural>.<group>`.
fn rename_crd(value: &mut Value) {
    let plural = match value.pointer_mut("/spec/names").and_then(Value::as_object_mut) {
        Some(names) => {
            append_suffix(names, "plural", DRY_RUN_SUFFIX);
            append_suffix(names, "singular", DRY_RUN_SUFFIX);
            append_suffix(names, "kind", DRY_RUN_KIND_SUFFIX);
            append_suffix(names, "listKind", DRY_RUN_KIND_SUFFIX);
            names.get("plural").and_then(Value::as_str).unwrap_or_default().to_string()
        },
        None => return,
    };
    let group = value
        .pointer("/spec/group")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if plural.is_empty() || group.is_empty() {
        return;
    }
    if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.insert("name".to_string(), Value::String(format!("{}.{}", plural, group)));
    }
}

/// The YAML submitted for a dry-run create of `manifest`: server-populated
/// metadata removed and the object renamed so it cannot collide with the
/// live one. A `generateName` is kept; the server picks a fresh name for it.
fn simulation_input(manifest: &Node) -> Result<String, VerifyError> {
    let mut value = manifest.mask(&FieldMask::new(SERVER_METADATA_KEYS)).into_value();
    if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        append_suffix(metadata, "name", DRY_RUN_SUFFIX);
    }
    if value.get("kind").and_then(Value::as_str) == Some(CRD_KIND) {
        rename_crd(&mut value);
    }
    Node::from_value(value)
        .and_then(|node| node.to_yaml())
        .map_err(|e| VerifyError::parse("dry-run input", e))
}

/// Runs the matching cascade for one resource at a time.
#[derive(Clone)]
pub struct ManifestMatcher {
    dry_run: Arc<dyn DryRunClient>,
    common_mask: FieldMask,
    dry_run_namespace: String,
}

impl ManifestMatcher {
    /// Create a matcher with the default configuration.
    pub fn new(dry_run: Arc<dyn DryRunClient>) -> Self {
        Self::with_config(dry_run, &VerifyConfig::default())
    }

    /// Create a matcher using the mask and namespace from `config`.
    pub fn with_config(dry_run: Arc<dyn DryRunClient>, config: &VerifyConfig) -> Self {
        Self {
            dry_run,
            common_mask: config.common_mask.clone(),
            dry_run_namespace: config.dry_run_namespace.clone(),
        }
    }

    /// Baseline mask applied to every comparison.
    #[must_use]
    pub fn common_mask(&self) -> &FieldMask {
        &self.common_mask
    }

    /// Mask used by the dry-run strategies.
    #[must_use]
    pub fn simulation_mask(&self, crd: bool) -> FieldMask {
        let mut mask = self.common_mask.clone();
        mask.extend(SIMULATION_MASK_KEYS);
        if crd {
            mask.extend(CRD_SIMULATION_MASK_KEYS);
        }
        mask
    }

    /// Namespace dry runs are performed in: empty for cluster-scoped
    /// resources, the configured namespace otherwise.
    #[must_use]
    pub fn simulation_namespace(&self, resource: &Resource) -> &str {
        if resource.is_cluster_scoped() {
            ""
        } else {
            &self.dry_run_namespace
        }
    }

    /// Decide whether `resource` derives from the matching document in
    /// `manifest`.
    ///
    /// Paths covered by `ignore_fields` are only consulted once every
    /// strategy has failed. A mismatch is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::ManifestNotFound`] when no document in
    /// `manifest` corresponds to the resource, and stage-wrapped parse or
    /// dry-run errors from the strategy that failed.
    #[instrument(skip_all, fields(resource = %resource.id(), allow_apply = allow_apply))]
    pub async fn match_manifest(
        &self,
        resource: &Resource,
        manifest: &[u8],
        ignore_fields: &FieldMask,
        allow_apply: bool,
    ) -> Result<MatchOutcome, VerifyError> {
        let id = resource.id();
        let document = find_single_yaml(manifest, &id)?.ok_or_else(|| {
            VerifyError::not_found(format!("no manifest document corresponds to {}", id))
        })?;
        let candidate =
            Node::from_yaml_bytes(&document).map_err(|e| VerifyError::parse("manifest", e))?;

        let mut comparisons = vec![Comparison::Direct, Comparison::DryRunCreate];
        if allow_apply {
            comparisons.push(Comparison::DryRunApply);
        }

        let mut last_diff = DiffResult::Empty;
        for comparison in comparisons {
            let strategy = comparison.strategy();
            let diff = self
                .compare(comparison, resource, &candidate, &document)
                .await
                .map_err(|e| e.in_stage(comparison.stage()))?;
            if diff.is_empty() {
                info!(%strategy, "Resource matches manifest");
                return Ok(MatchOutcome::matched(strategy));
            }
            debug!(%strategy, differences = diff.size(), "Strategy found differences");
            last_diff = diff;
        }

        let (removed, filtered) = last_diff.filter(ignore_fields);
        if filtered.is_empty() {
            info!(removed, "Resource matches manifest after ignoring fields");
            return Ok(MatchOutcome::matched(MatchStrategy::FilteredDiff));
        }

        info!(
            removed,
            differences = filtered.size(),
            "Resource does not match manifest"
        );
        Ok(MatchOutcome::mismatched(filtered))
    }

    async fn compare(
        &self,
        comparison: Comparison,
        resource: &Resource,
        candidate: &Node,
        document: &[u8],
    ) -> Result<DiffResult, VerifyError> {
        match comparison {
            Comparison::Direct => {
                let object = resource.node().mask(&self.common_mask);
                Ok(object.diff(&candidate.mask(&self.common_mask)))
            },
            Comparison::DryRunCreate => self.compare_simulated(resource, candidate).await,
            Comparison::DryRunApply => {
                let patch = self
                    .dry_run
                    .apply_patch_bytes(document, resource.namespace())
                    .await?;
                let patched = Node::from_yaml_bytes(&patch.patched)
                    .map_err(|e| VerifyError::parse("apply-patched object", e))?;
                self.compare_simulated(resource, &patched).await
            },
        }
    }

    async fn compare_simulated(&self, resource: &Resource, manifest: &Node) -> Result<DiffResult, VerifyError> {
        let input = simulation_input(manifest)?;
        let namespace = self.simulation_namespace(resource);

        let simulated = self
            .dry_run
            .dry_run_create(input.as_bytes(), namespace)
            .await?;
        let simulated =
            Node::from_yaml_bytes(&simulated).map_err(|e| VerifyError::parse("dry-run result", e))?;

        let mask = self.simulation_mask(resource.is_crd());
        Ok(resource.node().mask(&mask).diff(&simulated.mask(&mask)))
    }
}

impl std::fmt::Debug for ManifestMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestMatcher")
            .field("common_mask", &self.common_mask.patterns())
            .field("dry_run_namespace", &self.dry_run_namespace)
            .finish_non_exhaustive()
    }
}
