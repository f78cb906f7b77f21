//! Resource verification engine.
//!
//! This module implements the complete verification flow:
//! 1. Image reference resolution (option, then annotation)
//! 2. Scope check against `skipObjects`
//! 3. Manifest fetch
//! 4. Manifest matching (see [`crate::matcher`])
//! 5. Signature verification and signer trust
//!
//! The steps run sequentially for one resource. Engines hold no mutable
//! state, so a single engine can verify many resources concurrently.

use std::sync::Arc;

use k8s_manifest_mapnode::FieldMask;
use tracing::{debug, info, instrument, warn};

use crate::config::{VerifyConfig, VerifyResourceOption, IMAGE_REF_ANNOTATION_KEY};
use crate::dryrun::{DryRunClient, KubectlDryRun};
use crate::error::{Stage, VerifyError};
use crate::fetch::{AnnotationManifestFetcher, ManifestFetcher};
use crate::known_changes::known_k8s_ignore_fields;
use crate::matcher::ManifestMatcher;
use crate::resource::Resource;
use crate::signature::{AnnotationSignatureVerifier, SignatureVerifier};
use crate::types::VerifyResourceResult;

/// Verifies live resources against their signed manifests.
///
/// This is the primary entry point for verification.
#[derive(Clone)]
pub struct ResourceVerifier {
    /// Configuration.
    config: VerifyConfig,
    /// Source of candidate manifests.
    fetcher: Arc<dyn ManifestFetcher>,
    /// Signature backend.
    signature_verifier: Arc<dyn SignatureVerifier>,
    /// Matching cascade.
    matcher: ManifestMatcher,
}

impl ResourceVerifier {
    /// Create an engine from explicit collaborators.
    pub fn new(
        config: VerifyConfig,
        fetcher: Arc<dyn ManifestFetcher>,
        signature_verifier: Arc<dyn SignatureVerifier>,
        dry_run: Arc<dyn DryRunClient>,
    ) -> Self {
        let matcher = ManifestMatcher::with_config(dry_run, &config);
        Self {
            config,
            fetcher,
            signature_verifier,
            matcher,
        }
    }

    /// Create an engine with the annotation-based fetcher and verifier and
    /// the `kubectl` dry-run client.
    pub fn with_defaults(config: VerifyConfig) -> Self {
        let dry_run = Arc::new(KubectlDryRun::new(&config));
        Self::new(
            config,
            Arc::new(AnnotationManifestFetcher),
            Arc::new(AnnotationSignatureVerifier),
            dry_run,
        )
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &VerifyConfig {
        &self.config
    }

    /// The matcher used by this engine.
    #[must_use]
    pub fn matcher(&self) -> &ManifestMatcher {
        &self.matcher
    }

    /// Fields ignored for `resource`: configured bindings first, then the
    /// bundled known-changes table.
    #[must_use]
    pub fn ignore_fields_for(&self, resource: &Resource, option: &VerifyResourceOption) -> FieldMask {
        let mut mask = FieldMask::default();
        if let Some(fields) = option.ignore_fields.matches(resource) {
            mask.extend(fields);
        }
        if let Some(fields) = known_k8s_ignore_fields().matches(resource) {
            mask.extend(fields);
        }
        mask
    }

    /// Verify one resource.
    ///
    /// Resources excluded by `skipObjects` still go through every step, so
    /// their result carries the signer and diff; only `in_scope` differs.
    ///
    /// # Errors
    ///
    /// Returns an error labelled with the failing stage when the manifest
    /// cannot be fetched or located, when a tree cannot be parsed, or when
    /// the dry-run or signature backend fails. A mismatch or a bad signature
    /// is reported in the result, not as an error.
    #[instrument(skip_all, fields(resource = %resource.id()))]
    pub async fn verify_resource(
        &self,
        resource: &Resource,
        option: &VerifyResourceOption,
    ) -> Result<VerifyResourceResult, VerifyError> {
        let image_ref = if option.image_ref.is_empty() {
            resource
                .annotation(IMAGE_REF_ANNOTATION_KEY)
                .unwrap_or_default()
                .to_string()
        } else {
            option.image_ref.clone()
        };
        debug!(%image_ref, "Resolved image reference");

        let in_scope = !option.skip_objects.matches(resource);
        if !in_scope {
            info!("Resource is excluded by skipObjects");
        }

        let ignore_fields = self.ignore_fields_for(resource, option);
        let object = resource.to_yaml_bytes()?;

        let manifest = self
            .fetcher
            .fetch(&object, &image_ref)
            .await
            .map_err(|e| e.in_stage(Stage::Fetch))?;

        let outcome = self
            .matcher
            .match_manifest(
                resource,
                &manifest,
                &ignore_fields,
                option.check_dry_run_for_apply,
            )
            .await
            .map_err(|e| e.in_stage(Stage::Match))?;

        let verdict = self
            .signature_verifier
            .verify(&object, &image_ref, option.key_path())
            .await
            .map_err(|e| e.in_stage(Stage::VerifySignature))?;

        let trusted = option.signers.matches(&verdict.signer);
        if verdict.verified && !trusted {
            warn!(signer = %verdict.signer, "Signer is not in the trusted signer list");
        }

        let verified = outcome.matched && verdict.verified && trusted;
        info!(
            verified,
            in_scope,
            matched = outcome.matched,
            signature_valid = verdict.verified,
            "Verification complete"
        );

        Ok(VerifyResourceResult {
            verified,
            in_scope,
            signer: verdict.signer,
            sig_ref: image_ref,
            diff: outcome.diff,
        })
    }
}

impl std::fmt::Debug for ResourceVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceVerifier")
            .field("config", &self.config)
            .field("matcher", &self.matcher)
            .finish_non_exhaustive()
    }
}

/// Verify `resource` with a default engine.
///
/// # Errors
///
/// See [`ResourceVerifier::verify_resource`].
pub async fn verify_resource(
    resource: &Resource,
    option: &VerifyResourceOption,
) -> Result<VerifyResourceResult, VerifyError> {
    ResourceVerifier::with_defaults(VerifyConfig::default())
        .verify_resource(resource, option)
        .await
}
