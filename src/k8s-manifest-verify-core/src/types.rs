//! Result types returned by the matcher and the verifier.

use std::fmt;

use k8s_manifest_mapnode::DiffResult;
use serde::{Deserialize, Serialize};

/// Outcome of verifying one resource.
///
/// Serialized as `{"verified", "inScope", "signer", "sigRef", "diff"}`,
/// with `diff` set to `null` when the resource matched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResourceResult {
    /// Matched, validly signed, and signed by a trusted signer.
    pub verified: bool,
    /// False when the resource is excluded by `skipObjects`.
    pub in_scope: bool,
    /// Identity reported by the signature verifier.
    pub signer: String,
    /// Image reference the signature was resolved from.
    pub sig_ref: String,
    /// Remaining differences when the manifest did not match.
    #[serde(default)]
    pub diff: DiffResult,
}

impl fmt::Display for VerifyResourceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// How a match was established, in the order the matcher tries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchStrategy {
    /// Object against the raw manifest.
    Direct,
    /// Object against a dry-run create of the manifest.
    DryRunCreate,
    /// Object against a dry-run create of the apply-patched manifest.
    DryRunApply,
    /// Last diff after removing ignored fields.
    FilteredDiff,
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Direct => "direct",
            Self::DryRunCreate => "dry-run create",
            Self::DryRunApply => "dry-run apply",
            Self::FilteredDiff => "filtered diff",
        };
        f.write_str(label)
    }
}

/// Outcome of the matching cascade.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    /// Whether the object derives from the manifest.
    pub matched: bool,
    /// Empty on a match; otherwise the filtered diff of the last strategy.
    pub diff: DiffResult,
    /// Strategy that produced the match.
    pub matched_by: Option<MatchStrategy>,
}

impl MatchOutcome {
    pub(crate) fn matched(strategy: MatchStrategy) -> Self {
        Self {
            matched: true,
            diff: DiffResult::Empty,
            matched_by: Some(strategy),
        }
    }

    pub(crate) fn mismatched(diff: DiffResult) -> Self {
        Self {
            matched: false,
            diff,
            matched_by: None,
        }
    }
}

/// What a signature verifier concluded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureVerdict {
    /// The signature is cryptographically valid.
    pub verified: bool,
    /// Signer identity, empty when unknown.
    pub signer: String,
}
