//! Error types for verification operations.

use std::fmt;

use k8s_manifest_mapnode::MapnodeError;
use thiserror::Error;

/// Pipeline stage an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Fetching the candidate manifest.
    Fetch,
    /// Running the matching cascade.
    Match,
    /// Comparing the object against the raw manifest.
    DirectMatch,
    /// Comparing against a dry-run create of the manifest.
    DryRunCreateMatch,
    /// Comparing against a dry-run of the apply-patched manifest.
    DryRunApplyMatch,
    /// Verifying the signature.
    VerifySignature,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Fetch => "fetch",
            Self::Match => "match",
            Self::DirectMatch => "direct match",
            Self::DryRunCreateMatch => "dry-run create match",
            Self::DryRunApplyMatch => "dry-run apply match",
            Self::VerifySignature => "verify signature",
        };
        f.write_str(label)
    }
}

/// Errors that can occur during verification.
///
/// A manifest that does not match the live object is not an error; only
/// infrastructural failures are reported here.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// No manifest corresponds to the resource.
    #[error("Manifest not found: {reason}")]
    ManifestNotFound {
        /// Why no manifest was found.
        reason: String,
    },

    /// Object, manifest or simulation bytes could not be parsed.
    #[error("Failed to parse {what}: {source}")]
    Parse {
        /// Which tree failed to parse.
        what: String,
        /// Underlying parse error.
        #[source]
        source: MapnodeError,
    },

    /// The dry-run collaborator failed or was rejected by admission.
    #[error("Dry-run failed: {message}")]
    DryRun {
        /// Error message.
        message: String,
    },

    /// Signature verification could not be performed (not an invalid signature).
    #[error("Signature verification error: {reason}")]
    Signature {
        /// Reason for failure.
        reason: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Error message.
        message: String,
    },

    /// I/O error reading keys, manifests or configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error wrapped with the stage it occurred in.
    #[error("{stage}: {source}")]
    Stage {
        /// Stage label.
        stage: Stage,
        /// The wrapped error.
        #[source]
        source: Box<VerifyError>,
    },
}

impl VerifyError {
    /// Create a parse error for the named tree.
    #[must_use]
    pub fn parse(what: impl Into<String>, source: MapnodeError) -> Self {
        Self::Parse {
            what: what.into(),
            source,
        }
    }

    /// Create a manifest-not-found error.
    #[must_use]
    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::ManifestNotFound {
            reason: reason.into(),
        }
    }

    /// Create a dry-run error.
    #[must_use]
    pub fn dry_run(message: impl Into<String>) -> Self {
        Self::DryRun {
            message: message.into(),
        }
    }

    /// Create a signature error.
    #[must_use]
    pub fn signature(reason: impl Into<String>) -> Self {
        Self::Signature {
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Wrap this error with a stage label.
    #[must_use]
    pub fn in_stage(self, stage: Stage) -> Self {
        Self::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// Outermost stage label, if any.
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The innermost error beneath all stage labels.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if the manifest for the resource could not be found.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::ManifestNotFound { .. })
    }

    /// Check if a collaborator (dry-run, signature backend) failed.
    #[must_use]
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(self.root(), Self::DryRun { .. } | Self::Signature { .. })
    }
}
