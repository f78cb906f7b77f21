//! Manifest retrieval.

use std::path::PathBuf;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;

use crate::config::MESSAGE_ANNOTATION_KEY;
use crate::error::VerifyError;
use crate::resource::Resource;

/// Source of the signed manifest for a resource.
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    /// Return manifest bytes for `object` (the live object as YAML).
    ///
    /// `image_ref` is the resolved image reference and may be empty.
    async fn fetch(&self, object: &[u8], image_ref: &str) -> Result<Vec<u8>, VerifyError>;
}

/// Decode a base64 annotation value, tolerating embedded whitespace.
pub(crate) fn decode_annotation(key: &str, value: &str) -> Result<Vec<u8>, VerifyError> {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| VerifyError::not_found(format!("annotation {} is not valid base64: {}", key, e)))
}

/// Reads the manifest embedded in the object's message annotation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotationManifestFetcher;

#[async_trait]
impl ManifestFetcher for AnnotationManifestFetcher {
    async fn fetch(&self, object: &[u8], image_ref: &str) -> Result<Vec<u8>, VerifyError> {
        let resource = Resource::from_yaml_bytes(object)?;
        match resource.annotation(MESSAGE_ANNOTATION_KEY) {
            Some(message) => {
                debug!(image_ref, "Using manifest embedded in annotation");
                decode_annotation(MESSAGE_ANNOTATION_KEY, message)
            },
            None if image_ref.is_empty() => Err(VerifyError::not_found(format!(
                "no image reference and no {} annotation",
                MESSAGE_ANNOTATION_KEY
            ))),
            None => Err(VerifyError::not_found(format!(
                "fetching manifests from image {} is not supported",
                image_ref
            ))),
        }
    }
}

/// Reads the manifest from a local file, ignoring the object and image.
#[derive(Debug, Clone)]
pub struct FileManifestFetcher {
    path: PathBuf,
}

impl FileManifestFetcher {
    /// Fetch from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ManifestFetcher for FileManifestFetcher {
    async fn fetch(&self, _object: &[u8], _image_ref: &str) -> Result<Vec<u8>, VerifyError> {
        tokio::fs::read(&self.path).await.map_err(|e| {
            VerifyError::not_found(format!("cannot read {}: {}", self.path.display(), e))
        })
    }
}
