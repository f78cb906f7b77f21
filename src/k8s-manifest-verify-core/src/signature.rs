//! Signature verification.
//!
//! [`AnnotationSignatureVerifier`] checks an ECDSA P-256 signature carried in
//! the object's annotations against the signed message, also carried in the
//! annotations, using a PEM public key from disk.

use std::path::Path;

use async_trait::async_trait;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use crate::config::{MESSAGE_ANNOTATION_KEY, SIGNATURE_ANNOTATION_KEY};
use crate::error::VerifyError;
use crate::fetch::decode_annotation;
use crate::resource::Resource;
use crate::types::SignatureVerdict;

/// Checks whether a resource carries a valid signature.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    /// Verify the signature for `object` (the live object as YAML).
    ///
    /// An invalid or absent signature is a negative verdict, not an error.
    /// Errors mean verification could not be attempted.
    async fn verify(
        &self,
        object: &[u8],
        image_ref: &str,
        key_path: Option<&Path>,
    ) -> Result<SignatureVerdict, VerifyError>;
}

/// Signer identity for a key: `sha256:` followed by the hex digest of the
/// uncompressed SEC1 point.
#[must_use]
pub fn key_fingerprint(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    format!("sha256:{}", hex::encode(Sha256::digest(point.as_bytes())))
}

/// Load a PEM-encoded P-256 public key.
pub async fn load_public_key(path: &Path) -> Result<VerifyingKey, VerifyError> {
    let pem = tokio::fs::read_to_string(path).await.map_err(|e| {
        VerifyError::signature(format!("cannot read key {}: {}", path.display(), e))
    })?;
    VerifyingKey::from_public_key_pem(&pem)
        .map_err(|e| VerifyError::signature(format!("invalid public key {}: {}", path.display(), e)))
}

fn parse_signature(bytes: &[u8]) -> Option<Signature> {
    Signature::from_der(bytes)
        .or_else(|_| Signature::from_slice(bytes))
        .ok()
}

/// Verifies the signature annotation against the message annotation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotationSignatureVerifier;

#[async_trait]
impl SignatureVerifier for AnnotationSignatureVerifier {
    #[instrument(skip(self, object))]
    async fn verify(
        &self,
        object: &[u8],
        image_ref: &str,
        key_path: Option<&Path>,
    ) -> Result<SignatureVerdict, VerifyError> {
        let resource = Resource::from_yaml_bytes(object)?;

        let Some(signature) = resource.annotation(SIGNATURE_ANNOTATION_KEY) else {
            debug!("No signature annotation");
            return Ok(SignatureVerdict::default());
        };

        let message = match resource.annotation(MESSAGE_ANNOTATION_KEY) {
            Some(message) => decode_annotation(MESSAGE_ANNOTATION_KEY, message)
                .map_err(|e| VerifyError::signature(e.to_string()))?,
            None if !image_ref.is_empty() => {
                return Err(VerifyError::signature(format!(
                    "verifying signatures stored in image {} is not supported",
                    image_ref
                )));
            },
            None => {
                debug!("Signature present without a signed message");
                return Ok(SignatureVerdict::default());
            },
        };

        let key_path =
            key_path.ok_or_else(|| VerifyError::signature("a public key path is required"))?;
        let key = load_public_key(key_path).await?;

        let signature_bytes = decode_annotation(SIGNATURE_ANNOTATION_KEY, signature)
            .map_err(|e| VerifyError::signature(e.to_string()))?;
        let Some(signature) = parse_signature(&signature_bytes) else {
            warn!("Signature annotation is not a P-256 signature");
            return Ok(SignatureVerdict::default());
        };

        match key.verify(&message, &signature) {
            Ok(()) => {
                let signer = key_fingerprint(&key);
                debug!(%signer, "Signature verified");
                Ok(SignatureVerdict {
                    verified: true,
                    signer,
                })
            },
            Err(_) => {
                warn!("Signature does not match the signed message");
                Ok(SignatureVerdict::default())
            },
        }
    }
}
