//! Server-side dry-run simulation.
//!
//! The matcher asks the cluster what an object created from a manifest would
//! look like. Every call is a dry run, so abandoning one midway has no side
//! effects. Calls are bounded by a timeout and never retried here.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::config::VerifyConfig;
use crate::error::VerifyError;

/// Result of computing an apply patch for a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyPatch {
    /// The patch as submitted.
    pub original: Vec<u8>,
    /// The object that applying the patch would produce.
    pub patched: Vec<u8>,
}

/// Dry-run operations against the cluster.
#[async_trait]
pub trait DryRunClient: Send + Sync {
    /// Simulate creating `manifest`. An empty namespace means cluster scope.
    ///
    /// Returns the object the server would store, as JSON or YAML bytes.
    async fn dry_run_create(&self, manifest: &[u8], namespace: &str) -> Result<Vec<u8>, VerifyError>;

    /// Compute the object that applying `manifest` in `namespace` would yield.
    async fn apply_patch_bytes(&self, manifest: &[u8], namespace: &str) -> Result<ApplyPatch, VerifyError>;
}

/// [`DryRunClient`] backed by `kubectl --dry-run=server`.
#[derive(Debug, Clone)]
pub struct KubectlDryRun {
    kubectl: PathBuf,
    kubeconfig: Option<PathBuf>,
    context: Option<String>,
    timeout: Duration,
}

impl KubectlDryRun {
    /// Create a client from the engine configuration.
    #[must_use]
    pub fn new(config: &VerifyConfig) -> Self {
        Self {
            kubectl: config.kubectl_path.clone(),
            kubeconfig: config.kubeconfig.clone(),
            context: config.context.clone(),
            timeout: config.dry_run_timeout,
        }
    }

    fn args(&self, verb: &str, namespace: &str) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(kubeconfig) = &self.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(kubeconfig.display().to_string());
        }
        if let Some(context) = &self.context {
            args.push("--context".to_string());
            args.push(context.clone());
        }
        if !namespace.is_empty() {
            args.push("--namespace".to_string());
            args.push(namespace.to_string());
        }
        args.extend(
            [verb, "--dry-run=server", "-o", "json", "-f", "-"]
                .iter()
                .map(|s| s.to_string()),
        );
        args
    }

    async fn run(&self, verb: &str, manifest: &[u8], namespace: &str) -> Result<Vec<u8>, VerifyError> {
        let args = self.args(verb, namespace);
        debug!(kubectl = %self.kubectl.display(), ?args, "Running dry-run");

        let mut child = Command::new(&self.kubectl)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                VerifyError::dry_run(format!("failed to start {}: {}", self.kubectl.display(), e))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VerifyError::dry_run("kubectl stdin was not captured"))?;
        let input = manifest.to_vec();
        let writer = tokio::spawn(async move {
            stdin.write_all(&input).await?;
            stdin.shutdown().await
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                VerifyError::dry_run(format!(
                    "kubectl {} timed out after {:?}",
                    verb, self.timeout
                ))
            })??;

        if let Ok(Err(e)) = writer.await {
            debug!(error = %e, "kubectl closed stdin early");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let code = output.status.code().unwrap_or(-1);
            return Err(VerifyError::dry_run(if stderr.is_empty() {
                format!("kubectl {} exited with code {}", verb, code)
            } else {
                format!("kubectl {} exited with code {}: {}", verb, code, stderr)
            }));
        }

        Ok(output.stdout)
    }
}

impl Default for KubectlDryRun {
    fn default() -> Self {
        Self::new(&VerifyConfig::default())
    }
}

#[async_trait]
impl DryRunClient for KubectlDryRun {
    #[instrument(skip(self, manifest), fields(bytes = manifest.len()))]
    async fn dry_run_create(&self, manifest: &[u8], namespace: &str) -> Result<Vec<u8>, VerifyError> {
        self.run("create", manifest, namespace).await
    }

    #[instrument(skip(self, manifest), fields(bytes = manifest.len()))]
    async fn apply_patch_bytes(&self, manifest: &[u8], namespace: &str) -> Result<ApplyPatch, VerifyError> {
        let patched = self.run("apply", manifest, namespace).await?;
        Ok(ApplyPatch {
            original: manifest.to_vec(),
            patched,
        })
    }
}
