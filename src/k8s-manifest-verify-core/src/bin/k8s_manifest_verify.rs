//! k8s-manifest-verify CLI - verify live resources against signed manifests.
//!
//! Exit codes: 0 when the resource verified (or matched), 1 when it did not,
//! 2 when verification could not be carried out.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use k8s_manifest_verify_core::known_changes::known_changes_yaml;
use k8s_manifest_verify_core::{
    AnnotationManifestFetcher, AnnotationSignatureVerifier, DiffResult, FieldMask,
    FileManifestFetcher, KubectlDryRun, ManifestFetcher, ManifestMatcher, MatchOutcome, Resource,
    ResourceVerifier, VerifyConfig, VerifyError, VerifyResourceOption, VerifyResourceResult,
};
use serde::Serialize;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Verify that live Kubernetes resources derive from signed manifests.
#[derive(Parser)]
#[command(name = "k8s-manifest-verify")]
#[command(version = VERSION)]
#[command(about = "Verify live Kubernetes resources against signed manifests")]
#[command(long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text", global = true)]
    format: String,

    /// kubectl executable used for dry runs
    #[arg(long, global = true)]
    kubectl: Option<PathBuf>,

    /// Kubeconfig file passed to kubectl
    #[arg(long, global = true)]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context passed to kubectl
    #[arg(long, global = true)]
    context: Option<String>,

    /// Dry-run timeout in seconds
    #[arg(long, default_value = "30", global = true)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a live object: manifest match, signature and signer
    Verify {
        /// Live object (YAML or JSON)
        #[arg(long)]
        object: PathBuf,

        /// Manifest file; defaults to the manifest embedded in the object
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Verification options (YAML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Image reference, overriding the options and the annotation
        #[arg(long)]
        image_ref: Option<String>,

        /// Public key (PEM)
        #[arg(long)]
        key: Option<PathBuf>,

        /// Also try the dry-run apply strategy
        #[arg(long)]
        dry_run_apply: bool,
    },

    /// Match a live object against a manifest without checking signatures
    Match {
        /// Live object (YAML or JSON)
        #[arg(long)]
        object: PathBuf,

        /// Manifest file
        #[arg(long)]
        manifest: PathBuf,

        /// Field path to ignore when all strategies fail (repeatable)
        #[arg(long = "ignore")]
        ignore: Vec<String>,

        /// Also try the dry-run apply strategy
        #[arg(long)]
        dry_run_apply: bool,
    },

    /// Print the bundled table of known cluster-side changes
    KnownChanges,
}

fn read_resource(path: &Path) -> Result<Resource, VerifyError> {
    let bytes = std::fs::read(path)?;
    Resource::from_yaml_bytes(&bytes)
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error: failed to encode output: {}", e),
    }
}

fn print_diff(diff: &DiffResult) {
    for item in diff.items() {
        let show = |v: &Option<serde_json::Value>| {
            v.as_ref()
                .map_or_else(|| "<absent>".to_string(), |v| v.to_string())
        };
        println!(
            "  {}: {} -> {}",
            item.key,
            show(&item.values.before),
            show(&item.values.after)
        );
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn print_result(result: &VerifyResourceResult, json: bool) {
    if json {
        print_json(result);
        return;
    }
    println!("Verified:  {}", yes_no(result.verified));
    println!("In scope:  {}", yes_no(result.in_scope));
    println!(
        "Signer:    {}",
        if result.signer.is_empty() { "-" } else { result.signer.as_str() }
    );
    println!(
        "Sig ref:   {}",
        if result.sig_ref.is_empty() { "-" } else { result.sig_ref.as_str() }
    );
    if !result.diff.is_empty() {
        println!("Diff:");
        print_diff(&result.diff);
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MatchReport<'a> {
    matched: bool,
    matched_by: Option<String>,
    diff: &'a DiffResult,
}

fn print_outcome(outcome: &MatchOutcome, json: bool) {
    if json {
        print_json(&MatchReport {
            matched: outcome.matched,
            matched_by: outcome.matched_by.map(|s| s.to_string()),
            diff: &outcome.diff,
        });
        return;
    }
    match outcome.matched_by {
        Some(strategy) => println!("Matched:   yes ({})", strategy),
        None => println!("Matched:   no"),
    }
    if !outcome.diff.is_empty() {
        println!("Diff:");
        print_diff(&outcome.diff);
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_verify(
    config: VerifyConfig,
    object: &Path,
    manifest: Option<PathBuf>,
    options: Option<PathBuf>,
    image_ref: Option<String>,
    key: Option<PathBuf>,
    dry_run_apply: bool,
) -> Result<VerifyResourceResult, VerifyError> {
    let resource = read_resource(object)?;

    let mut option = match options {
        Some(path) => VerifyResourceOption::from_yaml_file(&path)?,
        None => VerifyResourceOption::default(),
    };
    if let Some(image_ref) = image_ref {
        option.image_ref = image_ref;
    }
    if let Some(key) = key {
        option.key_path = key.display().to_string();
    }
    option.check_dry_run_for_apply |= dry_run_apply;

    let fetcher: Arc<dyn ManifestFetcher> = match manifest {
        Some(path) => Arc::new(FileManifestFetcher::new(path)),
        None => Arc::new(AnnotationManifestFetcher),
    };
    let dry_run = Arc::new(KubectlDryRun::new(&config));
    let engine = ResourceVerifier::new(
        config,
        fetcher,
        Arc::new(AnnotationSignatureVerifier),
        dry_run,
    );

    engine.verify_resource(&resource, &option).await
}

async fn run_match(
    config: VerifyConfig,
    object: &Path,
    manifest: &Path,
    ignore: &[String],
    dry_run_apply: bool,
) -> Result<MatchOutcome, VerifyError> {
    let resource = read_resource(object)?;
    let manifest = std::fs::read(manifest)?;
    let matcher = ManifestMatcher::with_config(Arc::new(KubectlDryRun::new(&config)), &config);
    matcher
        .match_manifest(&resource, &manifest, &FieldMask::new(ignore), dry_run_apply)
        .await
}

fn exit_for(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let json_output = cli.format == "json";

    // Initialize logging (suppress for JSON output)
    if json_output {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::ERROR)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let mut config = VerifyConfig {
        kubeconfig: cli.kubeconfig,
        context: cli.context,
        dry_run_timeout: Duration::from_secs(cli.timeout),
        ..VerifyConfig::default()
    };
    if let Some(kubectl) = cli.kubectl {
        config.kubectl_path = kubectl;
    }

    let outcome = match cli.command {
        Commands::Verify {
            object,
            manifest,
            config: options,
            image_ref,
            key,
            dry_run_apply,
        } => run_verify(config, &object, manifest, options, image_ref, key, dry_run_apply)
            .await
            .map(|result| {
                print_result(&result, json_output);
                result.verified
            }),
        Commands::Match {
            object,
            manifest,
            ignore,
            dry_run_apply,
        } => run_match(config, &object, &manifest, &ignore, dry_run_apply)
            .await
            .map(|outcome| {
                print_outcome(&outcome, json_output);
                outcome.matched
            }),
        Commands::KnownChanges => {
            print!("{}", known_changes_yaml());
            Ok(true)
        },
    };

    match outcome {
        Ok(ok) => exit_for(ok),
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(2)
        },
    }
}
