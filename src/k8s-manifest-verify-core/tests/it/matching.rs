//! Matching cascade behavior against a simulated cluster.

use std::sync::Arc;

use k8s_manifest_verify_core::{
    known_k8s_ignore_fields, FieldMask, ManifestMatcher, MatchStrategy, Resource, Stage,
    VerifyConfig, VerifyError,
};
use serde_json::{json, Value};

use crate::common::{resource, set, MockDryRun};

fn matcher(dry_run: &Arc<MockDryRun>) -> ManifestMatcher {
    ManifestMatcher::new(dry_run.clone())
}

fn no_ignores() -> FieldMask {
    FieldMask::default()
}

// =============================================================================
// Fixtures
// =============================================================================

const DEPLOYMENT_MANIFEST: &str = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: web-settings
data:
  mode: strict
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  labels:
    app: web
spec:
  replicas: 2
  selector:
    matchLabels:
      app: web
  template:
    metadata:
      labels:
        app: web
    spec:
      containers:
      - name: web
        image: nginx:1.25
"#;

fn live_deployment() -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": "web",
            "namespace": "team-a",
            "uid": "8f1c0d2e",
            "resourceVersion": "4411",
            "generation": 3,
            "creationTimestamp": "2024-05-01T10:00:00Z",
            "labels": {"app": "web"},
            "annotations": {
                "cosign.sigstore.dev/message": "H4sIAAAA",
                "cosign.sigstore.dev/signature": "MEUCIQ",
                "kubectl.kubernetes.io/last-applied-configuration": "{}"
            },
            "managedFields": [{"manager": "kubectl", "operation": "Apply"}]
        },
        "spec": {
            "replicas": 2,
            "selector": {"matchLabels": {"app": "web"}},
            "template": {
                "metadata": {"labels": {"app": "web"}},
                "spec": {"containers": [{"name": "web", "image": "nginx:1.25"}]}
            }
        },
        "status": {"readyReplicas": 2, "replicas": 2}
    })
}

const POD_MANIFEST: &str = r#"
apiVersion: v1
kind: Pod
metadata:
  generateName: worker-
spec:
  containers:
  - name: worker
    image: busybox:1.36
"#;

fn live_pod() -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": "worker-x7k2p",
            "generateName": "worker-",
            "namespace": "jobs",
            "uid": "51d2"
        },
        "spec": {
            "containers": [{
                "name": "worker",
                "image": "busybox:1.36",
                "imagePullPolicy": "IfNotPresent",
                "terminationMessagePath": "/dev/termination-log"
            }],
            "restartPolicy": "Always",
            "dnsPolicy": "ClusterFirst"
        }
    })
}

/// What the API server stores for a created pod: a generated name, a
/// namespace, a uid and defaulted fields.
fn pod_defaults(mut pod: Value) -> Value {
    set(&mut pod, "metadata.name", json!("worker-dryrun"));
    set(&mut pod, "metadata.namespace", json!("default"));
    set(&mut pod, "metadata.uid", json!("0000"));
    set(&mut pod, "spec.restartPolicy", json!("Always"));
    set(&mut pod, "spec.dnsPolicy", json!("ClusterFirst"));
    if let Some(container) = pod.pointer_mut("/spec/containers/0") {
        set(container, "imagePullPolicy", json!("IfNotPresent"));
        set(container, "terminationMessagePath", json!("/dev/termination-log"));
    }
    pod
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn identical_modulo_baseline_matches_directly() {
    let dry_run = Arc::new(MockDryRun::echo());
    let outcome = matcher(&dry_run)
        .match_manifest(
            &resource(live_deployment()),
            DEPLOYMENT_MANIFEST.as_bytes(),
            &no_ignores(),
            true,
        )
        .await
        .unwrap();

    assert!(outcome.matched);
    assert_eq!(outcome.matched_by, Some(MatchStrategy::Direct));
    assert!(outcome.diff.is_empty());
    assert!(dry_run.calls().is_empty(), "direct match must not touch the cluster");
}

#[tokio::test]
async fn generated_name_matches_after_dry_run_create() {
    let dry_run = Arc::new(MockDryRun::simulating(pod_defaults));
    let outcome = matcher(&dry_run)
        .match_manifest(&resource(live_pod()), POD_MANIFEST.as_bytes(), &no_ignores(), false)
        .await
        .unwrap();

    assert!(outcome.matched);
    assert_eq!(outcome.matched_by, Some(MatchStrategy::DryRunCreate));

    let calls = dry_run.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].verb, "create");
    assert_eq!(calls[0].namespace, "default");
    assert!(calls[0].input.pointer("/metadata/namespace").is_none());
}

#[tokio::test]
async fn injected_label_fails_every_strategy() {
    let mut pod = live_pod();
    set(&mut pod, "metadata.labels.backdoor", json!("true"));

    let dry_run = Arc::new(MockDryRun::simulating(pod_defaults));
    let outcome = matcher(&dry_run)
        .match_manifest(&resource(pod), POD_MANIFEST.as_bytes(), &no_ignores(), true)
        .await
        .unwrap();

    assert!(!outcome.matched);
    assert_eq!(outcome.matched_by, None);
    assert_eq!(outcome.diff.keys(), vec!["metadata.labels.backdoor"]);
    let item = &outcome.diff.items()[0];
    assert_eq!(item.values.before, Some(json!("true")));
    assert_eq!(item.values.after, None);

    assert_eq!(dry_run.count("create"), 2);
    assert_eq!(dry_run.count("apply"), 1);
}

#[tokio::test]
async fn ignored_fields_rescue_the_last_diff() {
    let mut pod = live_pod();
    set(&mut pod, "metadata.labels.backdoor", json!("true"));

    let dry_run = Arc::new(MockDryRun::simulating(pod_defaults));
    let outcome = matcher(&dry_run)
        .match_manifest(
            &resource(pod),
            POD_MANIFEST.as_bytes(),
            &FieldMask::new(["metadata.labels"]),
            false,
        )
        .await
        .unwrap();

    assert!(outcome.matched);
    assert_eq!(outcome.matched_by, Some(MatchStrategy::FilteredDiff));
    assert!(outcome.diff.is_empty());
}

#[tokio::test]
async fn ignored_fields_do_not_apply_to_unrelated_paths() {
    let mut pod = live_pod();
    set(&mut pod, "metadata.labels.backdoor", json!("true"));

    let dry_run = Arc::new(MockDryRun::simulating(pod_defaults));
    let outcome = matcher(&dry_run)
        .match_manifest(
            &resource(pod),
            POD_MANIFEST.as_bytes(),
            &FieldMask::new(["metadata.annotations", "spec.nodeName"]),
            false,
        )
        .await
        .unwrap();

    assert!(!outcome.matched);
    assert_eq!(outcome.diff.size(), 1);
}

// =============================================================================
// Known cluster-side changes
// =============================================================================

fn known_ignores(object: &Resource) -> FieldMask {
    FieldMask::new(known_k8s_ignore_fields().matches(object).unwrap_or_default())
}

/// Add the service account token volume admission injects, named with
/// `suffix` as the API server does.
fn with_token_volume(mut pod: Value, suffix: &str) -> Value {
    let name = format!("kube-api-access-{}", suffix);
    set(
        &mut pod,
        "spec.volumes",
        json!([{
            "name": name,
            "projected": {
                "defaultMode": 420,
                "sources": [
                    {"serviceAccountToken": {"expirationSeconds": 3607, "path": "token"}},
                    {"configMap": {"name": "kube-root-ca.crt", "items": [{"key": "ca.crt", "path": "ca.crt"}]}}
                ]
            }
        }]),
    );
    if let Some(container) = pod.pointer_mut("/spec/containers/0") {
        set(
            container,
            "volumeMounts",
            json!([{
                "name": name,
                "mountPath": "/var/run/secrets/kubernetes.io/serviceaccount",
                "readOnly": true
            }]),
        );
    }
    pod
}

#[tokio::test]
async fn service_account_volume_names_are_known_changes() {
    let pod = resource(with_token_volume(live_pod(), "x7k2p"));
    let dry_run = Arc::new(MockDryRun::simulating(|p| with_token_volume(pod_defaults(p), "dr9qz")));
    let outcome = matcher(&dry_run)
        .match_manifest(&pod, POD_MANIFEST.as_bytes(), &known_ignores(&pod), false)
        .await
        .unwrap();

    assert!(outcome.matched);
    assert_eq!(outcome.matched_by, Some(MatchStrategy::FilteredDiff));
}

#[tokio::test]
async fn injected_host_path_volume_is_reported() {
    let mut live = with_token_volume(live_pod(), "x7k2p");
    if let Some(volumes) = live.pointer_mut("/spec/volumes").and_then(Value::as_array_mut) {
        volumes.push(json!({"name": "host", "hostPath": {"path": "/"}}));
    }
    if let Some(mounts) = live
        .pointer_mut("/spec/containers/0/volumeMounts")
        .and_then(Value::as_array_mut)
    {
        mounts.push(json!({"name": "host", "mountPath": "/host"}));
    }
    let pod = resource(live);

    let dry_run = Arc::new(MockDryRun::simulating(|p| with_token_volume(pod_defaults(p), "dr9qz")));
    let outcome = matcher(&dry_run)
        .match_manifest(&pod, POD_MANIFEST.as_bytes(), &known_ignores(&pod), false)
        .await
        .unwrap();

    assert!(!outcome.matched);
    let keys = outcome.diff.keys();
    assert_eq!(keys.len(), 2);
    assert!(keys.contains(&"spec.volumes.1.hostPath.path"));
    assert!(keys.contains(&"spec.containers.0.volumeMounts.1.mountPath"));
}

// =============================================================================
// Dry-run apply
// =============================================================================

const CONFIGMAP_MANIFEST: &str = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\ndata:\n  mode: strict\n";

fn live_configmap() -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": "cm", "namespace": "team-a"},
        "data": {"mode": "strict", "owner": "ops"}
    })
}

fn merge_owner(mut cm: Value) -> Value {
    set(&mut cm, "data.owner", json!("ops"));
    cm
}

#[tokio::test]
async fn apply_strategy_runs_only_when_allowed() {
    let dry_run = Arc::new(MockDryRun::echo().with_apply(merge_owner));
    let outcome = matcher(&dry_run)
        .match_manifest(&resource(live_configmap()), CONFIGMAP_MANIFEST.as_bytes(), &no_ignores(), false)
        .await
        .unwrap();

    assert!(!outcome.matched);
    assert_eq!(outcome.diff.keys(), vec!["data.owner"]);
    assert_eq!(dry_run.count("apply"), 0);
}

#[tokio::test]
async fn apply_strategy_matches_merged_object() {
    let dry_run = Arc::new(MockDryRun::echo().with_apply(merge_owner));
    let outcome = matcher(&dry_run)
        .match_manifest(&resource(live_configmap()), CONFIGMAP_MANIFEST.as_bytes(), &no_ignores(), true)
        .await
        .unwrap();

    assert!(outcome.matched);
    assert_eq!(outcome.matched_by, Some(MatchStrategy::DryRunApply));

    let calls = dry_run.calls();
    let verbs: Vec<_> = calls.iter().map(|c| c.verb).collect();
    assert_eq!(verbs, vec!["create", "apply", "create"]);
    // Apply targets the live namespace, simulation the fixed one.
    assert_eq!(calls[1].namespace, "team-a");
    assert_eq!(calls[2].namespace, "default");
    assert_eq!(calls[2].input.pointer("/data/owner"), Some(&json!("ops")));
}

/// `kubectl apply` answers with the live object's server metadata.
fn merge_owner_with_server_metadata(cm: Value) -> Value {
    let mut cm = merge_owner(cm);
    set(&mut cm, "metadata.namespace", json!("team-a"));
    set(&mut cm, "metadata.uid", json!("5e7a"));
    set(&mut cm, "metadata.resourceVersion", json!("981"));
    set(&mut cm, "metadata.creationTimestamp", json!("2024-05-01T10:00:00Z"));
    set(&mut cm, "metadata.managedFields", json!([{"manager": "kubectl"}]));
    cm
}

#[tokio::test]
async fn dry_runs_never_resubmit_the_live_object() {
    let dry_run = Arc::new(MockDryRun::echo().with_apply(merge_owner_with_server_metadata));
    let outcome = matcher(&dry_run)
        .match_manifest(&resource(live_configmap()), CONFIGMAP_MANIFEST.as_bytes(), &no_ignores(), true)
        .await
        .unwrap();
    assert!(outcome.matched);
    assert_eq!(outcome.matched_by, Some(MatchStrategy::DryRunApply));

    for call in dry_run.calls().iter().filter(|c| c.verb == "create") {
        assert_eq!(call.input["metadata"], json!({"name": "cm-dryrun"}));
    }
}

// =============================================================================
// Scope and custom resource definitions
// =============================================================================

fn crd(api_version: &str, kind: &str) -> Value {
    json!({
        "apiVersion": api_version,
        "kind": kind,
        "metadata": {"name": "widgets.example.com", "uid": "77"},
        "spec": {
            "group": "example.com",
            "names": {"kind": "Widget", "listKind": "WidgetList", "plural": "widgets", "singular": "widget"},
            "scope": "Namespaced",
            "conversion": {"strategy": "None"}
        }
    })
}

fn crd_manifest(api_version: &str, kind: &str) -> String {
    let mut manifest = crd(api_version, kind);
    manifest["metadata"].as_object_mut().unwrap().remove("uid");
    manifest["spec"].as_object_mut().unwrap().remove("conversion");
    serde_yaml::to_string(&manifest).unwrap()
}

/// The server defaults the conversion strategy and, for a dry run, renames
/// the generated names.
fn crd_defaults(mut crd: Value) -> Value {
    set(&mut crd, "spec.conversion.strategy", json!("None"));
    set(&mut crd, "spec.names.kind", json!("WidgetDryrun"));
    set(&mut crd, "spec.names.listKind", json!("WidgetDryrunList"));
    set(&mut crd, "spec.names.plural", json!("widgetdryruns"));
    set(&mut crd, "spec.names.singular", json!("widgetdryrun"));
    crd
}

#[tokio::test]
async fn crd_names_are_masked_in_dry_run() {
    let (api_version, kind) = ("apiextensions.k8s.io/v1", "CustomResourceDefinition");
    let dry_run = Arc::new(MockDryRun::simulating(crd_defaults));
    let outcome = matcher(&dry_run)
        .match_manifest(
            &resource(crd(api_version, kind)),
            crd_manifest(api_version, kind).as_bytes(),
            &no_ignores(),
            false,
        )
        .await
        .unwrap();

    assert!(outcome.matched);
    assert_eq!(outcome.matched_by, Some(MatchStrategy::DryRunCreate));
    assert_eq!(dry_run.calls()[0].namespace, "", "cluster-scoped dry run");
}

#[tokio::test]
async fn other_kinds_keep_names_in_dry_run() {
    let (api_version, kind) = ("example.com/v1", "WidgetClass");
    let dry_run = Arc::new(MockDryRun::simulating(crd_defaults));
    let outcome = matcher(&dry_run)
        .match_manifest(
            &resource(crd(api_version, kind)),
            crd_manifest(api_version, kind).as_bytes(),
            &no_ignores(),
            false,
        )
        .await
        .unwrap();

    assert!(!outcome.matched);
    assert_eq!(
        outcome.diff.keys(),
        vec![
            "spec.names.kind",
            "spec.names.listKind",
            "spec.names.plural",
            "spec.names.singular"
        ]
    );
}

#[tokio::test]
async fn configured_namespace_is_used_for_namespaced_dry_runs() {
    let config = VerifyConfig {
        dry_run_namespace: "verify-sandbox".into(),
        ..VerifyConfig::default()
    };
    let dry_run = Arc::new(MockDryRun::simulating(pod_defaults));
    let matcher = ManifestMatcher::with_config(dry_run.clone(), &config);
    matcher
        .match_manifest(&resource(live_pod()), POD_MANIFEST.as_bytes(), &no_ignores(), false)
        .await
        .unwrap();
    assert_eq!(dry_run.calls()[0].namespace, "verify-sandbox");
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn missing_document_is_not_found_without_dry_runs() {
    let dry_run = Arc::new(MockDryRun::echo());
    let err = matcher(&dry_run)
        .match_manifest(&resource(live_pod()), CONFIGMAP_MANIFEST.as_bytes(), &no_ignores(), true)
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert!(dry_run.calls().is_empty());
}

#[tokio::test]
async fn dry_run_failure_stops_the_cascade() {
    let dry_run = Arc::new(MockDryRun::failing("admission webhook \"policy\" denied the request"));
    let err = matcher(&dry_run)
        .match_manifest(&resource(live_pod()), POD_MANIFEST.as_bytes(), &no_ignores(), true)
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::DryRunCreateMatch));
    assert!(matches!(err.root(), VerifyError::DryRun { .. }));
    assert_eq!(dry_run.count("apply"), 0);
}

#[tokio::test]
async fn dry_run_failure_is_irrelevant_after_direct_match() {
    let dry_run = Arc::new(MockDryRun::failing("cluster unreachable"));
    let outcome = matcher(&dry_run)
        .match_manifest(
            &resource(live_deployment()),
            DEPLOYMENT_MANIFEST.as_bytes(),
            &no_ignores(),
            true,
        )
        .await
        .unwrap();
    assert!(outcome.matched);
}

#[tokio::test]
async fn unparseable_simulation_is_a_parse_error() {
    let dry_run = Arc::new(MockDryRun::simulating(|_| json!("not an object")));
    let err = matcher(&dry_run)
        .match_manifest(&resource(live_pod()), POD_MANIFEST.as_bytes(), &no_ignores(), false)
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::DryRunCreateMatch));
    assert!(matches!(err.root(), VerifyError::Parse { .. }));
}

#[tokio::test]
async fn first_matching_document_wins() {
    let manifest = format!("{}---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\ndata:\n  mode: relaxed\n", CONFIGMAP_MANIFEST);
    let mut cm = live_configmap();
    cm["data"].as_object_mut().unwrap().remove("owner");

    let dry_run = Arc::new(MockDryRun::echo());
    let outcome = matcher(&dry_run)
        .match_manifest(&resource(cm), manifest.as_bytes(), &no_ignores(), false)
        .await
        .unwrap();
    assert_eq!(outcome.matched_by, Some(MatchStrategy::Direct));
}
