//! Property-based tests for the matching cascade and scope rules.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_manifest_verify_core::{
    FieldMask, ManifestMatcher, MatchOutcome, MatchStrategy, ObjectReference, ObjectReferenceList,
    Resource,
};
use proptest::prelude::*;
use serde_json::{json, Value};

use crate::common::{resource, MockDryRun};

/// Strategy for ConfigMap data.
fn data() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("[a-z]{1,8}", "[a-zA-Z0-9 ]{0,12}", 0..6)
}

/// Strategy for namespaces, including cluster scope.
fn namespace() -> impl Strategy<Value = String> {
    prop_oneof![Just(String::new()), "[a-z]{1,8}"]
}

fn manifest(data: &BTreeMap<String, String>) -> String {
    serde_yaml::to_string(&json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": "cm"},
        "data": data
    }))
    .unwrap()
}

/// The manifest as the cluster reports it: namespaced, with server-managed
/// metadata and status.
fn live(data: &BTreeMap<String, String>, namespace: &str) -> Value {
    let mut metadata = json!({
        "name": "cm",
        "uid": "8d3a",
        "resourceVersion": "12",
        "creationTimestamp": "2024-01-01T00:00:00Z",
        "annotations": {"cosign.sigstore.dev/signature": "MEQCIA"}
    });
    if !namespace.is_empty() {
        metadata["namespace"] = json!(namespace);
    }
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": metadata,
        "data": data,
        "status": {"observed": true}
    })
}

fn run_match(dry_run: &Arc<MockDryRun>, object: &Resource, manifest: &str) -> MatchOutcome {
    let matcher = ManifestMatcher::new(dry_run.clone());
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(matcher.match_manifest(object, manifest.as_bytes(), &FieldMask::default(), true))
        .unwrap()
}

// =============================================================================
// Cascade Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Objects that differ from their manifest only in baseline fields
    /// match directly, without any dry run.
    #[test]
    fn baseline_noise_matches_directly(data in data(), ns in namespace()) {
        let dry_run = Arc::new(MockDryRun::echo());
        let outcome = run_match(&dry_run, &resource(live(&data, &ns)), &manifest(&data));

        prop_assert!(outcome.matched);
        prop_assert_eq!(outcome.matched_by, Some(MatchStrategy::Direct));
        prop_assert!(dry_run.calls().is_empty());
    }

    /// An injected label is never masked and is the only reported difference.
    #[test]
    fn injected_label_is_reported(data in data(), ns in namespace(), label in "[a-z]{1,8}") {
        let mut object = live(&data, &ns);
        let mut labels = serde_json::Map::new();
        labels.insert(label.clone(), json!("injected"));
        object["metadata"]["labels"] = Value::Object(labels);

        let dry_run = Arc::new(MockDryRun::echo());
        let outcome = run_match(&dry_run, &resource(object), &manifest(&data));

        prop_assert!(!outcome.matched);
        prop_assert_eq!(outcome.diff.keys(), vec![format!("metadata.labels.{}", label)]);
    }

    /// Dry runs use an empty namespace exactly for cluster-scoped objects.
    #[test]
    fn dry_run_namespace_follows_scope(data in data(), ns in namespace()) {
        let mut object = live(&data, &ns);
        object["data"]["extra"] = json!("drift");

        let dry_run = Arc::new(MockDryRun::echo());
        run_match(&dry_run, &resource(object), &manifest(&data));

        let expected = if ns.is_empty() { "" } else { "default" };
        for call in dry_run.calls().iter().filter(|c| c.verb == "create") {
            prop_assert_eq!(call.namespace.as_str(), expected);
        }
    }

    /// A skip rule on namespace selects exactly the objects in that namespace.
    #[test]
    fn skip_rule_selects_by_namespace(ns in "[a-z]{1,8}", skipped in "[a-z]{1,8}") {
        let skip: ObjectReferenceList =
            vec![ObjectReference::kind("ConfigMap").in_namespace(skipped.clone())].into();
        let object = resource(live(&BTreeMap::new(), &ns));
        prop_assert_eq!(skip.matches(&object), ns == skipped);
    }
}
