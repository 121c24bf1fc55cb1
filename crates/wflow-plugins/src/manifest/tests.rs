//! Tests for manifest parsing and validation.

use std::fs;

use rstest::rstest;
use tempfile::TempDir;

use super::*;

#[test]
fn manifest_parses_camel_case_fields() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("plugin.json");
    fs::write(
        &path,
        r#"{
            "name": "billing",
            "version": "1.2.0",
            "author": "Ops",
            "moduleTypes": ["billing.ledger"],
            "stepTypes": ["step.charge"],
            "triggerTypes": []
        }"#,
    )
    .expect("write manifest");

    let manifest = PluginManifest::load("billing", &path).expect("load");

    assert_eq!(manifest.name(), "billing");
    assert_eq!(manifest.version(), "1.2.0");
    assert_eq!(manifest.module_types(), ["billing.ledger".to_owned()]);
    assert_eq!(manifest.step_types(), ["step.charge".to_owned()]);
    assert!(manifest.description().is_empty());
    manifest.validate().expect("valid");
}

#[test]
fn unreadable_manifest_is_a_manifest_error() {
    let dir = TempDir::new().expect("temp dir");
    let error = PluginManifest::load("ghost", &dir.path().join("plugin.json"))
        .expect_err("missing file");
    assert!(matches!(error, PluginError::Manifest { ref name, .. } if name == "ghost"));
}

#[test]
fn malformed_json_is_a_manifest_error() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("plugin.json");
    fs::write(&path, "{ not json").expect("write");
    assert!(matches!(
        PluginManifest::load("broken", &path),
        Err(PluginError::Manifest { .. })
    ));
}

#[rstest]
#[case(PluginManifest::new("", "1.0.0"), "name must not be empty")]
#[case(PluginManifest::new("x", " "), "version must not be empty")]
#[case(
    PluginManifest::new("x", "1.0.0").with_step_types(vec!["1step".into()]),
    "stepTypes contains invalid type name '1step'"
)]
#[case(
    PluginManifest::new("x", "1.0.0").with_module_types(vec!["has space".into()]),
    "moduleTypes contains invalid type name 'has space'"
)]
fn invalid_manifests_are_rejected(#[case] manifest: PluginManifest, #[case] expected: &str) {
    let error = manifest.validate().expect_err("must be invalid");
    match error {
        PluginError::Manifest { message, .. } => assert_eq!(message, expected),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[rstest]
#[case("http.server")]
#[case("step.db-query")]
#[case("messaging/kafka_v2")]
fn well_formed_type_names_are_accepted(#[case] type_name: &str) {
    PluginManifest::new("x", "1.0.0")
        .with_trigger_types(vec![type_name.to_owned()])
        .validate()
        .expect("valid type name");
}
