//! Tests for plugin configuration fragments.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rstest::rstest;
use serde_json::json;

use super::*;

const FRAGMENT: &str = "
modules:
  - name: echo-server
    type: http.server
    config:
      root: assets
      docs_root: ./docs
      staticRoot: /srv/static
      template_root: '{{ .env.root }}'
      remote_root: https://cdn.example.com/ui
      label: assets
  - name: shared-cache
    type: cache.memory
settings:
  retries: 3
  colour: blue
";

fn fragment() -> ConfigFragment {
    ConfigFragment::parse("echo", FRAGMENT, Path::new("/opt/plugins/echo")).expect("parse")
}

#[rstest]
#[case("root", "/opt/plugins/echo/assets")]
#[case("docs_root", "/opt/plugins/echo/./docs")]
#[case("staticRoot", "/srv/static")]
#[case("template_root", "{{ .env.root }}")]
#[case("remote_root", "https://cdn.example.com/ui")]
#[case("label", "assets")]
fn root_like_keys_are_rewritten_when_relative(#[case] key: &str, #[case] expected: &str) {
    let parsed = fragment();
    let config = &parsed.tree()["modules"][0]["config"];
    assert_eq!(config[key], json!(expected));
}

#[test]
fn merge_adds_missing_entries_and_keeps_host_values() {
    let mut host = json!({
        "modules": [{"name": "shared-cache", "type": "cache.redis"}],
        "settings": {"retries": 5}
    });

    fragment().merge_into(&mut host).expect("merge");

    let modules = host["modules"].as_array().expect("modules list");
    assert_eq!(modules.len(), 2);
    assert_eq!(modules[0]["type"], json!("cache.redis"));
    assert_eq!(modules[1]["name"], json!("echo-server"));
    assert_eq!(host["settings"], json!({"retries": 5, "colour": "blue"}));
}

#[test]
fn merge_into_null_host_creates_a_mapping() {
    let mut host = serde_json::Value::Null;
    fragment().merge_into(&mut host).expect("merge");
    assert_eq!(host["settings"]["retries"], json!(3));
}

#[test]
fn merge_rejects_non_mapping_hosts() {
    let mut host = json!(["not", "a", "mapping"]);
    let error = fragment().merge_into(&mut host).expect_err("must fail");
    assert!(matches!(error, PluginError::Fragment { .. }));
}

#[rstest]
#[case("modules: [unclosed")]
#[case("- just\n- a list\n")]
fn invalid_fragments_are_rejected(#[case] yaml: &str) {
    let error = ConfigFragment::parse("echo", yaml, Path::new("/tmp")).expect_err("must fail");
    let PluginError::Fragment { name, .. } = error else {
        panic!("expected fragment error, got {error}");
    };
    assert_eq!(name, "echo");
}

#[test]
fn hooks_run_highest_priority_first() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let hook = |name: &'static str, priority: i32| {
        let order = Arc::clone(&order);
        ConfigTransformHook::new(
            name,
            priority,
            Arc::new(move |_: &mut serde_json::Value| {
                order.lock().expect("lock").push(name);
                Ok(())
            }),
        )
    };
    let hooks = [hook("low", 10), hook("high", 90), hook("mid", 50), hook("mid-2", 50)];

    apply_hooks(&hooks, &mut json!({})).expect("apply");

    assert_eq!(*order.lock().expect("lock"), ["high", "mid", "mid-2", "low"]);
}

#[test]
fn fragment_hook_uses_plugin_priority() {
    let hook = fragment().into_hook();
    assert_eq!(hook.name(), "plugin:echo");
    assert_eq!(hook.priority(), PLUGIN_FRAGMENT_PRIORITY);

    let mut host = json!({});
    hook.apply(&mut host).expect("apply");
    assert_eq!(host["modules"][1]["name"], json!("shared-cache"));
}
