//! Tests for placeholder resolution.

use rstest::{fixture, rstest};
use serde_json::json;
use wflow_plugin_protocol::value::{decode_map, encode_map};

use super::*;

fn map(value: serde_json::Value) -> ValueMap {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

#[fixture]
fn context() -> PipelineContext {
    let mut context = PipelineContext::new(map(json!({"path_params": {"id": "42"}})))
        .with_metadata("pipeline", json!("orders"));
    context.merge_step_output(
        "fetch-user",
        map(json!({"row": {"id": "user-42", "tags": ["a", "b"], "score": 7.0, "ratio": 0.5}})),
    );
    context
}

#[rstest]
#[case("{{ .steps.fetch-user.row.id }}", "user-42")]
#[case("id={{.row.id}}!", "id=user-42!")]
#[case("{{ .trigger.path_params.id }}", "42")]
#[case("{{ .meta.pipeline }}", "orders")]
#[case("{{ .steps.fetch-user.row.tags.1 }}", "b")]
#[case("{{ step \"fetch-user\" \"row\" \"id\" }}", "user-42")]
#[case("{{ trigger \"path_params\" \"id\" }}", "42")]
#[case("{{ index .steps \"fetch-user\" \"row\" \"id\" }}", "user-42")]
#[case("{{ .missing.value }}", "")]
#[case("{{ .steps.fetch-user.row.tags }}", r#"["a","b"]"#)]
#[case("a{{/* note */}}b", "ab")]
#[case("{{- .row.id -}}", "user-42")]
#[case("{{ .steps.fetch-user.row.score }}", "7")]
#[case("{{ .steps.fetch-user.row.ratio }}", "0.5")]
#[case("{{ index .steps.fetch-user.row.tags 0 }}", "a")]
#[case("{{ index (step \"fetch-user\" \"row\") `id` }}", "user-42")]
#[case("a {{ .row.id }}\n", "a user-42\n")]
#[case("{% raw {{ .row.id }}", "{% raw user-42")]
fn placeholders_resolve(context: PipelineContext, #[case] template: &str, #[case] expected: &str) {
    let resolved = TemplateEngine::new().resolve(template, &context).expect("resolve");
    assert_eq!(resolved, expected);
}

#[test]
fn closing_braces_inside_string_literals_stay_in_the_action() {
    let mut context = PipelineContext::default();
    context.merge_step_output("a", map(json!({"}}": "x"})));

    let resolved = TemplateEngine::new()
        .resolve(r#"{{ step "a" "}}" }}"#, &context)
        .expect("resolve");

    assert_eq!(resolved, "x");
}

#[test]
fn integers_from_the_wire_render_without_a_fraction() {
    let output = map(json!({"row": {"id": 42, "scores": [1, 2.5]}}));
    let decoded = decode_map(&encode_map(&output).expect("encode")).expect("decode");
    let mut context = PipelineContext::default();
    context.merge_step_output("fetch", decoded);
    let engine = TemplateEngine::new();

    let path = engine
        .resolve("/users/{{ .steps.fetch.row.id }}", &context)
        .expect("resolve path");
    let scores = engine
        .resolve("{{ .steps.fetch.row.scores }}", &context)
        .expect("resolve scores");

    assert_eq!(path, "/users/42");
    assert_eq!(scores, "[1,2.5]");
}

#[rstest]
fn text_without_placeholders_is_returned_unchanged(context: PipelineContext) {
    let text = "plain } text { with braces";
    assert_eq!(TemplateEngine::new().resolve(text, &context).expect("resolve"), text);
}

#[rstest]
fn maps_resolve_recursively_and_keep_non_strings(context: PipelineContext) {
    let config = map(json!({
        "endpoint": "https://api.example.com",
        "timeout": 30,
        "user_id": "{{ .steps.fetch-user.row.id }}",
        "nested": {"headers": ["X-User: {{ .row.id }}", 5, true]}
    }));

    let resolved = TemplateEngine::new().resolve_map(&config, &context).expect("resolve");

    assert_eq!(
        serde_json::Value::Object(resolved),
        json!({
            "endpoint": "https://api.example.com",
            "timeout": 30,
            "user_id": "user-42",
            "nested": {"headers": ["X-User: user-42", 5, true]}
        })
    );
}

#[rstest]
#[case("{{ .row.id", "unterminated action")]
#[case("{{ now }}", "unsupported function")]
#[case("{{ }}", "empty action")]
#[case("{{ .bad..path }}", "invalid path")]
#[case("{{ .row.id | upper }}", "unsupported token")]
#[case("{{ (step \"a\" }}", "unbalanced parentheses")]
#[case("{{ step \"a }}", "unterminated")]
#[case("{{ index }}", "index expects a value")]
fn malformed_templates_name_the_failing_field(
    context: PipelineContext,
    #[case] template: &str,
    #[case] fragment: &str,
) {
    let config = map(json!({"target": template}));
    let error = TemplateEngine::new()
        .resolve_map(&config, &context)
        .expect_err("template must fail");
    let PluginError::Template { message } = error else {
        panic!("expected template error");
    };
    assert!(message.starts_with("field \"target\": "), "message: {message}");
    assert!(message.contains(fragment), "message: {message}");
}
