//! Tests for the remote proxies.

use std::sync::Arc;

use mockall::predicate::eq;
use rstest::rstest;
use serde_json::json;

use wflow_plugin_protocol::RpcError;
use wflow_plugin_protocol::messages::{ErrorResponse, HandleResponse};

use super::*;
use crate::error::ErrorLayer;
use crate::stub::tests::{MockPluginService, map};
use crate::stub::{ServiceReply, StepReply};

fn handle(value: &str) -> HandleResponse {
    HandleResponse {
        handle: value.to_owned(),
        error: String::new(),
    }
}

fn step_with(mock: MockPluginService, config: serde_json::Value) -> RemoteStep {
    let stub: Arc<dyn PluginService> = Arc::new(mock);
    RemoteStep::create(stub, "http.call", "call-api", &map(config)).expect("create step")
}

#[test]
fn static_configuration_is_sent_unchanged() {
    let config = json!({"endpoint": "https://api.example.com", "timeout": 30});
    let expected = map(config.clone());
    let mut mock = MockPluginService::new();
    mock.expect_create_step().returning(|_, _, _| Ok(handle("s-1")));
    mock.expect_execute_step()
        .withf(move |invocation| invocation.handle == "s-1" && invocation.config == expected)
        .times(1)
        .returning(|_| {
            Ok(StepReply {
                output: map(json!({"status": 200})),
                stop_pipeline: false,
                error: String::new(),
            })
        });
    let step = step_with(mock, config);

    let result = step
        .execute(&PipelineContext::default())
        .expect("execute");

    assert_eq!(result.output, map(json!({"status": 200})));
    assert!(!result.stop_pipeline);
}

#[test]
fn placeholders_resolve_against_the_live_context() {
    let mut mock = MockPluginService::new();
    mock.expect_create_step().returning(|_, _, _| Ok(handle("s-1")));
    mock.expect_execute_step()
        .withf(|invocation| {
            invocation.config.get("user_id") == Some(&json!("user-42"))
                && invocation.config.get("retries") == Some(&json!(2))
        })
        .times(1)
        .returning(|_| Ok(StepReply::default()));
    let step = step_with(
        mock,
        json!({"user_id": "{{ .steps.fetch-user.row.id }}", "retries": 2}),
    );
    let mut context = PipelineContext::default();
    context.merge_step_output("fetch-user", map(json!({"row": {"id": "user-42"}})));

    step.execute(&context).expect("execute");
}

#[test]
fn step_errors_are_split_by_layer() {
    let mut mock = MockPluginService::new();
    mock.expect_create_step().returning(|_, _, _| Ok(handle("s-1")));
    let mut calls = 0;
    mock.expect_execute_step().times(2).returning(move |_| {
        calls += 1;
        if calls == 1 {
            Err(RpcError::Closed)
        } else {
            Ok(StepReply {
                error: String::from("upstream returned 502"),
                ..StepReply::default()
            })
        }
    });
    let step = step_with(mock, json!({}));
    let context = PipelineContext::default();

    let transport = step.execute(&context).expect_err("transport failure");
    let application = step.execute(&context).expect_err("application failure");

    assert_eq!(transport.layer(), ErrorLayer::Transport);
    assert_eq!(application.layer(), ErrorLayer::Application);
    assert_eq!(
        application.to_string(),
        "ExecuteStep on handle s-1 failed: upstream returned 502"
    );
}

#[test]
fn malformed_templates_fail_before_dispatch() {
    let mut mock = MockPluginService::new();
    mock.expect_create_step().returning(|_, _, _| Ok(handle("s-1")));
    mock.expect_execute_step().never();
    let step = step_with(mock, json!({"url": "{{ .broken"}));

    let error = step
        .execute(&PipelineContext::default())
        .expect_err("template failure");
    assert!(matches!(error, PluginError::Template { .. }));
}

#[rstest]
#[case(Err(RpcError::Closed), ErrorLayer::Transport)]
#[case(Ok(HandleResponse { handle: String::new(), error: String::from("unknown type") }), ErrorLayer::Application)]
#[case(Ok(HandleResponse::default()), ErrorLayer::Application)]
fn failed_creation_builds_no_proxy(
    #[case] reply: Result<HandleResponse, RpcError>,
    #[case] layer: ErrorLayer,
) {
    let mut mock = MockPluginService::new();
    mock.expect_create_module()
        .return_once(move |_, _, _| reply);
    let stub: Arc<dyn PluginService> = Arc::new(mock);

    let error = RemoteModule::create(stub, "cache.memory", "cache", &ValueMap::new())
        .expect_err("create must fail");
    assert_eq!(error.layer(), layer);
}

#[test]
fn module_lifecycle_issues_one_call_per_method() {
    let mut mock = MockPluginService::new();
    mock.expect_create_module()
        .with(eq("cache.memory"), eq("cache"), eq(ValueMap::new()))
        .returning(|_, _, _| Ok(handle("m-1")));
    mock.expect_init_module()
        .with(eq("m-1"))
        .times(1)
        .returning(|_| Ok(ErrorResponse::ok()));
    mock.expect_start_module()
        .with(eq("m-1"))
        .times(1)
        .returning(|_| Ok(ErrorResponse::ok()));
    mock.expect_stop_module()
        .with(eq("m-1"))
        .times(1)
        .returning(|_| Ok(ErrorResponse::failed("still draining")));
    mock.expect_destroy_module()
        .with(eq("m-1"))
        .times(1)
        .returning(|_| Err(RpcError::Closed));
    let stub: Arc<dyn PluginService> = Arc::new(mock);
    let module = RemoteModule::create(stub, "cache.memory", "cache", &ValueMap::new())
        .expect("create module");

    module.init().expect("init");
    module.start().expect("start");
    let stop = module.stop().expect_err("stop fails");
    let destroy = module.destroy().expect_err("destroy fails");

    assert_eq!(module.name(), "cache");
    assert_eq!(module.handle(), "m-1");
    assert_eq!(stop.to_string(), "StopModule on handle m-1 failed: still draining");
    assert_eq!(destroy.layer(), ErrorLayer::Transport);
}

#[test]
fn module_services_return_results_or_errors() {
    let mut mock = MockPluginService::new();
    mock.expect_create_module().returning(|_, _, _| Ok(handle("m-1")));
    mock.expect_invoke_service()
        .returning(|_, method, _| match method {
            "get" => Ok(ServiceReply {
                result: map(json!({"value": "v"})),
                error: String::new(),
            }),
            _ => Ok(ServiceReply {
                result: ValueMap::new(),
                error: format!("unknown method {method}"),
            }),
        });
    let stub: Arc<dyn PluginService> = Arc::new(mock);
    let module = RemoteModule::create(stub, "cache.memory", "cache", &ValueMap::new())
        .expect("create module");

    let result = module.invoke("get", &map(json!({"key": "k"}))).expect("get");
    let error = module.invoke("drop", &ValueMap::new()).expect_err("drop");

    assert_eq!(result, map(json!({"value": "v"})));
    assert_eq!(error.layer(), ErrorLayer::Application);
}

#[test]
fn triggers_map_onto_module_calls() {
    let mut mock = MockPluginService::new();
    mock.expect_create_module().returning(|_, _, _| Ok(handle("t-1")));
    mock.expect_init_module()
        .with(eq("t-1"))
        .times(1)
        .returning(|_| Ok(ErrorResponse::ok()));
    mock.expect_start_module()
        .times(1)
        .returning(|_| Ok(ErrorResponse::ok()));
    mock.expect_stop_module()
        .times(1)
        .returning(|_| Ok(ErrorResponse::ok()));
    mock.expect_destroy_module()
        .times(1)
        .returning(|_| Ok(ErrorResponse::ok()));
    let stub: Arc<dyn PluginService> = Arc::new(mock);
    let trigger = RemoteTrigger::create(stub, "echo.trigger", "ticker", &ValueMap::new())
        .expect("create trigger");

    trigger.configure().expect("configure");
    trigger.start().expect("start");
    trigger.stop().expect("stop");
    trigger.destroy().expect("destroy");
    assert_eq!(Trigger::name(&trigger), "ticker");
    assert_eq!(trigger.handle(), "t-1");
}
