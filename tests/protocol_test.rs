mod helpers;

use serde_json::{json, Value};
use tessera::protocol::{Handled, PROTOCOL_VERSION};
use tessera::tools::CallContext;

fn ctx() -> CallContext {
    let (store, project) = helpers::test_store();
    CallContext::new(store, project, Some("agent-x".into()))
}

#[test]
fn initialize_then_list_tools() {
    let (router, _) = helpers::builtin_router();
    let ctx = ctx();

    let init = router.handle(
        &json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": {"protocolVersion": PROTOCOL_VERSION}
        }),
        &ctx,
    );
    let Handled::Ok(init) = init else {
        panic!("initialize failed: {init:?}");
    };
    assert_eq!(init["result"]["protocolVersion"], PROTOCOL_VERSION);
    assert_eq!(init["result"]["project"]["slug"], "acme");

    let Handled::Ok(list) = router.handle(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}), &ctx) else {
        panic!("tools/list failed");
    };
    let names: Vec<&str> = list["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    for expected in ["store_context", "record_decision", "record_insight", "search_records", "claim_next_step"] {
        assert!(names.contains(&expected), "missing {expected}");
    }
    assert!(list["result"]["tools"][0]["inputSchema"].is_object());
}

#[test]
fn plan_workflow_over_json_rpc() {
    let (router, sink) = helpers::builtin_router();
    let ctx = ctx();

    let created = helpers::call_tool(&router, &ctx, "create_plan", json!({"title": "Release", "steps": ["tag", "publish"]}));
    let plan_id = created["result"]["id"].as_str().unwrap().to_string();
    assert_eq!(created["result"]["created_by"], "agent-x");

    let claimed = helpers::call_tool(&router, &ctx, "claim_next_step", json!({"plan_id": plan_id}));
    assert_eq!(claimed["result"]["status"], "next");
    let step_id = claimed["result"]["step"]["id"].clone();

    let locked = helpers::call_tool(&router, &ctx, "claim_next_step", json!({"plan_id": plan_id}));
    assert_eq!(locked["result"]["status"], "plan_locked");

    let done = helpers::call_tool(&router, &ctx, "complete_step", json!({"step_id": step_id}));
    assert_eq!(done["result"]["plan_status"], "idle");

    let not_in_progress = helpers::call_tool(&router, &ctx, "complete_step", json!({"step_id": step_id}));
    assert_eq!(not_in_progress["result"]["status"], "step_not_in_progress");

    let events = sink.events();
    assert_eq!(events.len(), 5);
    assert!(events.iter().all(|e| e.method == "tools/call" && e.ok));
    assert_eq!(events[1].tool.as_deref(), Some("claim_next_step"));
}

#[test]
fn tool_failures_map_to_error_codes() {
    let (router, sink) = helpers::builtin_router();
    let ctx = ctx();

    let unknown = helpers::call_tool(&router, &ctx, "no_such_tool", json!({}));
    assert_eq!(unknown["error"]["code"], -32601);

    let invalid = helpers::call_tool(&router, &ctx, "record_insight", json!({"content": ""}));
    assert_eq!(invalid["error"]["code"], -32603);
    assert!(invalid["error"]["message"].as_str().unwrap().contains("must not be empty"));

    let bad_args = helpers::call_tool(&router, &ctx, "claim_next_step", json!({"plan": 1}));
    assert_eq!(bad_args["error"]["code"], -32603);

    assert!(sink.events().iter().all(|e| !e.ok));
}

#[test]
fn missing_arguments_is_invalid_params() {
    let (router, _) = helpers::builtin_router();
    let handled = router.handle(
        &json!({"jsonrpc": "2.0", "id": 9, "method": "tools/call", "params": {"name": "list_plans"}}),
        &ctx(),
    );
    let Handled::Err(resp) = handled else {
        panic!("expected error");
    };
    assert_eq!(resp["error"]["code"], -32602);
    assert_eq!(resp["id"], 9);
}

#[test]
fn notifications_are_not_executed() {
    let (router, _) = helpers::builtin_router();
    let ctx = ctx();
    let handled = router.handle(
        &json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {"name": "create_plan", "arguments": {"title": "ghost"}}
        }),
        &ctx,
    );
    assert_eq!(handled, Handled::NoResponse);

    let listed = helpers::call_tool(&router, &ctx, "list_plans", json!({}));
    assert_eq!(listed["result"]["count"], 0);
}

#[test]
fn string_and_null_ids_are_echoed() {
    let (router, _) = helpers::builtin_router();
    let ctx = ctx();
    for id in [json!("abc"), Value::Null] {
        let handled = router.handle(&json!({"jsonrpc": "2.0", "id": id.clone(), "method": "ping"}), &ctx);
        assert_eq!(handled.into_response().unwrap()["id"], id);
    }
}
