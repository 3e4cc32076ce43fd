#![allow(dead_code)]

use rusqlite::Connection;
use serde_json::{json, Value};
use std::sync::Arc;

use tessera::db::{self, Store};
use tessera::plans::{self, NewPlan};
use tessera::projects::{self, Project};
use tessera::protocol::{Handled, Router};
use tessera::telemetry::MemorySink;
use tessera::tools::{CallContext, Registry};

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    let mut conn = Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    db::schema::init_schema(&conn).unwrap();
    db::migrations::run_migrations(&mut conn).unwrap();
    conn
}

/// An in-memory store with one project.
pub fn test_store() -> (Store, Project) {
    let store = Store::in_memory().unwrap();
    let project = projects::create(&store, "acme", "Acme").unwrap();
    (store, project)
}

/// Create an idle plan with the given step descriptions. Returns the plan id.
pub fn plan_with_steps(store: &Store, project: &Project, steps: &[&str]) -> String {
    let new = NewPlan {
        steps: steps.iter().map(|s| s.to_string()).collect(),
        ..NewPlan::new("Test plan")
    };
    plans::create_plan(store, &project.id, new).unwrap().plan.id
}

/// Step numbers of a plan in claim order.
pub fn step_numbers(store: &Store, project: &Project, plan_id: &str) -> Vec<f64> {
    plans::get_plan(store, &project.id, plan_id)
        .unwrap()
        .unwrap()
        .steps
        .iter()
        .map(|s| s.step_number)
        .collect()
}

/// A router over the built-in tools, recording events in memory.
pub fn builtin_router() -> (Router, MemorySink) {
    let sink = MemorySink::default();
    let router = Router::new(Arc::new(Registry::builtin().unwrap()), Arc::new(sink.clone()));
    (router, sink)
}

/// Send a `tools/call` request and return its response envelope.
pub fn call_tool(router: &Router, ctx: &CallContext, name: &str, arguments: Value) -> Value {
    let message = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/call",
        "params": {"name": name, "arguments": arguments},
    });
    match router.handle(&message, ctx) {
        Handled::Ok(v) | Handled::Err(v) => v,
        Handled::NoResponse => panic!("request got no response"),
    }
}
