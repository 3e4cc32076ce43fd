//! Cross-kind lookups over record threads.

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use super::{list_limit, structured, CallContext, Tool, ToolResult};
use crate::records::{self, RecordKind};
use crate::thread;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchRecordsParams {
    #[schemars(description = "Text to look for in titles and bodies (case-insensitive substring)")]
    pub query: String,

    #[schemars(description = "Restrict to one kind: 'insight', 'decision' or 'context'")]
    pub kind: Option<String>,

    #[schemars(description = "Max results (default 20, max 100)")]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ThreadHistoryParams {
    #[schemars(description = "Record thread id (dthr_, ithr_ or cthr_ prefix)")]
    pub thread_id: String,
}

pub fn tools() -> Vec<Tool> {
    vec![
        Tool::typed(
            "search_records",
            "Search the latest revision of every insight, decision and context in this project.",
            search_records,
        ),
        Tool::typed(
            "thread_history",
            "Every revision of a record thread, oldest first.",
            thread_history,
        ),
    ]
}

fn search_records(params: SearchRecordsParams, ctx: &CallContext) -> ToolResult {
    let kind = params
        .kind
        .as_deref()
        .map(str::parse::<RecordKind>)
        .transpose()?;
    let hits = records::search(
        &ctx.store,
        &ctx.project.id,
        &params.query,
        kind,
        list_limit(params.limit),
    )
    .map_err(|e| e.to_string())?;
    structured(&json!({ "count": hits.len(), "records": hits }))
}

fn thread_history(params: ThreadHistoryParams, ctx: &CallContext) -> ToolResult {
    if !thread::valid(&params.thread_id) {
        return Err(format!("malformed thread id: {:?}", params.thread_id));
    }
    let revisions = records::history(&ctx.store, &ctx.project.id, &params.thread_id)
        .map_err(|e| e.to_string())?;
    if revisions.is_empty() {
        return structured(&json!({ "status": "not_found", "thread_id": params.thread_id }));
    }
    structured(&json!({
        "thread_id": params.thread_id,
        "revisions": revisions,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::projects;
    use crate::records::NewRecord;
    use crate::tools::Registry;

    fn setup() -> (Registry, CallContext) {
        let store = Store::in_memory().unwrap();
        let project = projects::create(&store, "threads", "Threads").unwrap();
        (
            Registry::new(vec![tools()]).unwrap(),
            CallContext::new(store, project, None),
        )
    }

    #[test]
    fn search_filters_by_kind() {
        let (registry, ctx) = setup();
        let pid = ctx.project.id.clone();
        records::store_record(&ctx.store, &pid, NewRecord::new(RecordKind::Insight, "WAL helps readers")).unwrap();
        records::store_record(&ctx.store, &pid, NewRecord::new(RecordKind::Decision, "Enable WAL")).unwrap();

        let all = registry.call("search_records", &json!({"query": "wal"}), &ctx).unwrap();
        assert_eq!(all["count"], 2);

        let decisions = registry
            .call("search_records", &json!({"query": "wal", "kind": "decision"}), &ctx)
            .unwrap();
        assert_eq!(decisions["count"], 1);
        assert_eq!(decisions["records"][0]["kind"], "decision");

        assert!(registry
            .call("search_records", &json!({"query": "wal", "kind": "memo"}), &ctx)
            .is_err());
    }

    #[test]
    fn history_lists_revisions_in_order() {
        let (registry, ctx) = setup();
        let pid = ctx.project.id.clone();
        let first = records::store_record(&ctx.store, &pid, NewRecord::new(RecordKind::Context, "v1")).unwrap();
        let mut next = NewRecord::new(RecordKind::Context, "v2");
        next.thread_id = Some(first.thread_id.clone());
        records::store_record(&ctx.store, &pid, next).unwrap();

        let out = registry
            .call("thread_history", &json!({"thread_id": first.thread_id}), &ctx)
            .unwrap();
        let bodies: Vec<&str> = out["revisions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["body"].as_str().unwrap())
            .collect();
        assert_eq!(bodies, vec!["v1", "v2"]);
    }

    #[test]
    fn history_of_unknown_or_malformed_thread() {
        let (registry, ctx) = setup();
        let out = registry
            .call("thread_history", &json!({"thread_id": "ithr_AAAAAAAAAAAA"}), &ctx)
            .unwrap();
        assert_eq!(out["status"], "not_found");
        assert!(registry
            .call("thread_history", &json!({"thread_id": "nope"}), &ctx)
            .is_err());
    }
}
