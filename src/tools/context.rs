use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use super::{list_limit, structured, CallContext, Tool, ToolResult};
use crate::records::{self, NewRecord, RecordKind};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StoreContextParams {
    #[schemars(description = "The working context to save: what you were doing, open threads, next steps")]
    pub content: String,

    #[schemars(description = "Short label for this context")]
    pub title: Option<String>,

    #[schemars(description = "Free-form tags")]
    #[serde(default)]
    pub tags: Vec<String>,

    #[schemars(description = "Optional JSON object with extra structured data")]
    pub metadata: Option<serde_json::Value>,

    #[schemars(
        description = "Context thread (cthr_...) to append a revision to. Omit to start a new thread."
    )]
    pub thread_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetContextParams {
    #[schemars(description = "Context thread id (cthr_...)")]
    pub thread_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListContextsParams {
    #[schemars(description = "Max threads to return (default 20, max 100)")]
    pub limit: Option<usize>,
}

pub fn tools() -> Vec<Tool> {
    vec![
        Tool::typed(
            "store_context",
            "Save a snapshot of working context so you or another agent can resume later. \
             Pass thread_id to revise an earlier snapshot.",
            store_context,
        ),
        Tool::typed(
            "get_context",
            "Fetch the latest revision of a context thread.",
            get_context,
        ),
        Tool::typed(
            "list_contexts",
            "List context threads in this project, newest first, latest revision only.",
            list_contexts,
        ),
    ]
}

fn store_context(params: StoreContextParams, ctx: &CallContext) -> ToolResult {
    let record = NewRecord {
        thread_id: params.thread_id,
        title: params.title,
        tags: params.tags,
        metadata: params.metadata,
        created_by: ctx.agent.clone(),
        ..NewRecord::new(RecordKind::Context, params.content)
    };
    let stored =
        records::store_record(&ctx.store, &ctx.project.id, record).map_err(|e| e.to_string())?;
    structured(&stored)
}

fn get_context(params: GetContextParams, ctx: &CallContext) -> ToolResult {
    match records::latest(&ctx.store, &ctx.project.id, &params.thread_id)
        .map_err(|e| e.to_string())?
    {
        Some(record) if record.kind == RecordKind::Context => structured(&record),
        _ => structured(&json!({ "status": "not_found", "thread_id": params.thread_id })),
    }
}

fn list_contexts(params: ListContextsParams, ctx: &CallContext) -> ToolResult {
    let found = records::list_latest(
        &ctx.store,
        &ctx.project.id,
        RecordKind::Context,
        list_limit(params.limit),
    )
    .map_err(|e| e.to_string())?;
    structured(&json!({ "count": found.len(), "records": found }))
}
