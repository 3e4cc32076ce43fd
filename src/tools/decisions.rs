use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{list_limit, structured, CallContext, Tool, ToolResult};
use crate::records::{self, NewRecord, RecordKind};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RecordDecisionParams {
    #[schemars(description = "The decision that was made")]
    pub decision: String,

    #[schemars(description = "Why it was made; stored in metadata.rationale")]
    pub rationale: Option<String>,

    #[schemars(description = "Short label for the decision")]
    pub title: Option<String>,

    #[schemars(description = "Free-form tags")]
    #[serde(default)]
    pub tags: Vec<String>,

    #[schemars(description = "Optional JSON object with extra structured data")]
    pub metadata: Option<Value>,

    #[schemars(
        description = "Decision thread (dthr_...) this supersedes. Omit to record a new decision."
    )]
    pub thread_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListDecisionsParams {
    #[schemars(description = "Max decisions to return (default 20, max 100)")]
    pub limit: Option<usize>,
}

pub fn tools() -> Vec<Tool> {
    vec![
        Tool::typed(
            "record_decision",
            "Record a decision and its rationale. Revising an earlier decision keeps its history \
             under the same thread.",
            record_decision,
        ),
        Tool::typed(
            "list_decisions",
            "List current decisions in this project, newest first.",
            list_decisions,
        ),
    ]
}

fn record_decision(params: RecordDecisionParams, ctx: &CallContext) -> ToolResult {
    let metadata = with_rationale(params.metadata, params.rationale)?;
    let record = NewRecord {
        thread_id: params.thread_id,
        title: params.title,
        tags: params.tags,
        metadata,
        created_by: ctx.agent.clone(),
        ..NewRecord::new(RecordKind::Decision, params.decision)
    };
    let stored =
        records::store_record(&ctx.store, &ctx.project.id, record).map_err(|e| e.to_string())?;
    structured(&stored)
}

fn list_decisions(params: ListDecisionsParams, ctx: &CallContext) -> ToolResult {
    let found = records::list_latest(
        &ctx.store,
        &ctx.project.id,
        RecordKind::Decision,
        list_limit(params.limit),
    )
    .map_err(|e| e.to_string())?;
    structured(&json!({ "count": found.len(), "records": found }))
}

fn with_rationale(metadata: Option<Value>, rationale: Option<String>) -> Result<Option<Value>, String> {
    let Some(rationale) = rationale.filter(|r| !r.trim().is_empty()) else {
        return Ok(metadata);
    };
    let mut metadata = metadata.unwrap_or_else(|| json!({}));
    let Some(map) = metadata.as_object_mut() else {
        return Err("metadata must be a JSON object".into());
    };
    map.insert("rationale".into(), Value::String(rationale));
    Ok(Some(metadata))
}
