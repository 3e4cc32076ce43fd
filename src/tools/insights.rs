use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use super::{list_limit, structured, CallContext, Tool, ToolResult};
use crate::records::{self, NewRecord, RecordKind};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RecordInsightParams {
    #[schemars(description = "What was learned")]
    pub content: String,

    #[schemars(description = "Short label for the insight")]
    pub title: Option<String>,

    #[schemars(description = "Free-form tags")]
    #[serde(default)]
    pub tags: Vec<String>,

    #[schemars(description = "Optional JSON object with extra structured data")]
    pub metadata: Option<serde_json::Value>,

    #[schemars(description = "Insight thread (ithr_...) to revise. Omit to start a new one.")]
    pub thread_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListInsightsParams {
    #[schemars(description = "Max insights to return (default 20, max 100)")]
    pub limit: Option<usize>,
}

pub fn tools() -> Vec<Tool> {
    vec![
        Tool::typed(
            "record_insight",
            "Record something learned while working so other agents can find it.",
            record_insight,
        ),
        Tool::typed(
            "list_insights",
            "List insights in this project, newest first, latest revision only.",
            list_insights,
        ),
    ]
}

fn record_insight(params: RecordInsightParams, ctx: &CallContext) -> ToolResult {
    let record = NewRecord {
        thread_id: params.thread_id,
        title: params.title,
        tags: params.tags,
        metadata: params.metadata,
        created_by: ctx.agent.clone(),
        ..NewRecord::new(RecordKind::Insight, params.content)
    };
    let stored =
        records::store_record(&ctx.store, &ctx.project.id, record).map_err(|e| e.to_string())?;
    structured(&stored)
}

fn list_insights(params: ListInsightsParams, ctx: &CallContext) -> ToolResult {
    let found = records::list_latest(
        &ctx.store,
        &ctx.project.id,
        RecordKind::Insight,
        list_limit(params.limit),
    )
    .map_err(|e| e.to_string())?;
    structured(&json!({ "count": found.len(), "records": found }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::projects;
    use crate::tools::Registry;

    #[test]
    fn record_then_list() {
        let store = Store::in_memory().unwrap();
        let project = projects::create(&store, "learn", "Learning").unwrap();
        let ctx = CallContext::new(store, project, Some("agent-b".into()));
        let registry = Registry::new(vec![tools()]).unwrap();

        for text in ["cache misses on cold start", "retry budget too low"] {
            registry
                .call("record_insight", &json!({"content": text, "tags": ["perf"]}), &ctx)
                .unwrap();
        }

        let listed = registry
            .call("list_insights", &json!({"limit": 1}), &ctx)
            .unwrap();
        assert_eq!(listed["count"], 1);
        assert_eq!(listed["records"][0]["body"], "retry budget too low");
        assert_eq!(listed["records"][0]["tags"], json!(["perf"]));
    }
}
