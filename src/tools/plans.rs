//! Plan tools. Thin adapters over [`crate::plans`]: every state-machine outcome is
//! returned as a structured payload with a `status` field.

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{list_limit, structured, CallContext, Tool, ToolOutput, ToolResult};
use crate::plans::{self, NewPlan, NewStep, PlanStatus, PlanTransition, StepUpdate};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreatePlanParams {
    #[schemars(description = "What the plan achieves")]
    pub title: String,

    #[schemars(description = "Longer description of the plan")]
    pub description: Option<String>,

    #[schemars(description = "Initial steps in order; numbered 1, 2, 3, ...")]
    #[serde(default)]
    pub steps: Vec<String>,

    #[schemars(description = "Free-form tags")]
    #[serde(default)]
    pub tags: Vec<String>,

    #[schemars(description = "Files the plan touches")]
    #[serde(default)]
    pub files: Vec<String>,

    #[schemars(description = "Plan thread (pthr_...) this plan revises. Omit to start a new thread.")]
    pub thread_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PlanIdParams {
    #[schemars(description = "Plan id")]
    pub plan_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListPlansParams {
    #[schemars(description = "Filter: 'idle', 'running', 'paused', 'completed' or 'failed'")]
    pub status: Option<String>,

    #[schemars(description = "Max plans to return (default 20, max 100)")]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddStepParams {
    #[schemars(description = "Plan id")]
    pub plan_id: String,

    #[schemars(description = "What the step does")]
    pub description: String,

    #[schemars(description = "Explicit sort key. Mutually exclusive with after_step.")]
    pub step_number: Option<f64>,

    #[schemars(
        description = "Insert right after the step with this number (midpoint to the next one)"
    )]
    pub after_step: Option<f64>,

    #[schemars(description = "Optional JSON object with extra structured data")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FinishStepParams {
    #[schemars(description = "Id of an in-progress step you claimed")]
    pub step_id: String,

    #[schemars(description = "Outcome text, up to 64 KiB")]
    pub result: Option<String>,

    #[schemars(description = "JSON object merged into the step's metadata")]
    pub metadata: Option<Value>,
}

pub fn tools() -> Vec<Tool> {
    vec![
        Tool::typed(
            "create_plan",
            "Create a plan with optional initial steps. Agents then claim steps one at a time.",
            create_plan,
        ),
        Tool::typed("get_plan", "A plan with its steps in claim order.", get_plan),
        Tool::typed(
            "list_plans",
            "Plans in this project, newest first, optionally filtered by status.",
            list_plans,
        ),
        Tool::typed(
            "add_step",
            "Add a pending step. Appends by default; after_step inserts between existing steps.",
            add_step,
        ),
        Tool::typed(
            "claim_next_step",
            "Claim the next pending step of a plan. Returns status 'next' with the step, or \
             'plan_locked' if another agent is working on the plan, 'plan_completed', \
             'plan_not_active' or 'not_found'.",
            claim_next_step,
        ),
        Tool::typed(
            "complete_step",
            "Mark a claimed step completed, freeing the plan for the next claim.",
            complete_step,
        ),
        Tool::typed(
            "fail_step",
            "Mark a claimed step failed. The plan becomes failed.",
            fail_step,
        ),
        Tool::typed("pause_plan", "Stop further claims on an active plan.", pause_plan),
        Tool::typed("resume_plan", "Resume a paused plan.", resume_plan),
        Tool::typed("delete_plan", "Delete a plan and all its steps.", delete_plan),
    ]
}

fn create_plan(params: CreatePlanParams, ctx: &CallContext) -> ToolResult {
    let new = NewPlan {
        description: params.description,
        steps: params.steps,
        tags: params.tags,
        files: params.files,
        thread_id: params.thread_id,
        created_by: ctx.agent.clone(),
        ..NewPlan::new(params.title)
    };
    let detail = plans::create_plan(&ctx.store, &ctx.project.id, new).map_err(|e| e.to_string())?;
    structured(&detail)
}

fn get_plan(params: PlanIdParams, ctx: &CallContext) -> ToolResult {
    match plans::get_plan(&ctx.store, &ctx.project.id, &params.plan_id).map_err(|e| e.to_string())? {
        Some(detail) => structured(&detail),
        None => not_found(&params.plan_id),
    }
}

fn list_plans(params: ListPlansParams, ctx: &CallContext) -> ToolResult {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<PlanStatus>)
        .transpose()?;
    let found = plans::list_plans(&ctx.store, &ctx.project.id, status, list_limit(params.limit))
        .map_err(|e| e.to_string())?;
    structured(&json!({ "count": found.len(), "plans": found }))
}

fn add_step(params: AddStepParams, ctx: &CallContext) -> ToolResult {
    let new = NewStep {
        step_number: params.step_number,
        after_step: params.after_step,
        metadata: params.metadata,
        created_by: ctx.agent.clone(),
        ..NewStep::new(params.description)
    };
    let outcome = plans::add_step(&ctx.store, &ctx.project.id, &params.plan_id, new)
        .map_err(|e| e.to_string())?;
    structured(&outcome)
}

fn claim_next_step(params: PlanIdParams, ctx: &CallContext) -> ToolResult {
    let outcome = plans::claim_next_step(&ctx.store, &ctx.project.id, &params.plan_id)
        .map_err(|e| e.to_string())?;
    structured(&outcome)
}

fn complete_step(params: FinishStepParams, ctx: &CallContext) -> ToolResult {
    let update = StepUpdate {
        result: params.result,
        metadata: params.metadata,
    };
    let outcome = plans::complete_step(&ctx.store, &ctx.project.id, &params.step_id, update)
        .map_err(|e| e.to_string())?;
    structured(&outcome)
}

fn fail_step(params: FinishStepParams, ctx: &CallContext) -> ToolResult {
    let update = StepUpdate {
        result: params.result,
        metadata: params.metadata,
    };
    let outcome = plans::fail_step(&ctx.store, &ctx.project.id, &params.step_id, update)
        .map_err(|e| e.to_string())?;
    structured(&outcome)
}

fn pause_plan(params: PlanIdParams, ctx: &CallContext) -> ToolResult {
    transition(plans::pause_plan(&ctx.store, &ctx.project.id, &params.plan_id))
}

fn resume_plan(params: PlanIdParams, ctx: &CallContext) -> ToolResult {
    transition(plans::resume_plan(&ctx.store, &ctx.project.id, &params.plan_id))
}

fn delete_plan(params: PlanIdParams, ctx: &CallContext) -> ToolResult {
    if plans::delete_plan(&ctx.store, &ctx.project.id, &params.plan_id)
        .map_err(|e| e.to_string())?
    {
        Ok(ToolOutput::Text(format!("Deleted plan {}", params.plan_id)))
    } else {
        not_found(&params.plan_id)
    }
}

fn transition(result: Result<PlanTransition, plans::EngineError>) -> ToolResult {
    structured(&result.map_err(|e| e.to_string())?)
}

fn not_found(plan_id: &str) -> ToolResult {
    structured(&json!({ "status": "not_found", "plan_id": plan_id }))
}
