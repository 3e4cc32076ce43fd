//! Plans: ordered step lists that many agents work through one step at a time.
//!
//! - [`engine`]: the claim protocol and step transitions (the only place that
//!   enforces cross-agent mutual exclusion)
//! - [`store`]: plan lifecycle: create, read, list, pause/resume, delete, reset
//!
//! Plan states: `idle → running` on claim, back to `idle` when a step completes,
//! `completed` once every step is, `failed` as soon as any step fails.
//! `paused` plans are skipped by claims until resumed.

pub mod engine;
pub mod store;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use engine::{
    add_step, claim_next_step, complete_step, fail_step, ClaimOutcome, NewStep, StepInsert,
    StepOutcome, StepUpdate,
};
pub use store::{
    create_plan, delete_plan, get_plan, list_plans, pause_plan, reset_plan, resume_plan, NewPlan,
    PlanTransition,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Idle and running plans accept claims; the others do not.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Idle | Self::Running)
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PlanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown plan status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown step status: {s}")),
        }
    }
}

/// A plan row, matching the `plans` table.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub id: String,
    pub project_id: String,
    pub thread_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: PlanStatus,
    pub tags: Vec<String>,
    pub files: Vec<String>,
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A step row, matching the `plan_steps` table.
#[derive(Debug, Clone, Serialize)]
pub struct PlanStep {
    pub id: String,
    pub plan_id: String,
    /// Sort key. Not necessarily contiguous; ties fall back to insertion order.
    pub step_number: f64,
    pub description: String,
    pub status: StepStatus,
    pub result: Option<String>,
    pub created_by: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

/// A plan with its steps in claim order.
#[derive(Debug, Clone, Serialize)]
pub struct PlanDetail {
    #[serde(flatten)]
    pub plan: Plan,
    pub steps: Vec<PlanStep>,
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad field values. Distinct from state-machine outcomes, which are never errors.
    #[error("{0}")]
    Validation(String),
    /// The store failed mid-operation; the transaction was rolled back and the call can be retried.
    #[error("coordination failure: {0}")]
    Coordination(#[from] rusqlite::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub(crate) fn status_from_sql<T: std::str::FromStr<Err = String>>(
    idx: usize,
    value: String,
) -> rusqlite::Result<T> {
    value.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

pub(crate) const STEP_COLUMNS: &str =
    "id, plan_id, step_number, description, status, result, created_by, metadata, created_at, updated_at";

pub(crate) fn row_to_step(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlanStep> {
    let metadata: String = row.get(7)?;
    Ok(PlanStep {
        id: row.get(0)?,
        plan_id: row.get(1)?,
        step_number: row.get(2)?,
        description: row.get(3)?,
        status: status_from_sql(4, row.get(4)?)?,
        result: row.get(5)?,
        created_by: row.get(6)?,
        metadata: serde_json::from_str(&metadata).unwrap_or_else(|_| serde_json::json!({})),
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}
