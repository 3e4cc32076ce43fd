//! Plan lifecycle outside the claim protocol.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::engine::{insert_step, plan_status, set_plan_status};
use super::{
    row_to_step, status_from_sql, EngineError, Plan, PlanDetail, PlanStatus, STEP_COLUMNS,
};
use crate::db::{self, Store};
use crate::thread::ThreadKind;

const PLAN_COLUMNS: &str =
    "id, project_id, thread_id, title, description, status, tags, files, created_by, created_at, updated_at";

#[derive(Debug, Clone, Default)]
pub struct NewPlan {
    pub title: String,
    pub description: Option<String>,
    /// Initial steps, numbered 1.0, 2.0, ... in the given order.
    pub steps: Vec<String>,
    pub tags: Vec<String>,
    pub files: Vec<String>,
    /// Earlier plan this one revises; `None` starts a new thread.
    pub thread_id: Option<String>,
    pub created_by: Option<String>,
}

impl NewPlan {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Outcome of an explicit plan status change.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PlanTransition {
    Updated { plan: Plan },
    InvalidState { plan_status: PlanStatus },
    NotFound,
}

/// Create an idle plan with its initial steps in one transaction.
pub fn create_plan(
    store: &Store,
    project_id: &str,
    new: NewPlan,
) -> Result<PlanDetail, EngineError> {
    let title = new.title.trim().to_string();
    if title.is_empty() {
        return Err(EngineError::Validation("title must not be empty".into()));
    }
    if new.steps.iter().any(|s| s.trim().is_empty()) {
        return Err(EngineError::Validation(
            "step descriptions must not be empty".into(),
        ));
    }

    let mut conn = store.conn();
    let tx = conn.transaction()?;

    let thread_id = match new.thread_id {
        Some(thread_id) => {
            if !ThreadKind::Plan.owns(&thread_id) {
                return Err(EngineError::Validation(format!(
                    "thread_id {thread_id:?} is not a plan thread"
                )));
            }
            let known: bool = tx.query_row(
                "SELECT COUNT(*) > 0 FROM plans WHERE project_id = ?1 AND thread_id = ?2",
                params![project_id, thread_id],
                |row| row.get(0),
            )?;
            if !known {
                return Err(EngineError::Validation(format!(
                    "unknown plan thread: {thread_id}"
                )));
            }
            thread_id
        }
        None => ThreadKind::Plan.generate(),
    };

    let now = db::now();
    let plan = Plan {
        id: uuid::Uuid::now_v7().to_string(),
        project_id: project_id.to_string(),
        thread_id,
        title,
        description: new.description.filter(|d| !d.trim().is_empty()),
        status: PlanStatus::Idle,
        tags: new.tags,
        files: new.files,
        created_by: new.created_by,
        created_at: now.clone(),
        updated_at: now,
    };
    tx.execute(
        "INSERT INTO plans (id, project_id, thread_id, title, description, status, tags, files, created_by, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, 'idle', ?6, ?7, ?8, ?9, ?10)",
        params![
            plan.id,
            plan.project_id,
            plan.thread_id,
            plan.title,
            plan.description,
            serde_json::to_string(&plan.tags)?,
            serde_json::to_string(&plan.files)?,
            plan.created_by,
            plan.created_at,
            plan.updated_at,
        ],
    )?;

    let empty = serde_json::json!({});
    let mut steps = Vec::with_capacity(new.steps.len());
    for (i, description) in new.steps.iter().enumerate() {
        steps.push(insert_step(
            &tx,
            &plan.id,
            (i + 1) as f64,
            description.trim(),
            &empty,
            plan.created_by.as_deref(),
        )?);
    }
    tx.commit()?;

    tracing::info!(plan_id = %plan.id, thread_id = %plan.thread_id, steps = steps.len(), "plan created");
    Ok(PlanDetail { plan, steps })
}

/// A plan with its steps in claim order.
pub fn get_plan(
    store: &Store,
    project_id: &str,
    plan_id: &str,
) -> Result<Option<PlanDetail>, EngineError> {
    let conn = store.conn();
    let Some(plan) = load_plan(&conn, project_id, plan_id)? else {
        return Ok(None);
    };
    let sql = format!(
        "SELECT {STEP_COLUMNS} FROM plan_steps WHERE plan_id = ?1 ORDER BY step_number ASC, seq ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let steps = stmt
        .query_map(params![plan_id], row_to_step)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(PlanDetail { plan, steps }))
}

/// Up to `limit` plans in a project, newest first, optionally filtered by status.
pub fn list_plans(
    store: &Store,
    project_id: &str,
    status: Option<PlanStatus>,
    limit: usize,
) -> Result<Vec<Plan>, EngineError> {
    let conn = store.conn();
    let sql = format!(
        "SELECT {PLAN_COLUMNS} FROM plans WHERE project_id = ?1 AND (?2 IS NULL OR status = ?2) \
         ORDER BY created_at DESC, id DESC LIMIT ?3"
    );
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(&sql)?;
    let plans = stmt
        .query_map(params![project_id, status.map(|s| s.as_str()), limit], row_to_plan)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(plans)
}

/// Stop claims on an active plan. A step already in progress may still finish.
pub fn pause_plan(
    store: &Store,
    project_id: &str,
    plan_id: &str,
) -> Result<PlanTransition, EngineError> {
    transition(store, project_id, plan_id, PlanStatus::Paused, |s| s.is_active())
}

/// Return a paused plan to `idle`.
pub fn resume_plan(
    store: &Store,
    project_id: &str,
    plan_id: &str,
) -> Result<PlanTransition, EngineError> {
    transition(store, project_id, plan_id, PlanStatus::Idle, |s| {
        s == PlanStatus::Paused
    })
}

/// Operator reset of a failed plan: failed steps go back to pending, plan to `idle`.
pub fn reset_plan(
    store: &Store,
    project_id: &str,
    plan_id: &str,
) -> Result<PlanTransition, EngineError> {
    let mut conn = store.conn();
    let tx = conn.transaction()?;
    let Some(status) = plan_status(&tx, project_id, plan_id)? else {
        return Ok(PlanTransition::NotFound);
    };
    if status != PlanStatus::Failed {
        return Ok(PlanTransition::InvalidState {
            plan_status: status,
        });
    }
    let now = db::now();
    let reset = tx.execute(
        "UPDATE plan_steps SET status = 'pending', updated_at = ?1 WHERE plan_id = ?2 AND status = 'failed'",
        params![now, plan_id],
    )?;
    set_plan_status(&tx, plan_id, PlanStatus::Idle, &now)?;
    let plan = load_plan(&tx, project_id, plan_id)?;
    tx.commit()?;

    tracing::warn!(plan_id, steps_reset = reset, "failed plan reset");
    Ok(plan.map_or(PlanTransition::NotFound, |plan| PlanTransition::Updated { plan }))
}

/// Delete a plan and, through the foreign key, its steps.
pub fn delete_plan(store: &Store, project_id: &str, plan_id: &str) -> Result<bool, EngineError> {
    let conn = store.conn();
    let rows = conn.execute(
        "DELETE FROM plans WHERE id = ?1 AND project_id = ?2",
        params![plan_id, project_id],
    )?;
    if rows > 0 {
        tracing::info!(plan_id, "plan deleted");
    }
    Ok(rows > 0)
}

fn transition(
    store: &Store,
    project_id: &str,
    plan_id: &str,
    to: PlanStatus,
    allowed: impl Fn(PlanStatus) -> bool,
) -> Result<PlanTransition, EngineError> {
    let mut conn = store.conn();
    let tx = conn.transaction()?;
    let Some(status) = plan_status(&tx, project_id, plan_id)? else {
        return Ok(PlanTransition::NotFound);
    };
    if !allowed(status) {
        return Ok(PlanTransition::InvalidState {
            plan_status: status,
        });
    }
    set_plan_status(&tx, plan_id, to, &db::now())?;
    let plan = load_plan(&tx, project_id, plan_id)?;
    tx.commit()?;

    tracing::info!(plan_id, from = %status, to = %to, "plan status changed");
    Ok(plan.map_or(PlanTransition::NotFound, |plan| PlanTransition::Updated { plan }))
}

fn load_plan(conn: &Connection, project_id: &str, plan_id: &str) -> rusqlite::Result<Option<Plan>> {
    let sql = format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = ?1 AND project_id = ?2");
    conn.query_row(&sql, params![plan_id, project_id], row_to_plan)
        .optional()
}

fn row_to_plan(row: &rusqlite::Row<'_>) -> rusqlite::Result<Plan> {
    let tags: String = row.get(6)?;
    let files: String = row.get(7)?;
    Ok(Plan {
        id: row.get(0)?,
        project_id: row.get(1)?,
        thread_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        status: status_from_sql(5, row.get(5)?)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        files: serde_json::from_str(&files).unwrap_or_default(),
        created_by: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}
