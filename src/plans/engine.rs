//! Claim protocol and step transitions.
//!
//! [`claim_next_step`] is the load-bearing operation: the check for an active plan,
//! the check that no sibling step is in progress, and the mark-in-progress plus
//! `idle → running` update all happen in one IMMEDIATE transaction. Concurrent claims
//! on the same plan never wait for each other: whoever fails to take the plan's row
//! lock gets [`ClaimOutcome::PlanLocked`] straight away. Across processes the row
//! lock is SQLite's write lock, taken with a zero busy timeout, so a claim that finds
//! another connection writing is skipped the same way.
//!
//! Steps have no lease. A step that is claimed and never completed or failed stays
//! `in_progress` and keeps its plan locked; expiring stale claims would go here.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use std::time::Duration;

use super::{row_to_step, status_from_sql, EngineError, PlanStatus, PlanStep, StepStatus, STEP_COLUMNS};
use crate::db::{self, Store};

/// Upper bound on a step `result`, in bytes.
pub const MAX_RESULT_LEN: usize = 64 * 1024;

/// Result of [`claim_next_step`]. Every variant is an expected outcome, not an error.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClaimOutcome {
    /// This caller now owns the step, which is `in_progress`.
    Next { step: PlanStep },
    /// No pending steps remain, or the plan already completed.
    PlanCompleted,
    /// Another agent holds the plan; try again later.
    PlanLocked,
    /// The plan is paused or failed.
    PlanNotActive { plan_status: PlanStatus },
    NotFound,
}

/// Result of [`complete_step`] and [`fail_step`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Updated {
        step: PlanStep,
        plan_status: PlanStatus,
    },
    StepNotInProgress {
        step_status: StepStatus,
    },
    NotFound,
}

/// Result of [`add_step`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepInsert {
    Added { step: PlanStep },
    PlanNotFound,
}

/// Optional payload attached when a step finishes.
#[derive(Debug, Clone, Default)]
pub struct StepUpdate {
    pub result: Option<String>,
    /// Shallow-merged into the step's existing metadata.
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct NewStep {
    pub description: String,
    /// Explicit sort key, used as-is.
    pub step_number: Option<f64>,
    /// Insert halfway between this step number and the next one.
    pub after_step: Option<f64>,
    pub metadata: Option<serde_json::Value>,
    pub created_by: Option<String>,
}

impl NewStep {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }
}

/// Claim the first pending step of a plan for the caller.
pub fn claim_next_step(
    store: &Store,
    project_id: &str,
    plan_id: &str,
) -> Result<ClaimOutcome, EngineError> {
    let Some(_row_lock) = store.claims().try_acquire(&format!("plan:{plan_id}")) else {
        tracing::debug!(plan_id, "claim skipped: plan locked by a concurrent claim");
        return Ok(ClaimOutcome::PlanLocked);
    };

    let mut conn = store.conn();
    conn.busy_timeout(Duration::ZERO)?;
    let outcome = claim_in_transaction(&mut conn, project_id, plan_id);
    conn.busy_timeout(db::BUSY_TIMEOUT)?;
    outcome
}

fn claim_in_transaction(
    conn: &mut Connection,
    project_id: &str,
    plan_id: &str,
) -> Result<ClaimOutcome, EngineError> {
    let tx = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
        Ok(tx) => tx,
        Err(e) if is_busy(&e) => {
            tracing::debug!(plan_id, "claim skipped: database locked by another connection");
            return Ok(ClaimOutcome::PlanLocked);
        }
        Err(e) => return Err(e.into()),
    };
    tx.busy_timeout(db::BUSY_TIMEOUT)?;

    let Some(plan_status) = plan_status(&tx, project_id, plan_id)? else {
        return Ok(ClaimOutcome::NotFound);
    };
    match plan_status {
        PlanStatus::Completed => return Ok(ClaimOutcome::PlanCompleted),
        s if !s.is_active() => return Ok(ClaimOutcome::PlanNotActive { plan_status: s }),
        _ => {}
    }

    let in_progress: bool = tx.query_row(
        "SELECT COUNT(*) > 0 FROM plan_steps WHERE plan_id = ?1 AND status = 'in_progress'",
        params![plan_id],
        |row| row.get(0),
    )?;
    if in_progress {
        return Ok(ClaimOutcome::PlanLocked);
    }

    let sql = format!(
        "SELECT {STEP_COLUMNS} FROM plan_steps WHERE plan_id = ?1 AND status = 'pending' \
         ORDER BY step_number ASC, seq ASC LIMIT 1"
    );
    let Some(mut step) = tx.query_row(&sql, params![plan_id], row_to_step).optional()? else {
        return Ok(ClaimOutcome::PlanCompleted);
    };

    let now = db::now();
    tx.execute(
        "UPDATE plan_steps SET status = 'in_progress', updated_at = ?1 WHERE id = ?2",
        params![now, step.id],
    )?;
    if plan_status == PlanStatus::Idle {
        set_plan_status(&tx, plan_id, PlanStatus::Running, &now)?;
    }
    tx.commit()?;

    step.status = StepStatus::InProgress;
    step.updated_at = now;
    tracing::info!(plan_id, step_id = %step.id, step_number = step.step_number, "step claimed");
    Ok(ClaimOutcome::Next { step })
}

/// Mark an in-progress step completed. The plan completes when no other step is left.
pub fn complete_step(
    store: &Store,
    project_id: &str,
    step_id: &str,
    update: StepUpdate,
) -> Result<StepOutcome, EngineError> {
    finish_step(store, project_id, step_id, update, StepStatus::Completed)
}

/// Mark an in-progress step failed, which fails the whole plan.
pub fn fail_step(
    store: &Store,
    project_id: &str,
    step_id: &str,
    update: StepUpdate,
) -> Result<StepOutcome, EngineError> {
    finish_step(store, project_id, step_id, update, StepStatus::Failed)
}

fn finish_step(
    store: &Store,
    project_id: &str,
    step_id: &str,
    update: StepUpdate,
    to: StepStatus,
) -> Result<StepOutcome, EngineError> {
    validate_update(&update)?;

    let mut conn = store.conn();
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let sql = format!(
        "SELECT {cols}, p.status FROM plan_steps s JOIN plans p ON p.id = s.plan_id \
         WHERE s.id = ?1 AND p.project_id = ?2",
        cols = STEP_COLUMNS
            .split(", ")
            .map(|c| format!("s.{c}"))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let row = tx
        .query_row(&sql, params![step_id, project_id], |row| {
            Ok((row_to_step(row)?, status_from_sql::<PlanStatus>(10, row.get(10)?)?))
        })
        .optional()?;
    let Some((mut step, current_plan_status)) = row else {
        return Ok(StepOutcome::NotFound);
    };
    if step.status != StepStatus::InProgress {
        return Ok(StepOutcome::StepNotInProgress {
            step_status: step.status,
        });
    }

    if let Some(extra) = update.metadata {
        merge_metadata(&mut step.metadata, extra);
    }
    if update.result.is_some() {
        step.result = update.result;
    }

    let now = db::now();
    tx.execute(
        "UPDATE plan_steps SET status = ?1, result = ?2, metadata = ?3, updated_at = ?4 WHERE id = ?5",
        params![to.as_str(), step.result, step.metadata.to_string(), now, step.id],
    )?;

    let plan_status = match to {
        StepStatus::Failed => PlanStatus::Failed,
        _ => {
            let remaining: i64 = tx.query_row(
                "SELECT COUNT(*) FROM plan_steps WHERE plan_id = ?1 AND status != 'completed'",
                params![step.plan_id],
                |row| row.get(0),
            )?;
            if remaining == 0 {
                PlanStatus::Completed
            } else if current_plan_status == PlanStatus::Paused {
                PlanStatus::Paused
            } else {
                PlanStatus::Idle
            }
        }
    };
    set_plan_status(&tx, &step.plan_id, plan_status, &now)?;
    tx.commit()?;

    step.status = to;
    step.updated_at = now;
    tracing::info!(
        plan_id = %step.plan_id,
        step_id = %step.id,
        step_status = %step.status,
        plan_status = %plan_status,
        "step finished"
    );
    Ok(StepOutcome::Updated { step, plan_status })
}

/// Insert a pending step into a plan.
///
/// Without a position the step goes last (`max + 1`, or `1.0` in an empty plan).
/// `after_step: N` places it halfway between `N` and the next larger step number,
/// renumbering the plan first if the two are too close to split.
pub fn add_step(
    store: &Store,
    project_id: &str,
    plan_id: &str,
    new: NewStep,
) -> Result<StepInsert, EngineError> {
    let description = new.description.trim();
    if description.is_empty() {
        return Err(EngineError::Validation("description must not be empty".into()));
    }
    if new.step_number.is_some() && new.after_step.is_some() {
        return Err(EngineError::Validation(
            "pass either step_number or after_step, not both".into(),
        ));
    }
    if new.step_number.or(new.after_step).is_some_and(|n| !n.is_finite()) {
        return Err(EngineError::Validation("step numbers must be finite".into()));
    }
    let metadata = match new.metadata {
        None => serde_json::json!({}),
        Some(m) if m.is_object() => m,
        Some(_) => return Err(EngineError::Validation("metadata must be a JSON object".into())),
    };

    let mut conn = store.conn();
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let Some(status) = plan_status(&tx, project_id, plan_id)? else {
        return Ok(StepInsert::PlanNotFound);
    };

    let step_number = match (new.step_number, new.after_step) {
        (Some(explicit), _) => explicit,
        (None, Some(after)) => step_number_after(&tx, plan_id, after)?,
        (None, None) => {
            let max: Option<f64> = tx.query_row(
                "SELECT MAX(step_number) FROM plan_steps WHERE plan_id = ?1",
                params![plan_id],
                |row| row.get(0),
            )?;
            max.map_or(1.0, |m| m + 1.0)
        }
    };

    let step = insert_step(
        &tx,
        plan_id,
        step_number,
        description,
        &metadata,
        new.created_by.as_deref(),
    )?;
    if status == PlanStatus::Completed {
        set_plan_status(&tx, plan_id, PlanStatus::Idle, &step.created_at)?;
    }
    tx.commit()?;

    tracing::info!(plan_id, step_id = %step.id, step_number, "step added");
    Ok(StepInsert::Added { step })
}

/// Midpoint between `after` and the next larger step number, or `after + 1.0`.
fn step_number_after(conn: &Connection, plan_id: &str, after: f64) -> rusqlite::Result<f64> {
    let Some(next) = next_step_number(conn, plan_id, after)? else {
        return Ok(after + 1.0);
    };
    let mid = after + (next - after) / 2.0;
    if after < mid && mid < next {
        return Ok(mid);
    }

    // Floats ran out of room between the neighbours: spread the plan back out to
    // 1.0, 2.0, ... and insert after the same position.
    let position: i64 = conn.query_row(
        "SELECT COUNT(*) FROM plan_steps WHERE plan_id = ?1 AND step_number <= ?2",
        params![plan_id, after],
        |row| row.get(0),
    )?;
    renumber_steps(conn, plan_id)?;
    tracing::warn!(plan_id, after, "step numbers exhausted precision; plan renumbered");
    Ok(position as f64 + 0.5)
}

fn next_step_number(conn: &Connection, plan_id: &str, after: f64) -> rusqlite::Result<Option<f64>> {
    conn.query_row(
        "SELECT MIN(step_number) FROM plan_steps WHERE plan_id = ?1 AND step_number > ?2",
        params![plan_id, after],
        |row| row.get(0),
    )
}

/// Reassign `1.0, 2.0, ...` in current order.
pub(crate) fn renumber_steps(conn: &Connection, plan_id: &str) -> rusqlite::Result<()> {
    let ids: Vec<String> = conn
        .prepare("SELECT id FROM plan_steps WHERE plan_id = ?1 ORDER BY step_number ASC, seq ASC")?
        .query_map(params![plan_id], |row| row.get(0))?
        .collect::<Result<_, _>>()?;

    let mut update = conn.prepare("UPDATE plan_steps SET step_number = ?1 WHERE id = ?2")?;
    for (i, id) in ids.iter().enumerate() {
        update.execute(params![(i + 1) as f64, id])?;
    }
    Ok(())
}

pub(crate) fn insert_step(
    conn: &Connection,
    plan_id: &str,
    step_number: f64,
    description: &str,
    metadata: &serde_json::Value,
    created_by: Option<&str>,
) -> rusqlite::Result<PlanStep> {
    let id = uuid::Uuid::now_v7().to_string();
    let now = db::now();
    conn.execute(
        "INSERT INTO plan_steps (id, plan_id, step_number, description, status, created_by, metadata, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, ?7)",
        params![id, plan_id, step_number, description, created_by, metadata.to_string(), now],
    )?;
    Ok(PlanStep {
        id,
        plan_id: plan_id.to_string(),
        step_number,
        description: description.to_string(),
        status: StepStatus::Pending,
        result: None,
        created_by: created_by.map(str::to_string),
        metadata: metadata.clone(),
        created_at: now.clone(),
        updated_at: now,
    })
}

pub(crate) fn plan_status(
    conn: &Connection,
    project_id: &str,
    plan_id: &str,
) -> rusqlite::Result<Option<PlanStatus>> {
    conn.query_row(
        "SELECT status FROM plans WHERE id = ?1 AND project_id = ?2",
        params![plan_id, project_id],
        |row| status_from_sql(0, row.get(0)?),
    )
    .optional()
}

pub(crate) fn set_plan_status(
    conn: &Connection,
    plan_id: &str,
    status: PlanStatus,
    now: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE plans SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), now, plan_id],
    )?;
    Ok(())
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if matches!(f.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn validate_update(update: &StepUpdate) -> Result<(), EngineError> {
    if let Some(result) = &update.result {
        if result.len() > MAX_RESULT_LEN {
            return Err(EngineError::Validation(format!(
                "result is {} bytes; the limit is {MAX_RESULT_LEN}",
                result.len()
            )));
        }
    }
    if update.metadata.as_ref().is_some_and(|m| !m.is_object()) {
        return Err(EngineError::Validation("metadata must be a JSON object".into()));
    }
    Ok(())
}

fn merge_metadata(base: &mut serde_json::Value, extra: serde_json::Value) {
    let serde_json::Value::Object(extra) = extra else {
        return;
    };
    if !base.is_object() {
        *base = serde_json::json!({});
    }
    if let Some(map) = base.as_object_mut() {
        map.extend(extra);
    }
}
