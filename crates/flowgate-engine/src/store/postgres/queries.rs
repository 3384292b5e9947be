//! SQL for the `flowgate` schema.
//!
//! Lease checks use the database clock so that engines on different hosts
//! agree on expiry.

use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use super::models::{CancellationRow, DefinitionRow, ExecutionRow, HistoryRow, TaskRow};
use super::pool::DbPool;
use crate::definition::WorkflowDefinition;
use crate::engine::state::{Execution, HistoryEntry, TaskStatus, TaskTransition, WorkflowTask};
use crate::error::EngineResult;

const EXECUTION_COLUMNS: &str = "id, workflow_id, workflow_version, status, current_node_id, \
     next_node_id, context, resume_at, waiting_on, error, created_at, updated_at, completed_at";

const TASK_COLUMNS: &str = "id, execution_id, node_id, assign_to, assignee_type, assignee_id, \
     task_type, allowed_actions, sla_deadline, escalate_to, escalated_from, status, \
     action_taken, completed_by, created_at, completed_at";

// ============================================================================
// Definitions
// ============================================================================

pub async fn get_definition(pool: &DbPool, id: &str) -> EngineResult<Option<DefinitionRow>> {
    let row = sqlx::query_as::<_, DefinitionRow>(
        r#"
        SELECT id, document
        FROM flowgate.workflow_definition
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

pub async fn upsert_definition(pool: &DbPool, definition: &WorkflowDefinition) -> EngineResult<()> {
    let document = serde_json::to_value(definition)?;

    sqlx::query(
        r#"
        INSERT INTO flowgate.workflow_definition (
            id, name, version, trigger_type, is_default, is_active, document, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, now(), now())
        ON CONFLICT (id) DO UPDATE SET
            name = EXCLUDED.name,
            version = EXCLUDED.version,
            trigger_type = EXCLUDED.trigger_type,
            is_default = EXCLUDED.is_default,
            is_active = EXCLUDED.is_active,
            document = EXCLUDED.document,
            updated_at = now()
        "#,
    )
    .bind(&definition.id)
    .bind(&definition.name)
    .bind(definition.version)
    .bind(&definition.trigger_type)
    .bind(definition.is_default)
    .bind(definition.is_active)
    .bind(&document)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn list_definitions_for_trigger(
    pool: &DbPool,
    trigger_type: &str,
) -> EngineResult<Vec<DefinitionRow>> {
    let rows = sqlx::query_as::<_, DefinitionRow>(
        r#"
        SELECT id, document
        FROM flowgate.workflow_definition
        WHERE trigger_type = $1 AND is_active
        ORDER BY id
        "#,
    )
    .bind(trigger_type)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

// ============================================================================
// Executions
// ============================================================================

pub async fn insert_execution(
    pool: &DbPool,
    execution: &Execution,
    owner: &str,
    ttl: Duration,
) -> EngineResult<()> {
    sqlx::query(
        r#"
        INSERT INTO flowgate.workflow_execution (
            id, workflow_id, workflow_version, status, current_node_id, next_node_id,
            context, resume_at, waiting_on, error, created_at, updated_at, completed_at,
            locked_by, locked_until
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                $14, now() + make_interval(secs => $15))
        "#,
    )
    .bind(execution.id)
    .bind(&execution.workflow_id)
    .bind(execution.workflow_version)
    .bind(execution.status.to_string())
    .bind(&execution.current_node_id)
    .bind(&execution.next_node_id)
    .bind(execution.context.to_value())
    .bind(execution.resume_at)
    .bind(execution.waiting_on.map(|w| w.as_str()))
    .bind(&execution.error)
    .bind(execution.created_at)
    .bind(execution.updated_at)
    .bind(execution.completed_at)
    .bind(owner)
    .bind(ttl.as_secs_f64())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_execution(pool: &DbPool, id: Uuid) -> EngineResult<Option<ExecutionRow>> {
    let row = sqlx::query_as::<_, ExecutionRow>(&format!(
        "SELECT {} FROM flowgate.workflow_execution WHERE id = $1",
        EXECUTION_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Take the lease if it is free or expired. Returns the id when acquired.
pub async fn acquire_lease(
    pool: &DbPool,
    id: Uuid,
    owner: &str,
    ttl: Duration,
) -> EngineResult<Option<Uuid>> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        UPDATE flowgate.workflow_execution
        SET locked_by = $2,
            locked_until = now() + make_interval(secs => $3)
        WHERE id = $1
          AND (locked_by IS NULL OR locked_until <= now())
        RETURNING id
        "#,
    )
    .bind(id)
    .bind(owner)
    .bind(ttl.as_secs_f64())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.0))
}

pub async fn execution_exists(pool: &DbPool, id: Uuid) -> EngineResult<bool> {
    let row: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM flowgate.workflow_execution WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;

    Ok(row.is_some())
}

pub async fn release_lease(pool: &DbPool, id: Uuid, owner: &str) -> EngineResult<()> {
    sqlx::query(
        r#"
        UPDATE flowgate.workflow_execution
        SET locked_by = NULL, locked_until = NULL
        WHERE id = $1 AND locked_by = $2
        "#,
    )
    .bind(id)
    .bind(owner)
    .execute(pool)
    .await?;

    Ok(())
}

/// Write execution state if `owner` holds the lease. Returns rows affected.
pub async fn update_execution(pool: &DbPool, execution: &Execution, owner: &str) -> EngineResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE flowgate.workflow_execution
        SET status = $3,
            current_node_id = $4,
            next_node_id = $5,
            context = $6,
            resume_at = $7,
            waiting_on = $8,
            error = $9,
            updated_at = $10,
            completed_at = $11
        WHERE id = $1 AND locked_by = $2
        "#,
    )
    .bind(execution.id)
    .bind(owner)
    .bind(execution.status.to_string())
    .bind(&execution.current_node_id)
    .bind(&execution.next_node_id)
    .bind(execution.context.to_value())
    .bind(execution.resume_at)
    .bind(execution.waiting_on.map(|w| w.as_str()))
    .bind(&execution.error)
    .bind(execution.updated_at)
    .bind(execution.completed_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn set_cancellation(pool: &DbPool, id: Uuid, actor: &str, reason: &str) -> EngineResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE flowgate.workflow_execution
        SET cancel_requested_by = $2,
            cancel_reason = $3,
            cancel_requested_at = now()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(actor)
    .bind(reason)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn get_cancellation(pool: &DbPool, id: Uuid) -> EngineResult<Option<CancellationRow>> {
    let row = sqlx::query_as::<_, CancellationRow>(
        r#"
        SELECT cancel_requested_by, cancel_reason, cancel_requested_at
        FROM flowgate.workflow_execution
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

pub async fn due_timers(pool: &DbPool, now: DateTime<Utc>) -> EngineResult<Vec<ExecutionRow>> {
    let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
        "SELECT {} FROM flowgate.workflow_execution \
         WHERE status = 'PAUSED' AND waiting_on = 'timer' AND resume_at <= $1 \
         ORDER BY resume_at",
        EXECUTION_COLUMNS
    ))
    .bind(now)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

// ============================================================================
// History
// ============================================================================

pub async fn insert_history(pool: &DbPool, entry: &HistoryEntry) -> EngineResult<()> {
    sqlx::query(
        r#"
        INSERT INTO flowgate.workflow_history (id, execution_id, node_id, event, detail, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(entry.id)
    .bind(entry.execution_id)
    .bind(&entry.node_id)
    .bind(entry.event.as_str())
    .bind(&entry.detail)
    .bind(entry.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn history_for_execution(pool: &DbPool, execution_id: Uuid) -> EngineResult<Vec<HistoryRow>> {
    let rows = sqlx::query_as::<_, HistoryRow>(
        r#"
        SELECT id, execution_id, node_id, event, detail, created_at
        FROM flowgate.workflow_history
        WHERE execution_id = $1
        ORDER BY seq
        "#,
    )
    .bind(execution_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

// ============================================================================
// Tasks
// ============================================================================

/// Insert a task; a conflicting pending task leaves the table unchanged and
/// yields `None`.
pub async fn insert_task(pool: &DbPool, task: &WorkflowTask) -> EngineResult<Option<TaskRow>> {
    let row = sqlx::query_as::<_, TaskRow>(&format!(
        r#"
        INSERT INTO flowgate.workflow_task ({columns})
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        ON CONFLICT (execution_id, node_id) WHERE status = 'pending' DO NOTHING
        RETURNING {columns}
        "#,
        columns = TASK_COLUMNS
    ))
    .bind(task.id)
    .bind(task.execution_id)
    .bind(&task.node_id)
    .bind(&task.assign_to)
    .bind(task.assignee_type.to_string())
    .bind(&task.assignee_id)
    .bind(&task.task_type)
    .bind(serde_json::to_value(&task.allowed_actions)?)
    .bind(task.sla_deadline)
    .bind(&task.escalate_to)
    .bind(task.escalated_from)
    .bind(task.status.as_str())
    .bind(&task.action_taken)
    .bind(&task.completed_by)
    .bind(task.created_at)
    .bind(task.completed_at)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

pub async fn pending_task(pool: &DbPool, execution_id: Uuid, node_id: &str) -> EngineResult<Option<TaskRow>> {
    let row = sqlx::query_as::<_, TaskRow>(&format!(
        "SELECT {} FROM flowgate.workflow_task \
         WHERE execution_id = $1 AND node_id = $2 AND status = 'pending'",
        TASK_COLUMNS
    ))
    .bind(execution_id)
    .bind(node_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Move a task out of `from`. Returns rows affected (0 when the guard failed).
pub async fn transition_task(
    pool: &DbPool,
    task_id: Uuid,
    from: TaskStatus,
    transition: &TaskTransition,
) -> EngineResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE flowgate.workflow_task
        SET status = $3,
            action_taken = $4,
            completed_by = $5,
            completed_at = $6
        WHERE id = $1 AND status = $2
        "#,
    )
    .bind(task_id)
    .bind(from.as_str())
    .bind(transition.status.as_str())
    .bind(&transition.action_taken)
    .bind(&transition.completed_by)
    .bind(transition.at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn tasks_for_execution(pool: &DbPool, execution_id: Uuid) -> EngineResult<Vec<TaskRow>> {
    let rows = sqlx::query_as::<_, TaskRow>(&format!(
        "SELECT {} FROM flowgate.workflow_task WHERE execution_id = $1 ORDER BY created_at",
        TASK_COLUMNS
    ))
    .bind(execution_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn expired_tasks(pool: &DbPool, now: DateTime<Utc>) -> EngineResult<Vec<TaskRow>> {
    let rows = sqlx::query_as::<_, TaskRow>(&format!(
        "SELECT {} FROM flowgate.workflow_task \
         WHERE status = 'pending' AND sla_deadline < $1 \
         ORDER BY sla_deadline",
        TASK_COLUMNS
    ))
    .bind(now)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
