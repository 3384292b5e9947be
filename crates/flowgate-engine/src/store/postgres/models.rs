//! Row types for the `flowgate` schema and their conversion into engine types.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::definition::{AssigneeType, WorkflowDefinition};
use crate::engine::state::{
    Execution, ExecutionContext, ExecutionStatus, HistoryEntry, WaitKind, WorkflowTask,
};
use crate::error::{EngineError, EngineResult};
use crate::store::CancellationRequest;

#[derive(Debug, Clone, FromRow)]
pub struct DefinitionRow {
    pub id: String,
    pub document: Value,
}

impl TryFrom<DefinitionRow> for WorkflowDefinition {
    type Error = EngineError;

    fn try_from(row: DefinitionRow) -> EngineResult<Self> {
        let mut definition: WorkflowDefinition = serde_json::from_value(row.document)?;
        definition.id = row.id;
        Ok(definition)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ExecutionRow {
    pub id: Uuid,
    pub workflow_id: String,
    pub workflow_version: i32,
    pub status: String,
    pub current_node_id: Option<String>,
    pub next_node_id: Option<String>,
    pub context: Value,
    pub resume_at: Option<DateTime<Utc>>,
    pub waiting_on: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ExecutionRow> for Execution {
    type Error = EngineError;

    fn try_from(row: ExecutionRow) -> EngineResult<Self> {
        Ok(Execution {
            id: row.id,
            workflow_id: row.workflow_id,
            workflow_version: row.workflow_version,
            status: row.status.parse::<ExecutionStatus>()?,
            current_node_id: row.current_node_id,
            next_node_id: row.next_node_id,
            context: ExecutionContext::from_value(row.context)?,
            resume_at: row.resume_at,
            waiting_on: row.waiting_on.as_deref().map(str::parse::<WaitKind>).transpose()?,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CancellationRow {
    pub cancel_requested_by: Option<String>,
    pub cancel_reason: Option<String>,
    pub cancel_requested_at: Option<DateTime<Utc>>,
}

impl CancellationRow {
    pub fn into_request(self) -> Option<CancellationRequest> {
        Some(CancellationRequest {
            actor: self.cancel_requested_by?,
            reason: self.cancel_reason.unwrap_or_default(),
            requested_at: self.cancel_requested_at.unwrap_or_else(Utc::now),
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub node_id: String,
    pub assign_to: String,
    pub assignee_type: String,
    pub assignee_id: Option<String>,
    pub task_type: Option<String>,
    pub allowed_actions: Value,
    pub sla_deadline: Option<DateTime<Utc>>,
    pub escalate_to: Option<String>,
    pub escalated_from: Option<Uuid>,
    pub status: String,
    pub action_taken: Option<String>,
    pub completed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for WorkflowTask {
    type Error = EngineError;

    fn try_from(row: TaskRow) -> EngineResult<Self> {
        let assignee_type = match row.assignee_type.as_str() {
            "user" => AssigneeType::User,
            "role" => AssigneeType::Role,
            "dynamic" => AssigneeType::Dynamic,
            other => {
                return Err(EngineError::Parse(format!(
                    "task {}: unknown assignee type '{}'",
                    row.id, other
                )))
            }
        };

        Ok(WorkflowTask {
            id: row.id,
            execution_id: row.execution_id,
            node_id: row.node_id,
            assign_to: row.assign_to,
            assignee_type,
            assignee_id: row.assignee_id,
            task_type: row.task_type,
            allowed_actions: serde_json::from_value(row.allowed_actions)?,
            sla_deadline: row.sla_deadline,
            escalate_to: row.escalate_to,
            escalated_from: row.escalated_from,
            status: row.status.parse()?,
            action_taken: row.action_taken,
            completed_by: row.completed_by,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct HistoryRow {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub node_id: Option<String>,
    pub event: String,
    pub detail: Value,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for HistoryEntry {
    type Error = EngineError;

    fn try_from(row: HistoryRow) -> EngineResult<Self> {
        Ok(HistoryEntry {
            id: row.id,
            execution_id: row.execution_id,
            node_id: row.node_id,
            event: row.event.parse()?,
            detail: row.detail,
            created_at: row.created_at,
        })
    }
}
