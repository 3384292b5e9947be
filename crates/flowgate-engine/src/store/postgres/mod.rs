//! PostgreSQL-backed [`WorkflowStore`].

pub mod models;
pub mod pool;
pub mod queries;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{CancellationRequest, WorkflowStore};
use crate::definition::WorkflowDefinition;
use crate::engine::state::{Execution, HistoryEntry, TaskStatus, TaskTransition, WorkflowTask};
use crate::error::{EngineError, EngineResult};

pub use pool::{create_pool, init_schema, DbPool};

/// Store over the `flowgate` schema.
#[derive(Debug, Clone)]
pub struct PgWorkflowStore {
    pool: DbPool,
}

impl PgWorkflowStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn convert<R, T>(rows: Vec<R>) -> EngineResult<Vec<T>>
where
    T: TryFrom<R, Error = EngineError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn load_workflow_definition(&self, id: &str) -> EngineResult<Option<WorkflowDefinition>> {
        queries::get_definition(&self.pool, id)
            .await?
            .map(WorkflowDefinition::try_from)
            .transpose()
    }

    async fn save_workflow_definition(&self, definition: &WorkflowDefinition) -> EngineResult<()> {
        queries::upsert_definition(&self.pool, definition).await
    }

    async fn list_definitions_for_trigger(
        &self,
        trigger_type: &str,
    ) -> EngineResult<Vec<WorkflowDefinition>> {
        convert(queries::list_definitions_for_trigger(&self.pool, trigger_type).await?)
    }

    async fn insert_execution(
        &self,
        execution: &Execution,
        owner: &str,
        ttl: Duration,
    ) -> EngineResult<()> {
        queries::insert_execution(&self.pool, execution, owner, ttl).await
    }

    async fn load_execution(&self, id: Uuid) -> EngineResult<Option<Execution>> {
        queries::get_execution(&self.pool, id)
            .await?
            .map(Execution::try_from)
            .transpose()
    }

    async fn try_lock_execution(&self, id: Uuid, owner: &str, ttl: Duration) -> EngineResult<bool> {
        if queries::acquire_lease(&self.pool, id, owner, ttl).await?.is_some() {
            return Ok(true);
        }
        if !queries::execution_exists(&self.pool, id).await? {
            return Err(EngineError::NotFound(format!("execution {}", id)));
        }
        Ok(false)
    }

    async fn release_execution(&self, id: Uuid, owner: &str) -> EngineResult<()> {
        queries::release_lease(&self.pool, id, owner).await
    }

    async fn save_execution(&self, execution: &Execution, owner: &str) -> EngineResult<()> {
        if queries::update_execution(&self.pool, execution, owner).await? == 0 {
            return Err(EngineError::ExecutionLocked(execution.id));
        }
        Ok(())
    }

    async fn request_cancellation(&self, id: Uuid, actor: &str, reason: &str) -> EngineResult<()> {
        if queries::set_cancellation(&self.pool, id, actor, reason).await? == 0 {
            return Err(EngineError::NotFound(format!("execution {}", id)));
        }
        Ok(())
    }

    async fn pending_cancellation(&self, id: Uuid) -> EngineResult<Option<CancellationRequest>> {
        Ok(queries::get_cancellation(&self.pool, id)
            .await?
            .and_then(|row| row.into_request()))
    }

    async fn find_due_timers(&self, now: DateTime<Utc>) -> EngineResult<Vec<Execution>> {
        convert(queries::due_timers(&self.pool, now).await?)
    }

    async fn append_history(&self, entry: &HistoryEntry) -> EngineResult<()> {
        queries::insert_history(&self.pool, entry).await
    }

    async fn list_history(&self, execution_id: Uuid) -> EngineResult<Vec<HistoryEntry>> {
        convert(queries::history_for_execution(&self.pool, execution_id).await?)
    }

    async fn upsert_task(&self, task: &WorkflowTask) -> EngineResult<WorkflowTask> {
        if let Some(row) = queries::insert_task(&self.pool, task).await? {
            return WorkflowTask::try_from(row);
        }
        queries::pending_task(&self.pool, task.execution_id, &task.node_id)
            .await?
            .map(WorkflowTask::try_from)
            .transpose()?
            .ok_or_else(|| {
                EngineError::Internal(format!(
                    "task insert for execution {} node '{}' conflicted but no pending task exists",
                    task.execution_id, task.node_id
                ))
            })
    }

    async fn find_pending_task(
        &self,
        execution_id: Uuid,
        node_id: &str,
    ) -> EngineResult<Option<WorkflowTask>> {
        queries::pending_task(&self.pool, execution_id, node_id)
            .await?
            .map(WorkflowTask::try_from)
            .transpose()
    }

    async fn transition_task(
        &self,
        task_id: Uuid,
        from: TaskStatus,
        transition: &TaskTransition,
    ) -> EngineResult<bool> {
        Ok(queries::transition_task(&self.pool, task_id, from, transition).await? > 0)
    }

    async fn list_tasks(&self, execution_id: Uuid) -> EngineResult<Vec<WorkflowTask>> {
        convert(queries::tasks_for_execution(&self.pool, execution_id).await?)
    }

    async fn find_expired_tasks(&self, now: DateTime<Utc>) -> EngineResult<Vec<WorkflowTask>> {
        convert(queries::expired_tasks(&self.pool, now).await?)
    }
}
