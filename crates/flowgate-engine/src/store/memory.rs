//! In-process store used by tests and embedded deployments.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{lease_expiry, CancellationRequest, WorkflowStore};
use crate::definition::WorkflowDefinition;
use crate::engine::state::{
    Execution, ExecutionStatus, HistoryEntry, TaskStatus, TaskTransition, WaitKind, WorkflowTask,
};
use crate::error::{EngineError, EngineResult};

struct StoredExecution {
    execution: Execution,
    locked_by: Option<String>,
    locked_until: Option<DateTime<Utc>>,
    cancellation: Option<CancellationRequest>,
}

impl StoredExecution {
    fn lease_free(&self, now: DateTime<Utc>) -> bool {
        match (&self.locked_by, self.locked_until) {
            (None, _) => true,
            (Some(_), Some(until)) => until <= now,
            (Some(_), None) => false,
        }
    }
}

#[derive(Default)]
struct Inner {
    definitions: HashMap<String, WorkflowDefinition>,
    executions: HashMap<Uuid, StoredExecution>,
    history: Vec<HistoryEntry>,
    tasks: Vec<WorkflowTask>,
}

/// [`WorkflowStore`] backed by process memory.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn load_workflow_definition(&self, id: &str) -> EngineResult<Option<WorkflowDefinition>> {
        Ok(self.inner.read().await.definitions.get(id).cloned())
    }

    async fn save_workflow_definition(&self, definition: &WorkflowDefinition) -> EngineResult<()> {
        self.inner
            .write()
            .await
            .definitions
            .insert(definition.id.clone(), definition.clone());
        Ok(())
    }

    async fn list_definitions_for_trigger(
        &self,
        trigger_type: &str,
    ) -> EngineResult<Vec<WorkflowDefinition>> {
        let inner = self.inner.read().await;
        let mut matching: Vec<WorkflowDefinition> = inner
            .definitions
            .values()
            .filter(|d| d.is_active && d.trigger_type.as_deref() == Some(trigger_type))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matching)
    }

    async fn insert_execution(
        &self,
        execution: &Execution,
        owner: &str,
        ttl: Duration,
    ) -> EngineResult<()> {
        let mut inner = self.inner.write().await;
        if inner.executions.contains_key(&execution.id) {
            return Err(EngineError::Internal(format!(
                "execution {} already exists",
                execution.id
            )));
        }
        inner.executions.insert(
            execution.id,
            StoredExecution {
                execution: execution.clone(),
                locked_by: Some(owner.to_string()),
                locked_until: Some(lease_expiry(Utc::now(), ttl)),
                cancellation: None,
            },
        );
        Ok(())
    }

    async fn load_execution(&self, id: Uuid) -> EngineResult<Option<Execution>> {
        Ok(self
            .inner
            .read()
            .await
            .executions
            .get(&id)
            .map(|s| s.execution.clone()))
    }

    async fn try_lock_execution(&self, id: Uuid, owner: &str, ttl: Duration) -> EngineResult<bool> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .executions
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("execution {}", id)))?;

        let now = Utc::now();
        if !stored.lease_free(now) {
            return Ok(false);
        }
        stored.locked_by = Some(owner.to_string());
        stored.locked_until = Some(lease_expiry(now, ttl));
        Ok(true)
    }

    async fn release_execution(&self, id: Uuid, owner: &str) -> EngineResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(stored) = inner.executions.get_mut(&id) {
            if stored.locked_by.as_deref() == Some(owner) {
                stored.locked_by = None;
                stored.locked_until = None;
            }
        }
        Ok(())
    }

    async fn save_execution(&self, execution: &Execution, owner: &str) -> EngineResult<()> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .executions
            .get_mut(&execution.id)
            .ok_or_else(|| EngineError::NotFound(format!("execution {}", execution.id)))?;

        if stored.locked_by.as_deref() != Some(owner) {
            return Err(EngineError::ExecutionLocked(execution.id));
        }
        stored.execution = execution.clone();
        Ok(())
    }

    async fn request_cancellation(&self, id: Uuid, actor: &str, reason: &str) -> EngineResult<()> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .executions
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("execution {}", id)))?;
        stored.cancellation = Some(CancellationRequest {
            actor: actor.to_string(),
            reason: reason.to_string(),
            requested_at: Utc::now(),
        });
        Ok(())
    }

    async fn pending_cancellation(&self, id: Uuid) -> EngineResult<Option<CancellationRequest>> {
        Ok(self
            .inner
            .read()
            .await
            .executions
            .get(&id)
            .and_then(|s| s.cancellation.clone()))
    }

    async fn find_due_timers(&self, now: DateTime<Utc>) -> EngineResult<Vec<Execution>> {
        let inner = self.inner.read().await;
        let mut due: Vec<Execution> = inner
            .executions
            .values()
            .map(|s| &s.execution)
            .filter(|e| {
                e.status == ExecutionStatus::Paused
                    && e.waiting_on == Some(WaitKind::Timer)
                    && e.resume_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|e| e.resume_at);
        Ok(due)
    }

    async fn append_history(&self, entry: &HistoryEntry) -> EngineResult<()> {
        self.inner.write().await.history.push(entry.clone());
        Ok(())
    }

    async fn list_history(&self, execution_id: Uuid) -> EngineResult<Vec<HistoryEntry>> {
        Ok(self
            .inner
            .read()
            .await
            .history
            .iter()
            .filter(|e| e.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn upsert_task(&self, task: &WorkflowTask) -> EngineResult<WorkflowTask> {
        let mut inner = self.inner.write().await;
        if task.status == TaskStatus::Pending {
            if let Some(existing) = inner.tasks.iter().find(|t| {
                t.execution_id == task.execution_id
                    && t.node_id == task.node_id
                    && t.status == TaskStatus::Pending
            }) {
                return Ok(existing.clone());
            }
        }
        inner.tasks.push(task.clone());
        Ok(task.clone())
    }

    async fn find_pending_task(
        &self,
        execution_id: Uuid,
        node_id: &str,
    ) -> EngineResult<Option<WorkflowTask>> {
        Ok(self
            .inner
            .read()
            .await
            .tasks
            .iter()
            .find(|t| {
                t.execution_id == execution_id
                    && t.node_id == node_id
                    && t.status == TaskStatus::Pending
            })
            .cloned())
    }

    async fn transition_task(
        &self,
        task_id: Uuid,
        from: TaskStatus,
        transition: &TaskTransition,
    ) -> EngineResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(task) = inner.tasks.iter_mut().find(|t| t.id == task_id) else {
            return Ok(false);
        };
        if task.status != from {
            return Ok(false);
        }
        task.status = transition.status;
        task.action_taken = transition.action_taken.clone();
        task.completed_by = transition.completed_by.clone();
        task.completed_at = Some(transition.at);
        Ok(true)
    }

    async fn list_tasks(&self, execution_id: Uuid) -> EngineResult<Vec<WorkflowTask>> {
        Ok(self
            .inner
            .read()
            .await
            .tasks
            .iter()
            .filter(|t| t.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn find_expired_tasks(&self, now: DateTime<Utc>) -> EngineResult<Vec<WorkflowTask>> {
        Ok(self
            .inner
            .read()
            .await
            .tasks
            .iter()
            .filter(|t| {
                t.status == TaskStatus::Pending && t.sla_deadline.is_some_and(|d| d < now)
            })
            .cloned()
            .collect())
    }
}
