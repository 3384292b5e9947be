//! Persistence contract for definitions, executions, tasks and history.
//!
//! Executions are guarded by a lease (`owner`, expiry). A step loop holds
//! the lease for its whole invocation; `save_execution` fails with
//! `ExecutionLocked` when the caller no longer holds it.

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::definition::WorkflowDefinition;
use crate::engine::state::{Execution, HistoryEntry, TaskStatus, TaskTransition, WorkflowTask};
use crate::error::EngineResult;

pub use memory::InMemoryStore;
pub use postgres::PgWorkflowStore;

/// A cancellation recorded while another invocation held the lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationRequest {
    pub actor: String,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    // Definitions

    async fn load_workflow_definition(&self, id: &str) -> EngineResult<Option<WorkflowDefinition>>;

    async fn save_workflow_definition(&self, definition: &WorkflowDefinition) -> EngineResult<()>;

    /// Active definitions registered for a trigger type.
    async fn list_definitions_for_trigger(
        &self,
        trigger_type: &str,
    ) -> EngineResult<Vec<WorkflowDefinition>>;

    // Executions

    /// Insert a new execution with the lease already held by `owner`.
    async fn insert_execution(
        &self,
        execution: &Execution,
        owner: &str,
        ttl: Duration,
    ) -> EngineResult<()>;

    async fn load_execution(&self, id: Uuid) -> EngineResult<Option<Execution>>;

    /// Acquire the lease if it is free or expired. Returns false when another
    /// owner holds a live lease.
    async fn try_lock_execution(&self, id: Uuid, owner: &str, ttl: Duration) -> EngineResult<bool>;

    async fn release_execution(&self, id: Uuid, owner: &str) -> EngineResult<()>;

    /// Persist execution state. Requires the lease.
    async fn save_execution(&self, execution: &Execution, owner: &str) -> EngineResult<()>;

    async fn request_cancellation(&self, id: Uuid, actor: &str, reason: &str) -> EngineResult<()>;

    async fn pending_cancellation(&self, id: Uuid) -> EngineResult<Option<CancellationRequest>>;

    /// PAUSED executions waiting on a timer whose `resume_at <= now`.
    async fn find_due_timers(&self, now: DateTime<Utc>) -> EngineResult<Vec<Execution>>;

    // History

    async fn append_history(&self, entry: &HistoryEntry) -> EngineResult<()>;

    /// History of one execution in append order.
    async fn list_history(&self, execution_id: Uuid) -> EngineResult<Vec<HistoryEntry>>;

    // Tasks

    /// Insert a task unless a pending task already exists for the same
    /// (execution, node) pair. Returns the stored task either way.
    async fn upsert_task(&self, task: &WorkflowTask) -> EngineResult<WorkflowTask>;

    async fn find_pending_task(
        &self,
        execution_id: Uuid,
        node_id: &str,
    ) -> EngineResult<Option<WorkflowTask>>;

    /// Compare-and-set a task's status. Returns false if the task was not in `from`.
    async fn transition_task(
        &self,
        task_id: Uuid,
        from: TaskStatus,
        transition: &TaskTransition,
    ) -> EngineResult<bool>;

    async fn list_tasks(&self, execution_id: Uuid) -> EngineResult<Vec<WorkflowTask>>;

    /// Pending tasks whose SLA deadline is before `now`.
    async fn find_expired_tasks(&self, now: DateTime<Utc>) -> EngineResult<Vec<WorkflowTask>>;
}

/// Lease expiry for a lease taken at `now`.
pub(crate) fn lease_expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
