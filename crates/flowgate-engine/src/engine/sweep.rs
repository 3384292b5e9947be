//! SLA sweep.
//!
//! One pass acts on everything that is overdue at `now`:
//! expired tasks are escalated or expired, due delay timers are resumed.
//! Every action is guarded by a task or execution status check, so running
//! the same pass twice is harmless.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::state::{
    Execution, ExecutionContext, HistoryEntry, HistoryEvent, TaskStatus, TaskTransition, WorkflowTask,
};
use super::workflow::WorkflowEngine;
use crate::collaborators::DirectoryLookup;
use crate::definition::{AssignTarget, AssigneeType, NodeKind};
use crate::error::{EngineError, EngineResult};
use crate::processors::resolve_assignee;

pub const SWEEP_ACTOR: &str = "system:sla-sweep";

/// Counters for one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub tasks_escalated: usize,
    pub tasks_expired: usize,
    pub timers_resumed: usize,
    /// Executions another invocation held the lease on; retried next pass.
    pub skipped_locked: usize,
    pub failures: usize,
}

impl SweepReport {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

pub struct SlaSweep {
    engine: Arc<WorkflowEngine>,
    directory: Arc<dyn DirectoryLookup>,
}

impl SlaSweep {
    pub fn new(engine: Arc<WorkflowEngine>, directory: Arc<dyn DirectoryLookup>) -> Self {
        Self { engine, directory }
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> EngineResult<SweepReport> {
        let started = Instant::now();
        let mut report = SweepReport::default();
        let store = self.engine.store();

        for task in store.find_expired_tasks(now).await? {
            let result = if task.escalate_to.is_some() {
                self.escalate(&task, now).await.map(|done| {
                    if done {
                        report.tasks_escalated += 1;
                    }
                })
            } else {
                self.engine.expire_task(&task, SWEEP_ACTOR).await.map(|done| {
                    if done {
                        report.tasks_expired += 1;
                    }
                })
            };
            self.tally(&mut report, result, task.execution_id, "task");
        }

        for execution in store.find_due_timers(now).await? {
            let payload = self.timer_payload(&execution).await;
            let result = self
                .engine
                .resume_execution(execution.id, SWEEP_ACTOR, payload)
                .await
                .map(|_| report.timers_resumed += 1);
            self.tally(&mut report, result, execution.id, "timer");
        }

        let duration = started.elapsed();
        if report.is_idle() {
            debug!(target: "flowgate.performance", duration_ms = %duration.as_millis(), "Sweep idle");
        } else {
            info!(
                target: "flowgate.performance",
                escalated = report.tasks_escalated,
                expired = report.tasks_expired,
                timers = report.timers_resumed,
                skipped = report.skipped_locked,
                failures = report.failures,
                duration_ms = %duration.as_millis(),
                "Sweep finished"
            );
        }

        Ok(report)
    }

    fn tally(&self, report: &mut SweepReport, result: EngineResult<()>, execution_id: Uuid, item: &str) {
        match result {
            Ok(()) => {}
            Err(EngineError::ExecutionLocked(_)) => {
                warn!(execution_id = %execution_id, item, "Execution busy, retrying next sweep");
                report.skipped_locked += 1;
            }
            Err(e) => {
                warn!(execution_id = %execution_id, item, error = %e, "Sweep action failed");
                report.failures += 1;
            }
        }
    }

    /// Hand an overdue task to its escalation target.
    ///
    /// Runs under the execution lease so it cannot interleave with a resume.
    /// The replacement keeps the original SLA length, counted from `now`,
    /// and does not escalate again.
    async fn escalate(&self, task: &WorkflowTask, now: DateTime<Utc>) -> EngineResult<bool> {
        let owner = self.engine.acquire(task.execution_id).await?;
        let result = self.escalate_locked(task, now).await;
        self.engine.release(task.execution_id, &owner).await;
        result
    }

    async fn escalate_locked(&self, task: &WorkflowTask, now: DateTime<Utc>) -> EngineResult<bool> {
        let store = self.engine.store();
        let Some(escalate_to) = task.escalate_to.as_deref() else {
            return Ok(false);
        };

        if !store
            .transition_task(task.id, TaskStatus::Pending, &TaskTransition::new(TaskStatus::Escalated, now))
            .await?
        {
            return Ok(false);
        }

        let target = escalate_to.parse::<AssignTarget>().unwrap_or_else(|_| AssignTarget {
            kind: AssigneeType::User,
            value: escalate_to.to_string(),
        });
        let assign_to = format!("{}:{}", target.kind, target.value);

        let context = match store.load_execution(task.execution_id).await? {
            Some(execution) => execution.context,
            None => ExecutionContext::new(),
        };
        let assignee_id = resolve_assignee(
            &target,
            &context,
            self.directory.as_ref(),
            false,
        )
        .await?;

        let sla_deadline = match (task.sla_deadline, task.created_at) {
            (Some(deadline), created) if deadline > created => Some(now + (deadline - created)),
            _ => None,
        };

        let replacement = WorkflowTask {
            id: Uuid::new_v4(),
            execution_id: task.execution_id,
            node_id: task.node_id.clone(),
            assign_to,
            assignee_type: target.kind,
            assignee_id,
            task_type: task.task_type.clone(),
            allowed_actions: task.allowed_actions.clone(),
            sla_deadline,
            escalate_to: None,
            escalated_from: Some(task.id),
            status: TaskStatus::Pending,
            action_taken: None,
            completed_by: None,
            created_at: now,
            completed_at: None,
        };
        let replacement = store.upsert_task(&replacement).await?;

        store
            .append_history(&HistoryEntry::new(
                task.execution_id,
                Some(&task.node_id),
                HistoryEvent::TaskEscalated,
                json!({
                    "taskId": task.id,
                    "newTaskId": replacement.id,
                    "escalateTo": replacement.assign_to,
                    "assigneeId": replacement.assignee_id,
                    "slaDeadline": replacement.sla_deadline,
                }),
                now,
            ))
            .await?;

        info!(
            execution_id = %task.execution_id,
            task_id = %task.id,
            new_task_id = %replacement.id,
            escalate_to = %replacement.assign_to,
            "Task escalated"
        );
        Ok(true)
    }

    async fn timer_payload(&self, execution: &Execution) -> Value {
        let mut payload = Map::new();
        payload.insert("timer_elapsed".to_string(), Value::Bool(true));

        let escalate_to = match execution.current_node_id.as_deref() {
            Some(node_id) => self
                .engine
                .store()
                .load_workflow_definition(&execution.workflow_id)
                .await
                .ok()
                .flatten()
                .and_then(|d| d.nodes.get(node_id).cloned())
                .and_then(|node| match node.kind {
                    NodeKind::Delay(config) => config.escalate_to,
                    _ => None,
                }),
            None => None,
        };
        if let Some(escalate_to) = escalate_to {
            payload.insert("delay_escalate_to".to_string(), Value::String(escalate_to));
        }

        Value::Object(payload)
    }
}
