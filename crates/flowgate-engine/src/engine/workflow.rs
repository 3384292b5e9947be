//! Workflow engine.
//!
//! Drives executions through their definition graph:
//! - start: create the execution and run the step loop
//! - resume: complete the waiting task, merge the payload, continue
//! - cancel: terminate now, or flag the running loop to stop
//!
//! Every invocation holds the execution lease for its whole step loop.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::state::{
    Execution, ExecutionContext, ExecutionStatus, ExecutionStatusView, HistoryEntry, HistoryEvent,
    TaskStatus, TaskTransition, WaitKind, WorkflowTask,
};
use crate::collaborators::Collaborators;
use crate::condition::ConditionEvaluator;
use crate::config::EngineConfig;
use crate::definition::WorkflowDefinition;
use crate::error::{EngineError, EngineResult};
use crate::processors::{NodeInput, ProcessorDeps, ProcessorRegistry};
use crate::result_ext::ResultExt;
use crate::store::WorkflowStore;
use crate::template::TemplateRenderer;

/// The durable workflow state machine.
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    registry: ProcessorRegistry,
    config: Arc<EngineConfig>,
    evaluator: ConditionEvaluator,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn WorkflowStore>, registry: ProcessorRegistry, config: Arc<EngineConfig>) -> Self {
        Self {
            store,
            registry,
            config,
            evaluator: ConditionEvaluator::new(),
        }
    }

    /// Engine with the default processors wired to `collaborators`.
    pub fn with_collaborators(
        store: Arc<dyn WorkflowStore>,
        collaborators: Collaborators,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("flowgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EngineError::Config(format!("failed to build HTTP client: {}", e)))?;

        let config = Arc::new(config);
        let registry = ProcessorRegistry::with_defaults(ProcessorDeps {
            store: store.clone(),
            collaborators,
            renderer: Arc::new(TemplateRenderer::new()),
            http,
            config: config.clone(),
        });

        Ok(Self::new(store, registry, config))
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a new execution of an active definition.
    pub async fn start_execution(&self, workflow_id: &str, trigger_context: Value) -> EngineResult<Uuid> {
        let definition = self.load_definition(workflow_id).await?;
        if !definition.is_active {
            return Err(EngineError::InactiveWorkflow(workflow_id.to_string()));
        }

        let context = ExecutionContext::from_value(trigger_context)?;
        let now = Utc::now();
        let mut execution = Execution::new(
            &definition.id,
            definition.version,
            &definition.root_node_id,
            context,
            now,
        );

        let owner = self.lease_owner();
        self.store
            .insert_execution(&execution, &owner, self.config.lock_ttl())
            .await?;

        info!(
            execution_id = %execution.id,
            workflow_id = %definition.id,
            version = definition.version,
            "Starting execution"
        );

        let result = async {
            execution.status = ExecutionStatus::Running;
            execution.updated_at = Utc::now();
            self.store.save_execution(&execution, &owner).await?;
            self.record(
                execution.id,
                None,
                HistoryEvent::Started,
                json!({ "workflowId": definition.id, "version": definition.version }),
            )
            .await?;
            self.run_loop(&definition, &mut execution, &owner).await
        }
        .await;
        let result = self.settle(&mut execution, &owner, result).await;

        self.release(execution.id, &owner).await;
        result.map(|_| execution.id)
    }

    /// Start the workflow registered for a trigger.
    ///
    /// Non-default definitions whose trigger conditions match the payload are
    /// tried first, in id order; the default definition is the fallback.
    pub async fn start_for_trigger(&self, trigger_type: &str, payload: Value) -> EngineResult<Uuid> {
        let candidates = self.store.list_definitions_for_trigger(trigger_type).await?;
        let context = ExecutionContext::from_value(payload.clone())?;

        for definition in candidates.iter().filter(|d| !d.is_default) {
            if self.trigger_matches(definition, &context) {
                debug!(trigger_type, workflow_id = %definition.id, "Trigger matched");
                return self.start_execution(&definition.id, payload).await;
            }
        }

        match candidates.iter().find(|d| d.is_default) {
            Some(definition) => self.start_execution(&definition.id, payload).await,
            None => Err(EngineError::NotFound(format!(
                "no workflow definition for trigger '{}'",
                trigger_type
            ))),
        }
    }

    pub async fn get_execution_status(&self, execution_id: Uuid) -> EngineResult<ExecutionStatusView> {
        let execution = self.load_execution(execution_id).await?;
        Ok(ExecutionStatusView::from(&execution))
    }

    /// Ordered history of an execution.
    pub async fn history(&self, execution_id: Uuid) -> EngineResult<Vec<HistoryEntry>> {
        self.store.list_history(execution_id).await
    }

    /// Resume a paused execution. A no-op for any other status.
    ///
    /// Fails fast with `ExecutionLocked` when another invocation holds the lease.
    pub async fn resume_execution(
        &self,
        execution_id: Uuid,
        actor_id: &str,
        payload: Value,
    ) -> EngineResult<()> {
        let execution = self.load_execution(execution_id).await?;
        if execution.status != ExecutionStatus::Paused {
            debug!(
                execution_id = %execution_id,
                status = %execution.status,
                "Resume ignored, execution is not paused"
            );
            return Ok(());
        }

        let owner = self.acquire(execution_id).await?;
        let result = self
            .resume_locked(execution_id, actor_id, payload, &owner)
            .await;
        self.release(execution_id, &owner).await;
        result
    }

    /// Cancel a RUNNING or PAUSED execution.
    ///
    /// When a step loop holds the lease, the cancellation is recorded and
    /// applied by that loop at its next step boundary.
    pub async fn cancel_execution(&self, execution_id: Uuid, actor_id: &str, reason: &str) -> EngineResult<()> {
        let execution = self.load_execution(execution_id).await?;
        ensure_cancellable(&execution)?;

        let owner = self.lease_owner();
        if !self
            .store
            .try_lock_execution(execution_id, &owner, self.config.lock_ttl())
            .await?
        {
            self.store
                .request_cancellation(execution_id, actor_id, reason)
                .await?;
            info!(
                execution_id = %execution_id,
                actor_id,
                "Execution busy, cancellation requested"
            );
            return Ok(());
        }

        let result = async {
            let mut execution = self.load_execution(execution_id).await?;
            ensure_cancellable(&execution)?;
            self.apply_cancellation(&mut execution, &owner, actor_id, reason)
                .await
        }
        .await;

        self.release(execution_id, &owner).await;
        result
    }

    /// Expire a task whose SLA passed and wake its execution with
    /// `{ "sla_expired": true, "expired_task_id": .. }`.
    ///
    /// Returns false when the task was no longer pending.
    pub async fn expire_task(&self, task: &WorkflowTask, actor_id: &str) -> EngineResult<bool> {
        let owner = self.acquire(task.execution_id).await?;

        let result = async {
            let now = Utc::now();
            if !self
                .store
                .transition_task(task.id, TaskStatus::Pending, &TaskTransition::new(TaskStatus::Expired, now))
                .await?
            {
                return Ok(false);
            }

            self.record(
                task.execution_id,
                Some(&task.node_id),
                HistoryEvent::TaskExpired,
                json!({ "taskId": task.id, "slaDeadline": task.sla_deadline }),
            )
            .await?;

            self.resume_locked(
                task.execution_id,
                actor_id,
                json!({ "sla_expired": true, "expired_task_id": task.id }),
                &owner,
            )
            .await?;
            Ok(true)
        }
        .await;

        self.release(task.execution_id, &owner).await;
        result
    }

    async fn resume_locked(
        &self,
        execution_id: Uuid,
        actor_id: &str,
        payload: Value,
        owner: &str,
    ) -> EngineResult<()> {
        // Status may have moved on between the unlocked check and the lease
        let mut execution = self.load_execution(execution_id).await?;
        if execution.status != ExecutionStatus::Paused {
            return Ok(());
        }

        let mut patch = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(EngineError::InvalidTransition(format!(
                    "resume payload must be an object, got {}",
                    other
                )))
            }
        };
        let action = patch
            .get("action")
            .and_then(Value::as_str)
            .map(str::to_string);

        let now = Utc::now();
        if execution.waiting_on == Some(WaitKind::Task) {
            if let Some(node_id) = execution.current_node_id.as_deref() {
                if let Some(task) = self.store.find_pending_task(execution_id, node_id).await? {
                    if !task.allowed_actions.is_empty()
                        && !action
                            .as_ref()
                            .is_some_and(|a| task.allowed_actions.contains(a))
                    {
                        return Err(EngineError::InvalidTransition(format!(
                            "action {:?} is not allowed for task {} (allowed: {})",
                            action,
                            task.id,
                            task.allowed_actions.join(", ")
                        )));
                    }

                    let transition = TaskTransition {
                        status: TaskStatus::Completed,
                        action_taken: action.clone(),
                        completed_by: Some(actor_id.to_string()),
                        at: now,
                    };
                    if !self
                        .store
                        .transition_task(task.id, TaskStatus::Pending, &transition)
                        .await?
                    {
                        return Err(EngineError::InvalidTransition(format!(
                            "task {} is no longer pending",
                            task.id
                        )));
                    }
                }
            }
        }

        if let Some(action) = &action {
            patch.insert("lastAction".to_string(), Value::String(action.clone()));
        }
        let keys: Vec<String> = patch.keys().cloned().collect();
        execution.context.merge(patch);
        execution.status = ExecutionStatus::Running;
        execution.resume_at = None;
        execution.waiting_on = None;
        execution.updated_at = now;
        self.store.save_execution(&execution, owner).await?;

        let result = async {
            self.record(
                execution_id,
                execution.current_node_id.as_deref(),
                HistoryEvent::Resumed,
                json!({ "actorId": actor_id, "action": action, "keys": keys }),
            )
            .await?;

            info!(execution_id = %execution_id, actor_id, "Execution resumed");

            let definition = self.load_definition(&execution.workflow_id).await?;
            self.run_loop(&definition, &mut execution, owner).await
        }
        .await;
        self.settle(&mut execution, owner, result).await
    }

    /// Process nodes until the execution pauses or reaches a terminal status.
    async fn run_loop(
        &self,
        definition: &WorkflowDefinition,
        execution: &mut Execution,
        owner: &str,
    ) -> EngineResult<()> {
        let started = Instant::now();
        let mut steps = 0usize;

        loop {
            if let Some(request) = self.store.pending_cancellation(execution.id).await? {
                self.apply_cancellation(execution, owner, &request.actor, &request.reason)
                    .await?;
                break;
            }

            let Some(node_id) = execution.next_node_id.clone() else {
                execution.finish(ExecutionStatus::Completed, Utc::now());
                self.store.save_execution(execution, owner).await?;
                self.record(execution.id, None, HistoryEvent::Completed, json!({ "steps": steps }))
                    .await?;
                info!(execution_id = %execution.id, "Execution completed");
                break;
            };

            if steps >= self.config.max_steps_per_invocation {
                let err = EngineError::Definition(format!(
                    "step budget exhausted after {} nodes",
                    steps
                ));
                self.fail(execution, owner, None, &err).await?;
                break;
            }
            steps += 1;

            let node = match definition.node(&node_id) {
                Ok(node) => node,
                Err(e) => {
                    self.fail(execution, owner, None, &e).await?;
                    break;
                }
            };
            execution.current_node_id = Some(node_id.clone());

            let input = NodeInput {
                execution_id: execution.id,
                definition,
                node,
                context: &execution.context,
                now: Utc::now(),
            };

            let outcome = match self.registry.dispatch(&input).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.fail(execution, owner, Some(&node_id), &e).await?;
                    if e.is_node_failure() {
                        break;
                    }
                    return Err(e);
                }
            };

            if let Some(updates) = outcome.context_updates {
                execution.context.merge(updates);
            }
            self.record(execution.id, Some(&node_id), outcome.event, outcome.detail)
                .await?;

            execution.next_node_id = outcome.next_node_id;
            execution.updated_at = Utc::now();

            if outcome.should_pause {
                execution.status = ExecutionStatus::Paused;
                execution.resume_at = outcome.resume_at;
                execution.waiting_on = outcome.wait;
                self.store.save_execution(execution, owner).await?;
                self.record(
                    execution.id,
                    Some(&node_id),
                    HistoryEvent::Paused,
                    json!({
                        "resumeAt": execution.resume_at,
                        "waitingOn": execution.waiting_on,
                        "nextNodeId": execution.next_node_id,
                    }),
                )
                .await?;
                debug!(execution_id = %execution.id, node_id = %node_id, "Execution paused");

                if let Some(request) = self.store.pending_cancellation(execution.id).await? {
                    self.apply_cancellation(execution, owner, &request.actor, &request.reason)
                        .await?;
                }
                break;
            }

            self.store.save_execution(execution, owner).await?;
        }

        let duration = started.elapsed();
        info!(
            target: "flowgate.performance",
            execution_id = %execution.id,
            steps,
            status = %execution.status,
            duration_ms = %duration.as_millis(),
            "Step loop finished"
        );

        Ok(())
    }

    async fn fail(
        &self,
        execution: &mut Execution,
        owner: &str,
        node_id: Option<&str>,
        err: &EngineError,
    ) -> EngineResult<()> {
        error!(
            execution_id = %execution.id,
            node_id = node_id.unwrap_or("-"),
            kind = err.kind(),
            error = %err,
            "Execution failed"
        );

        execution.error = Some(err.to_string());
        execution.finish(ExecutionStatus::Failed, Utc::now());
        self.store.save_execution(execution, owner).await?;
        self.record(
            execution.id,
            node_id,
            HistoryEvent::Failed,
            json!({ "kind": err.kind(), "message": err.to_string() }),
        )
        .await
    }

    /// Fail an execution that an escaping error would otherwise leave RUNNING.
    async fn settle(&self, execution: &mut Execution, owner: &str, result: EngineResult<()>) -> EngineResult<()> {
        let Err(err) = result else {
            return Ok(());
        };
        if execution.status == ExecutionStatus::Running {
            let node_id = execution.current_node_id.clone();
            if let Err(e) = self.fail(execution, owner, node_id.as_deref(), &err).await {
                warn!(execution_id = %execution.id, error = %e, "Could not mark execution failed");
            }
        }
        Err(err)
    }

    async fn apply_cancellation(
        &self,
        execution: &mut Execution,
        owner: &str,
        actor_id: &str,
        reason: &str,
    ) -> EngineResult<()> {
        let now = Utc::now();
        execution.finish(ExecutionStatus::Cancelled, now);
        self.store.save_execution(execution, owner).await?;

        let cancel = TaskTransition {
            status: TaskStatus::Cancelled,
            action_taken: None,
            completed_by: Some(actor_id.to_string()),
            at: now,
        };
        for task in self.store.list_tasks(execution.id).await? {
            if task.status == TaskStatus::Pending {
                self.store
                    .transition_task(task.id, TaskStatus::Pending, &cancel)
                    .await?;
            }
        }

        self.record(
            execution.id,
            execution.current_node_id.as_deref(),
            HistoryEvent::Cancelled,
            json!({ "actorId": actor_id, "reason": reason }),
        )
        .await?;

        info!(execution_id = %execution.id, actor_id, reason, "Execution cancelled");
        Ok(())
    }

    fn trigger_matches(&self, definition: &WorkflowDefinition, context: &ExecutionContext) -> bool {
        match &definition.trigger_conditions {
            None | Some(Value::Null) => true,
            Some(Value::String(expression)) => {
                match self.evaluator.evaluate(expression, context.as_map()) {
                    Ok(matched) => matched,
                    Err(e) => {
                        warn!(workflow_id = %definition.id, error = %e, "Invalid trigger condition");
                        false
                    }
                }
            }
            Some(Value::Object(expected)) => expected.iter().all(|(path, value)| {
                match context.lookup(path) {
                    Some(Value::Number(actual)) => value.as_f64() == actual.as_f64(),
                    Some(actual) => actual == value,
                    None => value.is_null(),
                }
            }),
            Some(other) => {
                warn!(workflow_id = %definition.id, conditions = %other, "Unsupported trigger conditions");
                false
            }
        }
    }

    async fn record(
        &self,
        execution_id: Uuid,
        node_id: Option<&str>,
        event: HistoryEvent,
        detail: Value,
    ) -> EngineResult<()> {
        let entry = HistoryEntry::new(execution_id, node_id, event, detail, Utc::now());
        self.store.append_history(&entry).await
    }

    async fn load_definition(&self, workflow_id: &str) -> EngineResult<WorkflowDefinition> {
        self.store
            .load_workflow_definition(workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("workflow definition '{}'", workflow_id)))
    }

    async fn load_execution(&self, execution_id: Uuid) -> EngineResult<Execution> {
        self.store
            .load_execution(execution_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("execution {}", execution_id)))
    }

    /// Unique per invocation, so two calls in one process exclude each other.
    fn lease_owner(&self) -> String {
        format!("{}/{}", self.config.instance_id, Uuid::new_v4())
    }

    pub(crate) async fn acquire(&self, execution_id: Uuid) -> EngineResult<String> {
        let owner = self.lease_owner();
        if self
            .store
            .try_lock_execution(execution_id, &owner, self.config.lock_ttl())
            .await?
        {
            Ok(owner)
        } else {
            Err(EngineError::ExecutionLocked(execution_id))
        }
    }

    pub(crate) async fn release(&self, execution_id: Uuid, owner: &str) {
        let _ = self
            .store
            .release_execution(execution_id, owner)
            .await
            .log("releasing execution lease");
    }
}

/// PENDING counts as in flight: it is only visible while the starting
/// invocation holds the lease.
fn ensure_cancellable(execution: &Execution) -> EngineResult<()> {
    match execution.status {
        ExecutionStatus::Pending | ExecutionStatus::Running | ExecutionStatus::Paused => Ok(()),
        status => Err(EngineError::InvalidTransition(format!(
            "execution {} is {} and cannot be cancelled",
            execution.id, status
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::visited_nodes;
    use crate::testing;
    use std::time::Duration;

    fn scenario_definition() -> WorkflowDefinition {
        testing::definition(json!({
            "id": "purchase-approval",
            "triggerType": "REQUEST_CREATED",
            "isDefault": true,
            "rootNodeId": "root",
            "nodes": {
                "root": {"id": "root", "type": "decision", "config": {
                    "condition": "request.priority == 'URGENT'",
                    "trueNodeId": "approve",
                    "falseNodeId": "assign"
                }},
                "approve": {"id": "approve", "type": "action", "config": {"action": "AUTO_APPROVE"}},
                "assign": {"id": "assign", "type": "assignment", "config": {
                    "assignTo": "role:site-manager",
                    "slaHours": 24,
                    "allowedActions": ["approve", "reject"]
                }, "next": "done"}
            }
        }))
    }

    async fn engine_with(definitions: Vec<WorkflowDefinition>) -> (testing::TestDeps, WorkflowEngine) {
        let deps = testing::deps();
        for definition in &definitions {
            deps.store.save_workflow_definition(definition).await.unwrap();
        }
        let engine = deps.engine();
        (deps, engine)
    }

    fn events(history: &[HistoryEntry]) -> Vec<HistoryEvent> {
        history.iter().map(|e| e.event).collect()
    }

    #[tokio::test]
    async fn test_urgent_request_is_auto_approved() {
        let (deps, engine) = engine_with(vec![scenario_definition()]).await;

        let id = engine
            .start_execution("purchase-approval", json!({"request": {"priority": "URGENT"}}))
            .await
            .unwrap();

        let status = engine.get_execution_status(id).await.unwrap();
        assert_eq!(status.status, ExecutionStatus::Completed);
        assert_eq!(status.current_node_id.as_deref(), Some("approve"));

        let history = engine.history(id).await.unwrap();
        assert_eq!(visited_nodes(&history), vec!["root", "approve"]);
        assert_eq!(
            events(&history),
            vec![
                HistoryEvent::Started,
                HistoryEvent::DecisionEvaluated,
                HistoryEvent::ActionExecuted,
                HistoryEvent::Completed,
            ]
        );
        assert_eq!(history[1].detail["result"], json!(true));
        assert_eq!(history[2].detail["action"], json!("AUTO_APPROVE"));
        assert_eq!(deps.domain.calls(), vec!["approve:-".to_string()]);
        assert!(deps.store.list_tasks(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_normal_request_pauses_on_assignment() {
        let (deps, engine) = engine_with(vec![scenario_definition()]).await;
        let before = Utc::now();

        let id = engine
            .start_execution("purchase-approval", json!({"request": {"priority": "NORMAL"}}))
            .await
            .unwrap();

        let status = engine.get_execution_status(id).await.unwrap();
        assert_eq!(status.status, ExecutionStatus::Paused);
        assert_eq!(status.current_node_id.as_deref(), Some("assign"));

        let tasks = deps.store.list_tasks(id).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].assign_to, "role:site-manager");
        assert_eq!(tasks[0].status, TaskStatus::Pending);
        let deadline = tasks[0].sla_deadline.unwrap();
        assert!((deadline - (before + chrono::Duration::hours(24))).num_seconds().abs() < 5);
        assert_eq!(status.resume_at, Some(deadline));

        assert!(deps.domain.calls().is_empty());
    }

    #[tokio::test]
    async fn test_resume_completes_task_then_fails_on_undefined_next() {
        let (deps, engine) = engine_with(vec![scenario_definition()]).await;
        let id = engine
            .start_execution("purchase-approval", json!({"request": {"priority": "NORMAL"}}))
            .await
            .unwrap();

        engine
            .resume_execution(id, "u-7", json!({"action": "approve", "comment": "ok"}))
            .await
            .unwrap();

        let tasks = deps.store.list_tasks(id).await.unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Completed);
        assert_eq!(tasks[0].action_taken.as_deref(), Some("approve"));
        assert_eq!(tasks[0].completed_by.as_deref(), Some("u-7"));

        let status = engine.get_execution_status(id).await.unwrap();
        assert_eq!(status.status, ExecutionStatus::Failed);
        assert_eq!(status.context.lookup_str("lastAction").as_deref(), Some("approve"));
        assert_eq!(status.context.lookup_str("comment").as_deref(), Some("ok"));
        assert!(status.error.unwrap().contains("'done'"));

        let history = engine.history(id).await.unwrap();
        let failed = history.last().unwrap();
        assert_eq!(failed.event, HistoryEvent::Failed);
        assert_eq!(failed.detail["kind"], json!("definition_error"));
    }

    #[tokio::test]
    async fn test_disallowed_action_changes_nothing() {
        let (deps, engine) = engine_with(vec![scenario_definition()]).await;
        let id = engine
            .start_execution("purchase-approval", json!({"request": {"priority": "NORMAL"}}))
            .await
            .unwrap();
        let history_before = engine.history(id).await.unwrap().len();

        let err = engine
            .resume_execution(id, "u-7", json!({"action": "escalate"}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition(_)));

        assert_eq!(engine.get_execution_status(id).await.unwrap().status, ExecutionStatus::Paused);
        assert_eq!(deps.store.list_tasks(id).await.unwrap()[0].status, TaskStatus::Pending);
        assert_eq!(engine.history(id).await.unwrap().len(), history_before);
    }

    #[tokio::test]
    async fn test_resume_is_noop_unless_paused() {
        let (_deps, engine) = engine_with(vec![scenario_definition()]).await;
        let id = engine
            .start_execution("purchase-approval", json!({"request": {"priority": "URGENT"}}))
            .await
            .unwrap();

        let before = engine.get_execution_status(id).await.unwrap();
        let history_before = engine.history(id).await.unwrap().len();

        engine
            .resume_execution(id, "u-1", json!({"action": "approve"}))
            .await
            .unwrap();

        let after = engine.get_execution_status(id).await.unwrap();
        assert_eq!(after.status, before.status);
        assert_eq!(after.context, before.context);
        assert_eq!(engine.history(id).await.unwrap().len(), history_before);
    }

    #[tokio::test]
    async fn test_resume_fails_fast_when_locked() {
        let (deps, engine) = engine_with(vec![scenario_definition()]).await;
        let id = engine
            .start_execution("purchase-approval", json!({"request": {"priority": "NORMAL"}}))
            .await
            .unwrap();

        assert!(deps
            .store
            .try_lock_execution(id, "other-process", Duration::from_secs(60))
            .await
            .unwrap());

        let err = engine
            .resume_execution(id, "u-1", json!({"action": "approve"}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ExecutionLocked(locked) if locked == id));
        assert_eq!(engine.get_execution_status(id).await.unwrap().status, ExecutionStatus::Paused);
    }

    #[tokio::test]
    async fn test_replay_is_deterministic() {
        let (_deps, engine) = engine_with(vec![scenario_definition()]).await;
        let trigger = json!({"request": {"priority": "URGENT"}});

        let first = engine.start_execution("purchase-approval", trigger.clone()).await.unwrap();
        let second = engine.start_execution("purchase-approval", trigger).await.unwrap();

        let a = engine.history(first).await.unwrap();
        let b = engine.history(second).await.unwrap();
        assert_eq!(visited_nodes(&a), visited_nodes(&b));
        assert_eq!(
            engine.get_execution_status(first).await.unwrap().status,
            engine.get_execution_status(second).await.unwrap().status
        );
    }

    #[tokio::test]
    async fn test_missing_branch_fails_at_decision() {
        let definition = testing::definition(json!({
            "id": "broken",
            "rootNodeId": "root",
            "nodes": {
                "root": {"type": "decision", "config": {
                    "condition": "amount > 100",
                    "trueNodeId": "nowhere",
                    "falseNodeId": "root"
                }}
            }
        }));
        let (_deps, engine) = engine_with(vec![definition]).await;

        let id = engine.start_execution("broken", json!({"amount": 500})).await.unwrap();

        let status = engine.get_execution_status(id).await.unwrap();
        assert_eq!(status.status, ExecutionStatus::Failed);
        assert_eq!(status.current_node_id.as_deref(), Some("root"));

        let history = engine.history(id).await.unwrap();
        assert_eq!(
            events(&history),
            vec![HistoryEvent::Started, HistoryEvent::Failed]
        );
        assert_eq!(history[1].node_id.as_deref(), Some("root"));
        assert_eq!(history[1].detail["kind"], json!("definition_error"));
    }

    #[tokio::test]
    async fn test_step_budget_stops_cycles() {
        let definition = testing::definition(json!({
            "id": "loop",
            "rootNodeId": "a",
            "nodes": {
                "a": {"type": "decision", "config": {"condition": "true", "trueNodeId": "b", "falseNodeId": "b"}},
                "b": {"type": "decision", "config": {"condition": "true", "trueNodeId": "a", "falseNodeId": "a"}}
            }
        }));
        let deps = testing::deps();
        deps.store.save_workflow_definition(&definition).await.unwrap();
        let mut config = EngineConfig::default();
        config.max_steps_per_invocation = 5;
        let engine = deps.engine_with(config);

        let id = engine.start_execution("loop", json!({})).await.unwrap();

        let status = engine.get_execution_status(id).await.unwrap();
        assert_eq!(status.status, ExecutionStatus::Failed);
        assert!(status.error.unwrap().contains("step budget"));
        assert_eq!(visited_nodes(&engine.history(id).await.unwrap()).len(), 5);
    }

    #[tokio::test]
    async fn test_integration_timeout_fails_without_context_change() {
        let addr = testing::silent_listener().await;
        let definition = testing::definition(json!({
            "id": "erp-sync",
            "rootNodeId": "call",
            "nodes": {
                "call": {"type": "integration", "config": {
                    "method": "POST",
                    "url": format!("http://{}/sync", addr),
                    "responseKey": "erp",
                    "timeoutMs": 50
                }}
            }
        }));
        let (_deps, engine) = engine_with(vec![definition]).await;
        let trigger = json!({"requestData": {"id": "r-1"}});

        let started = std::time::Instant::now();
        let id = engine.start_execution("erp-sync", trigger.clone()).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));

        let status = engine.get_execution_status(id).await.unwrap();
        assert_eq!(status.status, ExecutionStatus::Failed);
        assert_eq!(status.context.to_value(), trigger);

        let history = engine.history(id).await.unwrap();
        assert_eq!(history.last().unwrap().detail["kind"], json!("integration_error"));
    }

    #[tokio::test]
    async fn test_inactive_and_unknown_definitions() {
        let mut inactive = scenario_definition();
        inactive.is_active = false;
        let (_deps, engine) = engine_with(vec![inactive]).await;

        assert!(matches!(
            engine.start_execution("purchase-approval", json!({})).await,
            Err(EngineError::InactiveWorkflow(_))
        ));
        assert!(matches!(
            engine.start_execution("nope", json!({})).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_paused_execution_cancels_tasks() {
        let (deps, engine) = engine_with(vec![scenario_definition()]).await;
        let id = engine
            .start_execution("purchase-approval", json!({"request": {"priority": "NORMAL"}}))
            .await
            .unwrap();

        engine.cancel_execution(id, "admin", "duplicate request").await.unwrap();

        assert_eq!(engine.get_execution_status(id).await.unwrap().status, ExecutionStatus::Cancelled);
        assert_eq!(deps.store.list_tasks(id).await.unwrap()[0].status, TaskStatus::Cancelled);
        let history = engine.history(id).await.unwrap();
        assert_eq!(history.last().unwrap().event, HistoryEvent::Cancelled);
        assert_eq!(history.last().unwrap().detail["reason"], json!("duplicate request"));

        // Terminal now: further cancel is rejected, resume is a no-op
        assert!(matches!(
            engine.cancel_execution(id, "admin", "again").await,
            Err(EngineError::InvalidTransition(_))
        ));
        engine.resume_execution(id, "u-1", json!({"action": "approve"})).await.unwrap();
        assert_eq!(engine.get_execution_status(id).await.unwrap().status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_while_locked_is_applied_at_next_boundary() {
        let (deps, engine) = engine_with(vec![scenario_definition()]).await;
        let id = engine
            .start_execution("purchase-approval", json!({"request": {"priority": "NORMAL"}}))
            .await
            .unwrap();

        // Simulate a step loop in another process
        deps.store
            .try_lock_execution(id, "other-process", Duration::from_secs(60))
            .await
            .unwrap();
        engine.cancel_execution(id, "admin", "stop").await.unwrap();
        assert_eq!(engine.get_execution_status(id).await.unwrap().status, ExecutionStatus::Paused);
        assert!(deps.store.pending_cancellation(id).await.unwrap().is_some());

        deps.store.release_execution(id, "other-process").await.unwrap();
        engine.resume_execution(id, "u-1", json!({"action": "approve"})).await.unwrap();

        let status = engine.get_execution_status(id).await.unwrap();
        assert_eq!(status.status, ExecutionStatus::Cancelled);
        let history = engine.history(id).await.unwrap();
        assert_eq!(history.last().unwrap().detail["actorId"], json!("admin"));
    }

    #[tokio::test]
    async fn test_start_for_trigger_prefers_matching_definition() {
        let mut vip = scenario_definition();
        vip.id = "vip-approval".to_string();
        vip.is_default = false;
        vip.trigger_conditions = Some(json!({"request.customerTier": "VIP"}));

        let mut big = scenario_definition();
        big.id = "big-approval".to_string();
        big.is_default = false;
        big.trigger_conditions = Some(json!("request.total >= 10000"));

        let (_deps, engine) = engine_with(vec![scenario_definition(), vip, big]).await;

        let id = engine
            .start_for_trigger("REQUEST_CREATED", json!({"request": {"customerTier": "VIP", "total": 5}}))
            .await
            .unwrap();
        assert_eq!(engine.get_execution_status(id).await.unwrap().workflow_id, "vip-approval");

        let id = engine
            .start_for_trigger("REQUEST_CREATED", json!({"request": {"total": 20000}}))
            .await
            .unwrap();
        assert_eq!(engine.get_execution_status(id).await.unwrap().workflow_id, "big-approval");

        let id = engine
            .start_for_trigger("REQUEST_CREATED", json!({"request": {"total": 5}}))
            .await
            .unwrap();
        assert_eq!(engine.get_execution_status(id).await.unwrap().workflow_id, "purchase-approval");

        assert!(matches!(
            engine.start_for_trigger("ORDER_SHIPPED", json!({})).await,
            Err(EngineError::NotFound(_))
        ));
    }

    struct BrokenAction;

    #[async_trait::async_trait]
    impl crate::processors::NodeProcessor for BrokenAction {
        fn node_type(&self) -> crate::definition::NodeType {
            crate::definition::NodeType::Action
        }

        async fn process(&self, _input: &NodeInput<'_>) -> EngineResult<crate::processors::NodeOutcome> {
            Err(EngineError::Internal("store write failed".to_string()))
        }
    }

    #[tokio::test]
    async fn test_processor_error_fails_instead_of_leaving_running() {
        let definition = testing::definition(json!({
            "id": "cooldown",
            "rootNodeId": "wait",
            "nodes": {
                "wait": {"type": "delay", "config": {"delayType": "hours", "delayValue": 0}, "next": "act"},
                "act": {"type": "action", "config": {"action": "FULFILL_REQUEST"}}
            }
        }));
        let deps = testing::deps();
        deps.store.save_workflow_definition(&definition).await.unwrap();
        let mut registry = ProcessorRegistry::with_defaults(deps.processor_deps());
        registry.register(BrokenAction);
        let engine = WorkflowEngine::new(deps.store.clone(), registry, Arc::new(EngineConfig::default()));

        let id = engine.start_execution("cooldown", json!({})).await.unwrap();
        assert_eq!(engine.get_execution_status(id).await.unwrap().status, ExecutionStatus::Paused);

        let err = engine.resume_execution(id, "u-1", Value::Null).await.unwrap_err();
        assert!(matches!(err, EngineError::Internal(_)));

        let status = engine.get_execution_status(id).await.unwrap();
        assert_eq!(status.status, ExecutionStatus::Failed);
        let history = engine.history(id).await.unwrap();
        let failed = history.last().unwrap();
        assert_eq!(failed.event, HistoryEvent::Failed);
        assert_eq!(failed.node_id.as_deref(), Some("act"));
        assert_eq!(failed.detail["kind"], json!("internal_error"));

        // Lease was released and the execution is terminal
        engine.resume_execution(id, "u-1", Value::Null).await.unwrap();
        assert!(deps.store.try_lock_execution(id, "next-owner", Duration::from_secs(1)).await.unwrap());
        assert_eq!(engine.get_execution_status(id).await.unwrap().status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn test_out_of_range_durations_fail_the_execution() {
        let delay = testing::definition(json!({
            "id": "long-wait",
            "rootNodeId": "wait",
            "nodes": {"wait": {"type": "delay", "config": {"delayType": "hours", "delayValue": 1e12}}}
        }));
        let assignment = testing::definition(json!({
            "id": "long-sla",
            "rootNodeId": "assign",
            "nodes": {"assign": {"type": "assignment", "config": {"assignTo": "user:u-1", "slaHours": 1e12}}}
        }));
        let (deps, engine) = engine_with(vec![delay, assignment]).await;

        for workflow_id in ["long-wait", "long-sla"] {
            let id = engine.start_execution(workflow_id, json!({})).await.unwrap();
            let status = engine.get_execution_status(id).await.unwrap();
            assert_eq!(status.status, ExecutionStatus::Failed, "{workflow_id}");
            let history = engine.history(id).await.unwrap();
            assert_eq!(history.last().unwrap().detail["kind"], json!("definition_error"));
            assert!(deps.store.try_lock_execution(id, "next-owner", Duration::from_secs(1)).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_integration_response_flows_into_decision() {
        let addr = testing::serve_once("200 OK", r#"{"inStock": true}"#).await;
        let definition = testing::definition(json!({
            "id": "stock-check",
            "rootNodeId": "check",
            "nodes": {
                "check": {"type": "integration", "config": {
                    "url": format!("http://{}/stock/{{{{ requestData.sku }}}}", addr),
                    "responseKey": "stock"
                }, "next": "route"},
                "route": {"type": "decision", "config": {
                    "condition": "stock.inStock == true",
                    "trueNodeId": "reserve",
                    "falseNodeId": "order"
                }},
                "reserve": {"type": "action", "config": {"action": "RESERVE_STOCK"}},
                "order": {"type": "action", "config": {"action": "CREATE_PR", "vendorId": "v-1"}}
            }
        }));
        let (deps, engine) = engine_with(vec![definition]).await;

        let id = engine
            .start_execution("stock-check", json!({"requestData": {"id": "r-2", "sku": "A1"}}))
            .await
            .unwrap();

        let status = engine.get_execution_status(id).await.unwrap();
        assert_eq!(status.status, ExecutionStatus::Completed);
        assert_eq!(status.context.lookup("stock.inStock"), Some(&json!(true)));
        assert_eq!(
            visited_nodes(&engine.history(id).await.unwrap()),
            vec!["check", "route", "reserve"]
        );
        assert_eq!(deps.domain.calls(), vec!["reserve:r-2".to_string()]);
    }
}
