use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::json;
use uuid::Uuid;

use super::{config_mismatch, NodeInput, NodeOutcome, NodeProcessor};
use crate::collaborators::{Collaborators, DirectoryLookup};
use crate::config::EngineConfig;
use crate::definition::{AssignTarget, AssigneeType, NodeKind, NodeType};
use crate::engine::state::{ExecutionContext, HistoryEvent, TaskStatus, WaitKind, WorkflowTask};
use crate::error::{EngineError, EngineResult};
use crate::result_ext::OptionExt;
use crate::store::WorkflowStore;

/// Creates a human task and pauses until it is acted on or expires.
pub struct AssignmentProcessor {
    store: Arc<dyn WorkflowStore>,
    collaborators: Collaborators,
    config: Arc<EngineConfig>,
}

impl AssignmentProcessor {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        collaborators: Collaborators,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            collaborators,
            config,
        }
    }
}

#[async_trait]
impl NodeProcessor for AssignmentProcessor {
    fn node_type(&self) -> NodeType {
        NodeType::Assignment
    }

    async fn process(&self, input: &NodeInput<'_>) -> EngineResult<NodeOutcome> {
        let NodeKind::Assignment(config) = &input.node.kind else {
            return Err(config_mismatch(input.node, NodeType::Assignment));
        };

        let target: AssignTarget = config.assign_to.parse()?;
        let assignee_id = resolve_assignee(
            &target,
            input.context,
            self.collaborators.directory.as_ref(),
            self.config.strict_assignment,
        )
        .await?;

        let sla_deadline = config
            .sla_hours
            .map(|hours| deadline_after_hours(input.now, hours))
            .transpose()
            .map_err(|e| EngineError::Definition(format!("assignment node '{}': slaHours {}", input.node.id, e)))?;

        let task = WorkflowTask {
            id: Uuid::new_v4(),
            execution_id: input.execution_id,
            node_id: input.node.id.clone(),
            assign_to: config.assign_to.clone(),
            assignee_type: target.kind,
            assignee_id,
            task_type: config.task_type.clone(),
            allowed_actions: config.allowed_actions.clone(),
            sla_deadline,
            escalate_to: config.escalate_to.clone(),
            escalated_from: None,
            status: TaskStatus::Pending,
            action_taken: None,
            completed_by: None,
            created_at: input.now,
            completed_at: None,
        };
        let task = self.store.upsert_task(&task).await?;

        tracing::info!(
            execution_id = %input.execution_id,
            node_id = %input.node.id,
            task_id = %task.id,
            assign_to = %task.assign_to,
            "Task created"
        );

        Ok(NodeOutcome::pause(
            input.node.next.clone(),
            task.sla_deadline,
            WaitKind::Task,
            HistoryEvent::TaskCreated,
            json!({
                "taskId": task.id,
                "assignTo": task.assign_to,
                "assigneeId": task.assignee_id,
                "slaDeadline": task.sla_deadline,
            }),
        ))
    }
}

/// `now + hours`, at millisecond precision.
///
/// The error names what is wrong with `hours`; callers add the node context.
pub(crate) fn deadline_after_hours(now: DateTime<Utc>, hours: f64) -> Result<DateTime<Utc>, String> {
    let millis = (hours * 3_600_000.0).round();
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return Err(format!("{} is out of range", hours));
    }
    TimeDelta::try_milliseconds(millis as i64)
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| format!("{} is out of range", hours))
}

/// Resolve the user id behind an assignment target.
///
/// Roles without a current holder stay unassigned (the task belongs to the
/// role). Unresolved dynamic targets are logged and left unassigned unless
/// `strict` is set.
pub(crate) async fn resolve_assignee(
    target: &AssignTarget,
    context: &ExecutionContext,
    directory: &dyn DirectoryLookup,
    strict: bool,
) -> EngineResult<Option<String>> {
    match target.kind {
        AssigneeType::User => Ok(Some(target.value.clone())),
        AssigneeType::Role => {
            let site_id = site_id(context);
            match directory
                .resolve_role_assignee(&target.value, site_id.as_deref())
                .await
            {
                Ok(assignee) => Ok(assignee),
                Err(e) => {
                    tracing::warn!(role = %target.value, error = %e, "Role lookup failed");
                    Ok(None)
                }
            }
        }
        AssigneeType::Dynamic => {
            let resolved = resolve_dynamic(&target.value, context, directory).await;
            match resolved {
                Ok(Some(id)) => Ok(Some(id)),
                Ok(None) if strict => Err(EngineError::AssignmentResolution(format!(
                    "dynamic target '{}' could not be resolved",
                    target.value
                ))),
                Ok(None) => Ok(None::<String>.log_none(format!(
                    "dynamic assignment target '{}' unresolved",
                    target.value
                ))),
                Err(e) if strict => Err(EngineError::AssignmentResolution(format!(
                    "dynamic target '{}': {:#}",
                    target.value, e
                ))),
                Err(e) => {
                    tracing::warn!(dynamic_target = %target.value, error = %e, "Dynamic assignment lookup failed");
                    Ok(None)
                }
            }
        }
    }
}

/// Lookup table for `dynamic:` targets.
async fn resolve_dynamic(
    name: &str,
    context: &ExecutionContext,
    directory: &dyn DirectoryLookup,
) -> anyhow::Result<Option<String>> {
    match name {
        "requestor" => Ok(context
            .lookup_str("requestData.requestorId")
            .or_else(|| context.lookup_str("request.requestorId"))),
        "site_manager" => {
            let site_id = site_id(context);
            directory
                .resolve_role_assignee("site_manager", site_id.as_deref())
                .await
        }
        _ => Ok(None),
    }
}

fn site_id(context: &ExecutionContext) -> Option<String> {
    context
        .lookup_str("requestData.siteId")
        .or_else(|| context.lookup_str("request.siteId"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use serde_json::Value;

    async fn run(
        deps: &testing::TestDeps,
        config: Value,
        context: Value,
        strict: bool,
    ) -> EngineResult<(NodeOutcome, Uuid)> {
        let definition = testing::definition(json!({
            "id": "wf",
            "rootNodeId": "assign",
            "nodes": {"assign": {"type": "assignment", "config": config, "next": "done"}}
        }));
        let context = ExecutionContext::from_value(context).unwrap();
        let execution_id = Uuid::new_v4();
        let input = NodeInput {
            execution_id,
            definition: &definition,
            node: definition.node("assign").unwrap(),
            context: &context,
            now: Utc::now(),
        };
        let mut config = EngineConfig::default();
        config.strict_assignment = strict;
        let processor = AssignmentProcessor::new(
            deps.store.clone(),
            deps.collaborators(),
            Arc::new(config),
        );
        processor.process(&input).await.map(|o| (o, execution_id))
    }

    #[tokio::test]
    async fn test_role_assignment_pauses_with_deadline() {
        let deps = testing::deps();
        let before = Utc::now();
        let (outcome, execution_id) = run(
            &deps,
            json!({"assignTo": "role:site-manager", "slaHours": 24}),
            json!({}),
            false,
        )
        .await
        .unwrap();

        assert!(outcome.should_pause);
        assert_eq!(outcome.wait, Some(WaitKind::Task));
        assert_eq!(outcome.next_node_id.as_deref(), Some("done"));

        let tasks = deps.store.list_tasks(execution_id).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].assign_to, "role:site-manager");
        assert_eq!(tasks[0].assignee_type, AssigneeType::Role);

        let deadline = tasks[0].sla_deadline.unwrap();
        assert_eq!(outcome.resume_at, Some(deadline));
        let expected = before + TimeDelta::hours(24);
        assert!((deadline - expected).num_seconds().abs() < 5);
    }

    #[tokio::test]
    async fn test_no_sla_means_no_deadline() {
        let deps = testing::deps();
        let (outcome, _) = run(&deps, json!({"assignTo": "user:u-1"}), json!({}), false)
            .await
            .unwrap();
        assert!(outcome.should_pause);
        assert!(outcome.resume_at.is_none());
        assert_eq!(outcome.detail["assigneeId"], json!("u-1"));
    }

    #[tokio::test]
    async fn test_dynamic_requestor_from_context() {
        let deps = testing::deps();
        let (outcome, _) = run(
            &deps,
            json!({"assignTo": "dynamic:requestor"}),
            json!({"requestData": {"requestorId": "u-42"}}),
            false,
        )
        .await
        .unwrap();
        assert_eq!(outcome.detail["assigneeId"], json!("u-42"));
    }

    #[tokio::test]
    async fn test_dynamic_site_manager_uses_directory() {
        let deps = testing::deps();
        deps.directory.add_role("site_manager", Some("s-1"), "u-mgr");
        let (outcome, _) = run(
            &deps,
            json!({"assignTo": "dynamic:site_manager"}),
            json!({"requestData": {"siteId": "s-1"}}),
            false,
        )
        .await
        .unwrap();
        assert_eq!(outcome.detail["assigneeId"], json!("u-mgr"));
    }

    #[tokio::test]
    async fn test_unresolved_dynamic_target() {
        let deps = testing::deps();
        let (outcome, _) = run(
            &deps,
            json!({"assignTo": "dynamic:requestor_manager"}),
            json!({}),
            false,
        )
        .await
        .unwrap();
        assert!(outcome.should_pause);
        assert_eq!(outcome.detail["assigneeId"], Value::Null);

        let err = run(
            &deps,
            json!({"assignTo": "dynamic:requestor_manager"}),
            json!({}),
            true,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::AssignmentResolution(_)));
    }

    #[test]
    fn test_fractional_hours() {
        let now = Utc::now();
        assert_eq!(deadline_after_hours(now, 0.5), Ok(now + TimeDelta::minutes(30)));
        assert_eq!(deadline_after_hours(now, 0.0), Ok(now));
        assert!(deadline_after_hours(now, 1e12).is_err());
        assert!(deadline_after_hours(now, f64::INFINITY).is_err());
    }

    #[tokio::test]
    async fn test_huge_sla_is_definition_error() {
        let deps = testing::deps();
        let err = run(
            &deps,
            json!({"assignTo": "user:u-1", "slaHours": 1e12}),
            json!({}),
            false,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Definition(ref m) if m.contains("slaHours")), "{err:?}");
    }
}
