//! Persisted execution state: executions, their context, tasks and history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::condition;
use crate::definition::AssigneeType;
use crate::error::{EngineError, EngineResult};

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Created but not yet started.
    Pending,
    /// Inside a step loop.
    Running,
    /// Waiting for a task, a timer or an explicit resume.
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "PAUSED" => Ok(Self::Paused),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" | "CANCELED" => Ok(Self::Cancelled),
            _ => Err(EngineError::Parse(format!("unknown execution status '{}'", s))),
        }
    }
}

/// What a paused execution is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitKind {
    /// A human task created by an Assignment node.
    Task,
    /// A Delay node timer.
    Timer,
}

impl WaitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitKind::Task => "task",
            WaitKind::Timer => "timer",
        }
    }
}

impl std::str::FromStr for WaitKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(WaitKind::Task),
            "timer" => Ok(WaitKind::Timer),
            other => Err(EngineError::Parse(format!("unknown wait kind '{}'", other))),
        }
    }
}

/// Key/value state of one execution.
///
/// Processors receive a snapshot and return a patch; only the engine merges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext(Map<String, Value>);

impl ExecutionContext {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a context from a trigger payload, which must be a JSON object.
    pub fn from_value(value: Value) -> EngineResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::new()),
            other => Err(EngineError::Parse(format!(
                "execution context must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// Resolve a dotted path such as `requestData.siteId`.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let segments: Vec<&str> = path.split('.').collect();
        condition::lookup(&self.0, &segments)
    }

    /// Resolve a path to a string, accepting numbers as well.
    pub fn lookup_str(&self, path: &str) -> Option<String> {
        match self.lookup(path)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Shallow merge: top-level keys in `patch` replace existing ones.
    pub fn merge(&mut self, patch: Map<String, Value>) {
        for (key, value) in patch {
            self.0.insert(key, value);
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

/// A running, paused or finished instance of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: Uuid,
    pub workflow_id: String,
    pub workflow_version: i32,
    pub status: ExecutionStatus,
    /// Node most recently processed (or being processed)
    pub current_node_id: Option<String>,
    /// Node the step loop continues from on resume
    pub next_node_id: Option<String>,
    pub context: ExecutionContext,
    pub resume_at: Option<DateTime<Utc>>,
    pub waiting_on: Option<WaitKind>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Execution {
    /// New PENDING execution positioned at `root_node_id`.
    pub fn new(
        workflow_id: &str,
        workflow_version: i32,
        root_node_id: &str,
        context: ExecutionContext,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow_id.to_string(),
            workflow_version,
            status: ExecutionStatus::Pending,
            current_node_id: None,
            next_node_id: Some(root_node_id.to_string()),
            context,
            resume_at: None,
            waiting_on: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Mark a terminal status and clear any wait state.
    pub fn finish(&mut self, status: ExecutionStatus, now: DateTime<Utc>) {
        self.status = status;
        self.resume_at = None;
        self.waiting_on = None;
        self.updated_at = now;
        self.completed_at = Some(now);
    }
}

/// Caller-facing projection of an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatusView {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub current_node_id: Option<String>,
    pub context: ExecutionContext,
    pub resume_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Execution> for ExecutionStatusView {
    fn from(execution: &Execution) -> Self {
        Self {
            execution_id: execution.id,
            workflow_id: execution.workflow_id.clone(),
            status: execution.status,
            current_node_id: execution.current_node_id.clone(),
            context: execution.context.clone(),
            resume_at: execution.resume_at,
            error: execution.error.clone(),
        }
    }
}

// ============================================================================
// History
// ============================================================================

/// Kind of history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryEvent {
    Started,
    DecisionEvaluated,
    ActionExecuted,
    TaskCreated,
    NotificationSent,
    DelayScheduled,
    IntegrationCalled,
    Paused,
    Resumed,
    Completed,
    Failed,
    Cancelled,
    TaskEscalated,
    TaskExpired,
}

impl HistoryEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::DecisionEvaluated => "decision_evaluated",
            Self::ActionExecuted => "action_executed",
            Self::TaskCreated => "task_created",
            Self::NotificationSent => "notification_sent",
            Self::DelayScheduled => "delay_scheduled",
            Self::IntegrationCalled => "integration_called",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TaskEscalated => "task_escalated",
            Self::TaskExpired => "task_expired",
        }
    }

    /// Whether this event records a node being processed.
    pub fn is_node_visit(&self) -> bool {
        matches!(
            self,
            Self::DecisionEvaluated
                | Self::ActionExecuted
                | Self::TaskCreated
                | Self::NotificationSent
                | Self::DelayScheduled
                | Self::IntegrationCalled
        )
    }
}

impl std::fmt::Display for HistoryEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for HistoryEvent {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| EngineError::Parse(format!("unknown history event '{}'", s)))
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub node_id: Option<String>,
    pub event: HistoryEvent,
    pub detail: Value,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(
        execution_id: Uuid,
        node_id: Option<&str>,
        event: HistoryEvent,
        detail: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            node_id: node_id.map(str::to_string),
            event,
            detail,
            created_at: now,
        }
    }
}

/// Node ids in the order they were processed.
///
/// A node that failed is included, since processing reached it.
pub fn visited_nodes(entries: &[HistoryEntry]) -> Vec<String> {
    entries
        .iter()
        .filter(|e| e.event.is_node_visit() || e.event == HistoryEvent::Failed)
        .filter_map(|e| e.node_id.clone())
        .collect()
}

// ============================================================================
// Tasks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
    Escalated,
    Expired,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Escalated => "escalated",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "escalated" => Ok(Self::Escalated),
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(EngineError::Parse(format!("unknown task status '{}'", other))),
        }
    }
}

/// A human assignment created by an Assignment node or by escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTask {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub node_id: String,
    /// Target as authored, e.g. `role:site-manager`
    pub assign_to: String,
    pub assignee_type: AssigneeType,
    /// Resolved user id, when the target resolves to one
    pub assignee_id: Option<String>,
    pub task_type: Option<String>,
    pub allowed_actions: Vec<String>,
    pub sla_deadline: Option<DateTime<Utc>>,
    pub escalate_to: Option<String>,
    /// Task this one replaced after an SLA escalation
    pub escalated_from: Option<Uuid>,
    pub status: TaskStatus,
    pub action_taken: Option<String>,
    pub completed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields written when a task leaves `pending`.
#[derive(Debug, Clone)]
pub struct TaskTransition {
    pub status: TaskStatus,
    pub action_taken: Option<String>,
    pub completed_by: Option<String>,
    pub at: DateTime<Utc>,
}

impl TaskTransition {
    pub fn new(status: TaskStatus, at: DateTime<Utc>) -> Self {
        Self {
            status,
            action_taken: None,
            completed_by: None,
            at,
        }
    }
}
