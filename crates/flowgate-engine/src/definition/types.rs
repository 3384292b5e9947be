//! Workflow definition document types.
//!
//! A definition is an arena of nodes keyed by id. Nodes refer to each other
//! only through those ids, so cycles in an authored graph are harmless to
//! the data model and are bounded at run time by the step budget.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, EngineResult};

/// Immutable (per version) workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default = "default_version")]
    pub version: i32,

    /// External event kind that may start this workflow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_type: Option<String>,

    /// Condition expression string, or an object of `path -> expected value`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_conditions: Option<Value>,

    pub nodes: HashMap<String, NodeSpec>,

    pub root_node_id: String,

    #[serde(default)]
    pub is_default: bool,

    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_version() -> i32 {
    1
}

fn default_true() -> bool {
    true
}

impl WorkflowDefinition {
    /// Look up a node, failing with a definition error when it is absent.
    pub fn node(&self, node_id: &str) -> EngineResult<&NodeSpec> {
        self.nodes.get(node_id).ok_or_else(|| {
            EngineError::Definition(format!(
                "node '{}' not found in workflow '{}'",
                node_id, self.id
            ))
        })
    }
}

/// Declared node type tag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    #[serde(alias = "DECISION")]
    Decision,
    #[serde(alias = "ACTION")]
    Action,
    #[serde(alias = "ASSIGNMENT")]
    Assignment,
    #[serde(alias = "NOTIFICATION")]
    Notification,
    #[serde(alias = "DELAY")]
    Delay,
    #[serde(alias = "INTEGRATION")]
    Integration,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeType::Decision => "decision",
            NodeType::Action => "action",
            NodeType::Assignment => "assignment",
            NodeType::Notification => "notification",
            NodeType::Delay => "delay",
            NodeType::Integration => "integration",
        };
        write!(f, "{}", s)
    }
}

/// One node of a definition.
///
/// On the wire this is `{ id, type, config, next? }`; the `config` object is
/// decoded according to `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawNodeSpec", into = "RawNodeSpec")]
pub struct NodeSpec {
    pub id: String,
    pub next: Option<String>,
    pub kind: NodeKind,
}

/// Type-specific node configuration.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Decision(DecisionConfig),
    Action(ActionConfig),
    Assignment(AssignmentConfig),
    Notification(NotificationConfig),
    Delay(DelayConfig),
    Integration(IntegrationConfig),
}

impl NodeSpec {
    pub fn node_type(&self) -> NodeType {
        match self.kind {
            NodeKind::Decision(_) => NodeType::Decision,
            NodeKind::Action(_) => NodeType::Action,
            NodeKind::Assignment(_) => NodeType::Assignment,
            NodeKind::Notification(_) => NodeType::Notification,
            NodeKind::Delay(_) => NodeType::Delay,
            NodeKind::Integration(_) => NodeType::Integration,
        }
    }

    /// Node ids this node can transition to.
    pub fn successors(&self) -> Vec<&str> {
        match &self.kind {
            NodeKind::Decision(config) => config
                .true_node_id
                .iter()
                .chain(config.false_node_id.iter())
                .map(String::as_str)
                .collect(),
            _ => self.next.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawNodeSpec {
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    node_type: NodeType,
    #[serde(default)]
    config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next: Option<String>,
}

impl TryFrom<RawNodeSpec> for NodeSpec {
    type Error = String;

    fn try_from(raw: RawNodeSpec) -> Result<Self, Self::Error> {
        let config = match raw.config {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        fn decode<T: serde::de::DeserializeOwned>(
            id: &str,
            node_type: NodeType,
            config: Value,
        ) -> Result<T, String> {
            serde_json::from_value(config)
                .map_err(|e| format!("node '{}': invalid {} config: {}", id, node_type, e))
        }

        let kind = match raw.node_type {
            NodeType::Decision => NodeKind::Decision(decode(&raw.id, raw.node_type, config)?),
            NodeType::Action => NodeKind::Action(decode(&raw.id, raw.node_type, config)?),
            NodeType::Assignment => NodeKind::Assignment(decode(&raw.id, raw.node_type, config)?),
            NodeType::Notification => {
                NodeKind::Notification(decode(&raw.id, raw.node_type, config)?)
            }
            NodeType::Delay => NodeKind::Delay(decode(&raw.id, raw.node_type, config)?),
            NodeType::Integration => {
                NodeKind::Integration(decode(&raw.id, raw.node_type, config)?)
            }
        };

        Ok(NodeSpec {
            id: raw.id,
            next: raw.next,
            kind,
        })
    }
}

impl From<NodeSpec> for RawNodeSpec {
    fn from(node: NodeSpec) -> Self {
        let node_type = node.node_type();
        let config = match node.kind {
            NodeKind::Decision(c) => serde_json::to_value(c),
            NodeKind::Action(c) => serde_json::to_value(c),
            NodeKind::Assignment(c) => serde_json::to_value(c),
            NodeKind::Notification(c) => serde_json::to_value(c),
            NodeKind::Delay(c) => serde_json::to_value(c),
            NodeKind::Integration(c) => serde_json::to_value(c),
        }
        .unwrap_or_default();

        RawNodeSpec {
            id: node.id,
            node_type,
            config,
            next: node.next,
        }
    }
}

// ============================================================================
// Node configurations
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionConfig {
    pub condition: String,
    #[serde(default)]
    pub true_node_id: Option<String>,
    #[serde(default)]
    pub false_node_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionConfig {
    /// One of the [`ActionKind`] names, checked when the node runs
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentConfig {
    /// `user:<id>`, `role:<name>` or `dynamic:<target>`
    pub assign_to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalate_to: Option<String>,
    #[serde(default)]
    pub allowed_actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayConfig {
    pub delay_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalate_to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationConfig {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_method() -> String {
    "GET".to_string()
}

// ============================================================================
// Closed vocabularies referenced from node configs
// ============================================================================

/// Domain operations an Action node can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    AutoApprove,
    AutoReject,
    FulfillRequest,
    CreatePr,
    ReserveStock,
    UpdateStatus,
}

impl FromStr for ActionKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AUTO_APPROVE" => Ok(ActionKind::AutoApprove),
            "AUTO_REJECT" => Ok(ActionKind::AutoReject),
            "FULFILL_REQUEST" => Ok(ActionKind::FulfillRequest),
            "CREATE_PR" => Ok(ActionKind::CreatePr),
            "RESERVE_STOCK" => Ok(ActionKind::ReserveStock),
            "UPDATE_STATUS" => Ok(ActionKind::UpdateStatus),
            other => Err(EngineError::Definition(format!("unknown action '{}'", other))),
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionKind::AutoApprove => "AUTO_APPROVE",
            ActionKind::AutoReject => "AUTO_REJECT",
            ActionKind::FulfillRequest => "FULFILL_REQUEST",
            ActionKind::CreatePr => "CREATE_PR",
            ActionKind::ReserveStock => "RESERVE_STOCK",
            ActionKind::UpdateStatus => "UPDATE_STATUS",
        };
        write!(f, "{}", s)
    }
}

/// Notification delivery channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Email,
    InApp,
    Sms,
    Slack,
}

impl FromStr for Channel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "email" => Ok(Channel::Email),
            "in_app" => Ok(Channel::InApp),
            "sms" => Ok(Channel::Sms),
            "slack" => Ok(Channel::Slack),
            _ => Err(EngineError::Definition(format!(
                "unknown notification channel '{}'",
                s
            ))),
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Channel::Email => "email",
            Channel::InApp => "in_app",
            Channel::Sms => "sms",
            Channel::Slack => "slack",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayType {
    Hours,
    Days,
    Until,
}

impl FromStr for DelayType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hours" => Ok(DelayType::Hours),
            "days" => Ok(DelayType::Days),
            "until" => Ok(DelayType::Until),
            _ => Err(EngineError::Definition(format!("unknown delay type '{}'", s))),
        }
    }
}

/// Kind of assignment target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AssigneeType {
    User,
    Role,
    Dynamic,
}

impl std::fmt::Display for AssigneeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AssigneeType::User => "user",
            AssigneeType::Role => "role",
            AssigneeType::Dynamic => "dynamic",
        };
        write!(f, "{}", s)
    }
}

/// Parsed `type:value` assignment target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignTarget {
    pub kind: AssigneeType,
    pub value: String,
}

impl FromStr for AssignTarget {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = s.split_once(':').ok_or_else(|| {
            EngineError::Definition(format!("assignment target '{}' is not 'type:value'", s))
        })?;

        let kind = match kind.trim() {
            "user" => AssigneeType::User,
            "role" => AssigneeType::Role,
            "dynamic" => AssigneeType::Dynamic,
            other => {
                return Err(EngineError::Definition(format!(
                    "unknown assignment target type '{}'",
                    other
                )))
            }
        };

        let value = value.trim();
        if value.is_empty() {
            return Err(EngineError::Definition(format!(
                "assignment target '{}' has an empty value",
                s
            )));
        }

        Ok(AssignTarget {
            kind,
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_spec_decodes_by_type() {
        let node: NodeSpec = serde_json::from_value(json!({
            "id": "root",
            "type": "DECISION",
            "config": {
                "condition": "request.priority == 'URGENT'",
                "trueNodeId": "approve",
                "falseNodeId": "assign"
            }
        }))
        .unwrap();

        assert_eq!(node.node_type(), NodeType::Decision);
        assert_eq!(node.successors(), vec!["approve", "assign"]);
        match node.kind {
            NodeKind::Decision(config) => {
                assert_eq!(config.condition, "request.priority == 'URGENT'")
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_node_spec_rejects_bad_config() {
        let result: Result<NodeSpec, _> = serde_json::from_value(json!({
            "id": "a",
            "type": "assignment",
            "config": { "slaHours": 4 }
        }));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("invalid assignment config"), "{err}");
    }

    #[test]
    fn test_node_spec_serializes_back_to_wire_shape() {
        let node: NodeSpec = serde_json::from_value(json!({
            "id": "call",
            "type": "integration",
            "config": { "url": "http://localhost/x", "responseKey": "erp" },
            "next": "done"
        }))
        .unwrap();

        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["type"], "integration");
        assert_eq!(value["next"], "done");
        assert_eq!(value["config"]["method"], "GET");
        assert_eq!(value["config"]["responseKey"], "erp");
    }

    #[test]
    fn test_assign_target_parse() {
        let target: AssignTarget = "role:site-manager".parse().unwrap();
        assert_eq!(target.kind, AssigneeType::Role);
        assert_eq!(target.value, "site-manager");

        assert!("team:ops".parse::<AssignTarget>().is_err());
        assert!("user:".parse::<AssignTarget>().is_err());
        assert!("nobody".parse::<AssignTarget>().is_err());
    }

    #[test]
    fn test_vocabularies() {
        assert_eq!("CREATE_PR".parse::<ActionKind>().unwrap(), ActionKind::CreatePr);
        assert!("DELETE_EVERYTHING".parse::<ActionKind>().is_err());
        assert_eq!("in_app".parse::<Channel>().unwrap(), Channel::InApp);
        assert!("pigeon".parse::<Channel>().is_err());
        assert_eq!("DAYS".parse::<DelayType>().unwrap(), DelayType::Days);
        assert!("weeks".parse::<DelayType>().is_err());
    }
}
