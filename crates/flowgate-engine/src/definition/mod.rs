//! Workflow definition documents.

mod parser;
pub mod types;

pub use parser::{parse_definition_json, parse_definition_yaml, validate_definition, ValidationReport};
pub use types::{
    ActionConfig, ActionKind, AssignTarget, AssigneeType, AssignmentConfig, Channel, DecisionConfig,
    DelayConfig, DelayType, IntegrationConfig, NodeKind, NodeSpec, NodeType, NotificationConfig,
    WorkflowDefinition,
};
