//! Error types for the Flowgate engine.
//!
//! Node-level failures (definition, condition, integration, action and
//! assignment errors) are fatal to the execution that raised them and are
//! recorded in its history. Infrastructure failures propagate to the caller.

use thiserror::Error;
use uuid::Uuid;

/// Engine-level errors.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed graph: missing node or branch, unknown action/channel/delay type.
    #[error("Definition error: {0}")]
    Definition(String),

    /// Malformed condition expression.
    #[error("Condition syntax error at position {position} in '{expression}': {message}")]
    ConditionSyntax {
        expression: String,
        position: usize,
        message: String,
    },

    /// Well-formed condition that cannot be evaluated against the context.
    #[error("Condition evaluation error: {0}")]
    ConditionEvaluation(String),

    /// Dynamic assignment target could not be resolved.
    #[error("Assignment resolution error: {0}")]
    AssignmentResolution(String),

    /// Outbound integration call failed, timed out or returned non-2xx.
    #[error("Integration error: {0}")]
    Integration(String),

    /// A domain operation reported failure.
    #[error("Action execution error: {0}")]
    ActionExecution(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Workflow definition exists but is not active
    #[error("Workflow is not active: {0}")]
    InactiveWorkflow(String),

    /// Operation not valid in the execution's current state
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    /// Another invocation holds the execution lease
    #[error("Execution {0} is locked by another invocation")]
    ExecutionLocked(Uuid),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Parse error (YAML, JSON, etc.)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable tag stored in history detail payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Definition(_) => "definition_error",
            EngineError::ConditionSyntax { .. } => "condition_syntax_error",
            EngineError::ConditionEvaluation(_) => "condition_evaluation_error",
            EngineError::AssignmentResolution(_) => "assignment_resolution_error",
            EngineError::Integration(_) => "integration_error",
            EngineError::ActionExecution(_) => "action_execution_error",
            EngineError::NotFound(_) => "not_found",
            EngineError::InactiveWorkflow(_) => "inactive_workflow",
            EngineError::InvalidTransition(_) => "invalid_transition",
            EngineError::ExecutionLocked(_) => "execution_locked",
            EngineError::Database(_) => "database_error",
            EngineError::Serialization(_) => "serialization_error",
            EngineError::Parse(_) => "parse_error",
            EngineError::Config(_) => "config_error",
            EngineError::Internal(_) => "internal_error",
        }
    }

    /// Whether this error originates from a node and should fail the execution.
    pub fn is_node_failure(&self) -> bool {
        matches!(
            self,
            EngineError::Definition(_)
                | EngineError::ConditionSyntax { .. }
                | EngineError::ConditionEvaluation(_)
                | EngineError::AssignmentResolution(_)
                | EngineError::Integration(_)
                | EngineError::ActionExecution(_)
        )
    }
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}

impl From<envy::Error> for EngineError {
    fn from(err: envy::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_error_display() {
        let err = EngineError::Definition("node 'x' not found".to_string());
        assert_eq!(err.to_string(), "Definition error: node 'x' not found");
    }

    #[test]
    fn test_condition_syntax_display() {
        let err = EngineError::ConditionSyntax {
            expression: "a ==".to_string(),
            position: 4,
            message: "unexpected end of expression".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Condition syntax error at position 4 in 'a ==': unexpected end of expression"
        );
    }

    #[test]
    fn test_node_failure_classification() {
        assert!(EngineError::Integration("timeout".into()).is_node_failure());
        assert!(EngineError::ActionExecution("no stock".into()).is_node_failure());
        assert!(!EngineError::NotFound("x".into()).is_node_failure());
        assert!(!EngineError::ExecutionLocked(Uuid::nil()).is_node_failure());
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(
            EngineError::ConditionEvaluation("x".into()).kind(),
            "condition_evaluation_error"
        );
        assert_eq!(EngineError::Definition("x".into()).kind(), "definition_error");
    }
}
