use async_trait::async_trait;
use serde_json::json;

use super::{config_mismatch, NodeInput, NodeOutcome, NodeProcessor};
use crate::condition::ConditionEvaluator;
use crate::definition::{NodeKind, NodeType};
use crate::engine::state::HistoryEvent;
use crate::error::{EngineError, EngineResult};

/// Chooses between two branches using the condition evaluator.
#[derive(Debug, Default)]
pub struct DecisionProcessor {
    evaluator: ConditionEvaluator,
}

impl DecisionProcessor {
    pub fn new() -> Self {
        Self {
            evaluator: ConditionEvaluator::new(),
        }
    }
}

#[async_trait]
impl NodeProcessor for DecisionProcessor {
    fn node_type(&self) -> NodeType {
        NodeType::Decision
    }

    async fn process(&self, input: &NodeInput<'_>) -> EngineResult<NodeOutcome> {
        let NodeKind::Decision(config) = &input.node.kind else {
            return Err(config_mismatch(input.node, NodeType::Decision));
        };

        let result = self
            .evaluator
            .evaluate(&config.condition, input.context.as_map())?;

        let (label, branch) = if result {
            ("trueNodeId", &config.true_node_id)
        } else {
            ("falseNodeId", &config.false_node_id)
        };

        let next = branch.as_deref().ok_or_else(|| {
            EngineError::Definition(format!(
                "decision node '{}' has no {}",
                input.node.id, label
            ))
        })?;

        if !input.definition.nodes.contains_key(next) {
            return Err(EngineError::Definition(format!(
                "decision node '{}' branches to undefined node '{}'",
                input.node.id, next
            )));
        }

        tracing::debug!(
            execution_id = %input.execution_id,
            node_id = %input.node.id,
            result,
            next = %next,
            "Decision evaluated"
        );

        Ok(NodeOutcome::advance(
            Some(next.to_string()),
            HistoryEvent::DecisionEvaluated,
            json!({
                "condition": config.condition,
                "result": result,
                "nextNodeId": next,
            }),
        ))
    }
}
