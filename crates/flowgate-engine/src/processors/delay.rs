use async_trait::async_trait;
use chrono::Duration;
use serde_json::json;

use super::assignment::deadline_after_hours;
use super::{config_mismatch, NodeInput, NodeOutcome, NodeProcessor};
use crate::definition::{DelayType, NodeKind, NodeType};
use crate::engine::state::{HistoryEvent, WaitKind};
use crate::error::{EngineError, EngineResult};

/// Pauses until a computed instant; the sweep wakes the execution.
#[derive(Debug, Default)]
pub struct DelayProcessor;

impl DelayProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NodeProcessor for DelayProcessor {
    fn node_type(&self) -> NodeType {
        NodeType::Delay
    }

    async fn process(&self, input: &NodeInput<'_>) -> EngineResult<NodeOutcome> {
        let NodeKind::Delay(config) = &input.node.kind else {
            return Err(config_mismatch(input.node, NodeType::Delay));
        };

        let delay_type: DelayType = config.delay_type.parse()?;
        let missing = |field: &str| {
            EngineError::Definition(format!(
                "delay node '{}' ({}) requires {}",
                input.node.id, config.delay_type, field
            ))
        };

        let resume_at = match delay_type {
            DelayType::Until => config.delay_until.ok_or_else(|| missing("delayUntil"))?,
            DelayType::Hours | DelayType::Days => {
                let value = config.delay_value.ok_or_else(|| missing("delayValue"))?;
                if !value.is_finite() || value < 0.0 {
                    return Err(EngineError::Definition(format!(
                        "delay node '{}': delayValue must be a non-negative number",
                        input.node.id
                    )));
                }
                let hours = if delay_type == DelayType::Days { value * 24.0 } else { value };
                deadline_after_hours(input.now, hours).map_err(|e| {
                    EngineError::Definition(format!("delay node '{}': delayValue {}", input.node.id, e))
                })?
            }
        };

        tracing::debug!(
            execution_id = %input.execution_id,
            node_id = %input.node.id,
            resume_at = %resume_at,
            "Delay scheduled"
        );

        Ok(NodeOutcome::pause(
            input.node.next.clone(),
            Some(resume_at),
            WaitKind::Timer,
            HistoryEvent::DelayScheduled,
            json!({
                "delayType": config.delay_type,
                "resumeAt": resume_at,
                "waitMs": (resume_at - input.now).max(Duration::zero()).num_milliseconds(),
                "escalateTo": config.escalate_to,
            }),
        ))
    }
}
