use async_trait::async_trait;
use serde_json::{json, Value};

use super::{config_mismatch, NodeInput, NodeOutcome, NodeProcessor};
use crate::collaborators::{ActionContext, Collaborators};
use crate::definition::{ActionKind, NodeKind, NodeType};
use crate::engine::state::HistoryEvent;
use crate::error::{EngineError, EngineResult};

/// Runs one domain operation and moves on.
pub struct ActionProcessor {
    collaborators: Collaborators,
}

impl ActionProcessor {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

#[async_trait]
impl NodeProcessor for ActionProcessor {
    fn node_type(&self) -> NodeType {
        NodeType::Action
    }

    async fn process(&self, input: &NodeInput<'_>) -> EngineResult<NodeOutcome> {
        let NodeKind::Action(config) = &input.node.kind else {
            return Err(config_mismatch(input.node, NodeType::Action));
        };

        let action: ActionKind = config.action.parse()?;
        let ctx = ActionContext {
            execution_id: input.execution_id,
            node_id: input.node.id.clone(),
            request_id: input.context.lookup_str("requestData.id"),
            context: input.context.as_map().clone(),
        };

        let domain = &self.collaborators.domain;
        let mut detail = json!({ "action": action.to_string() });

        let result = match action {
            ActionKind::AutoApprove => domain.approve_request(&ctx).await,
            ActionKind::AutoReject => {
                detail["reason"] = json!(config.reason);
                domain.reject_request(&ctx, config.reason.as_deref()).await
            }
            ActionKind::FulfillRequest => domain.fulfill_request(&ctx).await,
            ActionKind::CreatePr => {
                let vendor_id = config.vendor_id.as_deref().ok_or_else(|| {
                    EngineError::Definition(format!(
                        "action node '{}': CREATE_PR requires vendorId",
                        input.node.id
                    ))
                })?;
                detail["vendorId"] = json!(vendor_id);
                domain
                    .create_purchase_requisition(&ctx, vendor_id)
                    .await
                    .map(|pr_id| detail["purchaseRequisitionId"] = Value::String(pr_id))
            }
            ActionKind::ReserveStock => domain.reserve_stock(&ctx).await,
            ActionKind::UpdateStatus => {
                let status = config.status.as_deref().ok_or_else(|| {
                    EngineError::Definition(format!(
                        "action node '{}': UPDATE_STATUS requires status",
                        input.node.id
                    ))
                })?;
                detail["status"] = json!(status);
                domain.update_request_status(&ctx, status).await
            }
        };

        result.map_err(|e| {
            EngineError::ActionExecution(format!(
                "{} failed for request {}: {:#}",
                action,
                ctx.request_id.as_deref().unwrap_or("(none)"),
                e
            ))
        })?;

        tracing::info!(
            execution_id = %input.execution_id,
            node_id = %input.node.id,
            action = %action,
            "Action executed"
        );

        Ok(NodeOutcome::advance(
            input.node.next.clone(),
            HistoryEvent::ActionExecuted,
            detail,
        ))
    }
}
