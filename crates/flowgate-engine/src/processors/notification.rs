use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::assignment::resolve_assignee;
use super::{config_mismatch, NodeInput, NodeOutcome, NodeProcessor};
use crate::collaborators::{Collaborators, Notification, UserContact};
use crate::definition::{AssignTarget, Channel, NodeKind, NodeType};
use crate::engine::state::{ExecutionContext, HistoryEvent};
use crate::error::{EngineError, EngineResult};
use crate::template::TemplateRenderer;

const DEFAULT_RECIPIENT: &str = "dynamic:requestor";

/// Sends one message and moves on. Delivery failures do not stop the workflow.
pub struct NotificationProcessor {
    collaborators: Collaborators,
    renderer: Arc<TemplateRenderer>,
}

impl NotificationProcessor {
    pub fn new(collaborators: Collaborators, renderer: Arc<TemplateRenderer>) -> Self {
        Self {
            collaborators,
            renderer,
        }
    }

    /// `sendTo` is either an assignment-style target or a literal address.
    async fn resolve_recipient(
        &self,
        send_to: &str,
        context: &ExecutionContext,
    ) -> anyhow::Result<(String, Option<UserContact>)> {
        let is_target = matches!(
            send_to.split_once(':'),
            Some(("user" | "role" | "dynamic", _))
        );
        if !is_target {
            return Ok((send_to.to_string(), None));
        }

        let target: AssignTarget = send_to.parse()?;
        let user_id = resolve_assignee(&target, context, self.collaborators.directory.as_ref(), false)
            .await?
            .ok_or_else(|| anyhow::anyhow!("recipient '{}' could not be resolved", send_to))?;

        let contact = self.collaborators.directory.resolve_user(&user_id).await?;
        Ok((user_id, contact))
    }
}

#[async_trait]
impl NodeProcessor for NotificationProcessor {
    fn node_type(&self) -> NodeType {
        NodeType::Notification
    }

    async fn process(&self, input: &NodeInput<'_>) -> EngineResult<NodeOutcome> {
        let NodeKind::Notification(config) = &input.node.kind else {
            return Err(config_mismatch(input.node, NodeType::Notification));
        };

        let channel: Channel = config.channel.parse()?;
        let ctx = input.context.as_map();

        let message = match (&config.custom_message, &config.template) {
            (Some(custom), _) => self.renderer.render(custom, ctx)?,
            (None, Some(template)) => self.renderer.render_named(template, ctx)?,
            (None, None) => {
                return Err(EngineError::Definition(format!(
                    "notification node '{}' needs a template or customMessage",
                    input.node.id
                )))
            }
        };

        let send_to = config.send_to.as_deref().unwrap_or(DEFAULT_RECIPIENT);
        let mut detail = json!({
            "channel": channel.to_string(),
            "sendTo": send_to,
            "template": config.template,
        });

        let delivery = async {
            let (recipient, contact) = self.resolve_recipient(send_to, input.context).await?;
            let notification = Notification {
                execution_id: input.execution_id,
                node_id: input.node.id.clone(),
                recipient,
                contact,
                template: config.template.clone(),
                message,
            };

            let notifier = &self.collaborators.notifier;
            match channel {
                Channel::Email => notifier.send_email(&notification).await?,
                Channel::InApp => notifier.send_in_app(&notification).await?,
                Channel::Sms => notifier.send_sms(&notification).await?,
                Channel::Slack => notifier.send_slack(&notification).await?,
            }
            Ok::<_, anyhow::Error>(notification.recipient)
        };

        match delivery.await {
            Ok(recipient) => {
                detail["delivered"] = json!(true);
                detail["recipient"] = json!(recipient);
            }
            Err(e) => {
                tracing::warn!(
                    execution_id = %input.execution_id,
                    node_id = %input.node.id,
                    channel = %channel,
                    error = %e,
                    "Notification not delivered"
                );
                detail["delivered"] = json!(false);
                detail["error"] = json!(format!("{:#}", e));
            }
        }

        Ok(NodeOutcome::advance(
            input.node.next.clone(),
            HistoryEvent::NotificationSent,
            detail,
        ))
    }
}
