use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Map, Value};

use super::{config_mismatch, NodeInput, NodeOutcome, NodeProcessor};
use crate::definition::{NodeKind, NodeType};
use crate::engine::state::HistoryEvent;
use crate::error::{EngineError, EngineResult};
use crate::template::TemplateRenderer;

/// Issues one outbound HTTP call with a hard timeout.
///
/// Any failure leaves the context untouched. On success the response body
/// (JSON, or the raw text) is stored under `responseKey`.
pub struct IntegrationProcessor {
    client: reqwest::Client,
    renderer: Arc<TemplateRenderer>,
    default_timeout_ms: u64,
}

impl IntegrationProcessor {
    pub fn new(client: reqwest::Client, renderer: Arc<TemplateRenderer>, default_timeout_ms: u64) -> Self {
        Self {
            client,
            renderer,
            default_timeout_ms,
        }
    }
}

#[async_trait]
impl NodeProcessor for IntegrationProcessor {
    fn node_type(&self) -> NodeType {
        NodeType::Integration
    }

    async fn process(&self, input: &NodeInput<'_>) -> EngineResult<NodeOutcome> {
        let NodeKind::Integration(config) = &input.node.kind else {
            return Err(config_mismatch(input.node, NodeType::Integration));
        };

        let method = Method::from_bytes(config.method.to_ascii_uppercase().as_bytes()).map_err(|_| {
            EngineError::Definition(format!(
                "integration node '{}': invalid HTTP method '{}'",
                input.node.id, config.method
            ))
        })?;

        let ctx = input.context.as_map();
        let url = self.renderer.render(&config.url, ctx)?;
        let timeout_ms = config.timeout_ms.unwrap_or(self.default_timeout_ms);
        let timeout = Duration::from_millis(timeout_ms);

        let mut request = self
            .client
            .request(method.clone(), &url)
            .timeout(timeout);

        for (key, value) in &config.headers {
            request = request.header(key.as_str(), self.renderer.render(value, ctx)?);
        }

        if let Some(body) = &config.body {
            request = match self.renderer.render_value(body, ctx)? {
                Value::String(text) => request.body(text),
                other => request.json(&other),
            };
        }

        tracing::debug!(
            execution_id = %input.execution_id,
            node_id = %input.node.id,
            method = %method,
            url = %url,
            timeout_ms,
            "Calling integration"
        );

        let call = async {
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        let (status, text) = match tokio::time::timeout(timeout, call).await {
            Err(_) => {
                return Err(EngineError::Integration(format!(
                    "{} {} timed out after {}ms",
                    method, url, timeout_ms
                )))
            }
            Ok(Err(e)) if e.is_timeout() => {
                return Err(EngineError::Integration(format!(
                    "{} {} timed out after {}ms",
                    method, url, timeout_ms
                )))
            }
            Ok(Err(e)) => {
                return Err(EngineError::Integration(format!(
                    "{} {} failed: {}",
                    method, url, e
                )))
            }
            Ok(Ok(result)) => result,
        };

        if !status.is_success() {
            return Err(EngineError::Integration(format!(
                "{} {} returned HTTP {}",
                method,
                url,
                status.as_u16()
            )));
        }

        let body: Value = serde_json::from_str(&text).unwrap_or(json!(text));

        let mut outcome = NodeOutcome::advance(
            input.node.next.clone(),
            HistoryEvent::IntegrationCalled,
            json!({
                "method": method.as_str(),
                "url": url,
                "status": status.as_u16(),
                "responseKey": config.response_key,
            }),
        );

        if let Some(key) = &config.response_key {
            let mut updates = Map::new();
            updates.insert(key.clone(), body);
            outcome = outcome.with_context_updates(updates);
        }

        Ok(outcome)
    }
}
