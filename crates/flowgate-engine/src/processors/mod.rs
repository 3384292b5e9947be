//! Node processors and the registry that dispatches to them.
//!
//! A processor receives a read-only snapshot of the execution context and
//! returns a [`NodeOutcome`]; the engine alone applies the outcome.

mod action;
mod assignment;
mod decision;
mod delay;
mod integration;
mod notification;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::collaborators::Collaborators;
use crate::config::EngineConfig;
use crate::definition::{NodeSpec, NodeType, WorkflowDefinition};
use crate::engine::state::{ExecutionContext, HistoryEvent, WaitKind};
use crate::error::{EngineError, EngineResult};
use crate::store::WorkflowStore;
use crate::template::TemplateRenderer;

pub use action::ActionProcessor;
pub use assignment::AssignmentProcessor;
pub use decision::DecisionProcessor;
pub use delay::DelayProcessor;
pub use integration::IntegrationProcessor;
pub use notification::NotificationProcessor;

pub(crate) use assignment::resolve_assignee;

/// Everything a processor may read for one node visit.
pub struct NodeInput<'a> {
    pub execution_id: Uuid,
    pub definition: &'a WorkflowDefinition,
    pub node: &'a NodeSpec,
    pub context: &'a ExecutionContext,
    pub now: DateTime<Utc>,
}

/// Transition produced by a processor.
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    pub next_node_id: Option<String>,
    pub should_pause: bool,
    pub resume_at: Option<DateTime<Utc>>,
    pub wait: Option<WaitKind>,
    pub context_updates: Option<Map<String, Value>>,
    /// History event recorded for this visit
    pub event: HistoryEvent,
    pub detail: Value,
}

impl NodeOutcome {
    /// Continue to `next_node_id` in the same invocation.
    pub fn advance(next_node_id: Option<String>, event: HistoryEvent, detail: Value) -> Self {
        Self {
            next_node_id,
            should_pause: false,
            resume_at: None,
            wait: None,
            context_updates: None,
            event,
            detail,
        }
    }

    /// Stop the step loop; resumption continues at `next_node_id`.
    pub fn pause(
        next_node_id: Option<String>,
        resume_at: Option<DateTime<Utc>>,
        wait: WaitKind,
        event: HistoryEvent,
        detail: Value,
    ) -> Self {
        Self {
            next_node_id,
            should_pause: true,
            resume_at,
            wait: Some(wait),
            context_updates: None,
            event,
            detail,
        }
    }

    pub fn with_context_updates(mut self, updates: Map<String, Value>) -> Self {
        self.context_updates = Some(updates);
        self
    }
}

/// Strategy for one node type.
#[async_trait]
pub trait NodeProcessor: Send + Sync {
    fn node_type(&self) -> NodeType;

    async fn process(&self, input: &NodeInput<'_>) -> EngineResult<NodeOutcome>;
}

/// Shared dependencies handed to the default processors.
#[derive(Clone)]
pub struct ProcessorDeps {
    pub store: Arc<dyn WorkflowStore>,
    pub collaborators: Collaborators,
    pub renderer: Arc<TemplateRenderer>,
    pub http: reqwest::Client,
    pub config: Arc<EngineConfig>,
}

/// Registry of node processors keyed by node type.
pub struct ProcessorRegistry {
    processors: HashMap<NodeType, Arc<dyn NodeProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            processors: HashMap::new(),
        }
    }

    /// Registry with one processor per node type.
    pub fn with_defaults(deps: ProcessorDeps) -> Self {
        let mut registry = Self::new();
        registry.register(DecisionProcessor::new());
        registry.register(ActionProcessor::new(deps.collaborators.clone()));
        registry.register(AssignmentProcessor::new(
            deps.store.clone(),
            deps.collaborators.clone(),
            deps.config.clone(),
        ));
        registry.register(NotificationProcessor::new(
            deps.collaborators.clone(),
            deps.renderer.clone(),
        ));
        registry.register(DelayProcessor::new());
        registry.register(IntegrationProcessor::new(
            deps.http.clone(),
            deps.renderer.clone(),
            deps.config.default_integration_timeout_ms,
        ));
        registry
    }

    /// Register a processor, replacing any existing one for its type.
    pub fn register<P: NodeProcessor + 'static>(&mut self, processor: P) {
        self.processors.insert(processor.node_type(), Arc::new(processor));
    }

    pub fn get(&self, node_type: NodeType) -> Option<Arc<dyn NodeProcessor>> {
        self.processors.get(&node_type).cloned()
    }

    pub fn has(&self, node_type: NodeType) -> bool {
        self.processors.contains_key(&node_type)
    }

    /// Dispatch a node to the processor registered for its type.
    pub async fn dispatch(&self, input: &NodeInput<'_>) -> EngineResult<NodeOutcome> {
        let node_type = input.node.node_type();
        let processor = self.get(node_type).ok_or_else(|| {
            EngineError::Definition(format!("no processor registered for node type '{}'", node_type))
        })?;
        processor.process(input).await
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("processors", &self.processors.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Error for a node whose config does not match the processor it reached.
fn config_mismatch(node: &NodeSpec, expected: NodeType) -> EngineError {
    EngineError::Definition(format!(
        "node '{}' is a {} node, expected {}",
        node.id,
        node.node_type(),
        expected
    ))
}
