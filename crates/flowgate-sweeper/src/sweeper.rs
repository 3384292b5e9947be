//! Interval loop around the SLA sweep.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};

use flowgate_engine::collaborators::Collaborators;
use flowgate_engine::config::EngineConfig;
use flowgate_engine::store::WorkflowStore;
use flowgate_engine::{SlaSweep, SweepReport, WorkflowEngine};

use crate::client::RestCollaborators;
use crate::config::SweeperConfig;

pub struct Sweeper {
    config: SweeperConfig,
    sweep: SlaSweep,
}

impl Sweeper {
    /// Wire an engine over `store` with REST collaborators.
    pub fn new(
        config: SweeperConfig,
        mut engine_config: EngineConfig,
        store: Arc<dyn WorkflowStore>,
    ) -> Result<Self> {
        let rest = Arc::new(RestCollaborators::new(
            &config.collaborator_url,
            config.collaborator_timeout,
        )?);
        let collaborators = Collaborators::new(rest.clone(), rest.clone(), rest.clone());

        engine_config.instance_id = config.instance_id.clone();
        let engine = WorkflowEngine::with_collaborators(store, collaborators, engine_config)
            .context("failed to build workflow engine")?;

        Ok(Self {
            config,
            sweep: SlaSweep::new(Arc::new(engine), rest),
        })
    }

    /// One pass at the current time.
    pub async fn tick(&self) -> Result<SweepReport> {
        Ok(self.sweep.run_once(Utc::now()).await?)
    }

    /// Sweep every interval until the future is dropped.
    pub async fn run(&self) -> Result<()> {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            instance_id = %self.config.instance_id,
            interval_secs = self.config.interval.as_secs(),
            "Sweeper running"
        );

        loop {
            ticker.tick().await;
            match self.tick().await {
                Ok(report) if report.failures > 0 => {
                    tracing::warn!(failures = report.failures, "Sweep pass finished with failures");
                }
                Ok(_) => {}
                // Retried on the next tick
                Err(e) => tracing::error!(error = %e, "Sweep pass failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_engine::definition::parse_definition_json;
    use flowgate_engine::engine::ExecutionStatus;
    use flowgate_engine::store::InMemoryStore;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_tick_resumes_due_timer() {
        let store = Arc::new(InMemoryStore::new());
        let definition = parse_definition_json(
            &json!({
                "id": "cooldown",
                "rootNodeId": "wait",
                "nodes": {
                    "wait": {"type": "delay", "config": {"delayType": "hours", "delayValue": 0}}
                }
            })
            .to_string(),
        )
        .unwrap();
        store.save_workflow_definition(&definition).await.unwrap();

        let config = SweeperConfig {
            collaborator_url: "http://127.0.0.1:9".to_string(),
            ..SweeperConfig::default()
        };
        let sweeper = Sweeper::new(config, EngineConfig::default(), store.clone()).unwrap();

        let rest = Arc::new(RestCollaborators::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap());
        let engine = WorkflowEngine::with_collaborators(
            store.clone(),
            Collaborators::new(rest.clone(), rest.clone(), rest),
            EngineConfig::default(),
        )
        .unwrap();
        let id = engine.start_execution("cooldown", json!({})).await.unwrap();

        let report = sweeper.tick().await.unwrap();
        assert_eq!(report.timers_resumed, 1);
        assert_eq!(
            engine.get_execution_status(id).await.unwrap().status,
            ExecutionStatus::Completed
        );
    }
}
