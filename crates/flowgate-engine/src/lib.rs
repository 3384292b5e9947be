//! Flowgate Engine Library
//!
//! A durable workflow engine for approval and fulfilment processes:
//!
//! - **Definitions**: Node graphs loaded from JSON or YAML and validated at design time
//! - **Step Loop**: Executions advance node by node until they pause or finish
//! - **Human Tasks**: Assignment nodes create tasks with SLA deadlines
//! - **SLA Sweep**: Expired tasks are escalated or expired, due timers resumed
//!
//! ## Architecture
//!
//! An execution is persisted state, never a suspended in-memory continuation.
//! External triggers (`start`, `resume`, the sweep) re-enter a stateless step
//! loop that holds a lease on the execution row for the whole invocation.
//! Processors return a context patch; only the engine applies it.
//!
//! ## Modules
//!
//! - [`condition`]: Boolean expression language used by Decision nodes
//! - [`definition`]: Workflow definition documents and validation
//! - [`processors`]: One processor per node type, and the registry
//! - [`engine`]: The workflow engine and SLA sweep
//! - [`store`]: Persistence contract, in-memory and PostgreSQL stores
//! - [`collaborators`]: Domain, directory and notification interfaces
//!
//! ## Example
//!
//! ```ignore
//! use flowgate_engine::{
//!     config::{DatabaseConfig, EngineConfig},
//!     store::{postgres, PgWorkflowStore},
//!     WorkflowEngine,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = postgres::create_pool(&DatabaseConfig::from_env()?).await?;
//!     let store = Arc::new(PgWorkflowStore::new(pool));
//!     let engine = WorkflowEngine::with_collaborators(store, collaborators, EngineConfig::from_env()?)?;
//!     let id = engine.start_execution("purchase-approval", trigger).await?;
//!     Ok(())
//! }
//! ```

pub mod collaborators;
pub mod condition;
pub mod config;
pub mod definition;
pub mod engine;
pub mod error;
pub mod processors;
pub mod result_ext;
pub mod store;
pub mod template;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{SlaSweep, SweepReport, WorkflowEngine};
pub use error::{EngineError, EngineResult};
pub use result_ext::ResultExt;
