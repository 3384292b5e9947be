//! Execution state, the step-loop engine and the SLA sweep.

pub mod state;
pub mod sweep;
mod workflow;

pub use state::{
    visited_nodes, Execution, ExecutionContext, ExecutionStatus, ExecutionStatusView, HistoryEntry,
    HistoryEvent, TaskStatus, TaskTransition, WaitKind, WorkflowTask,
};
pub use sweep::{SlaSweep, SweepReport, SWEEP_ACTOR};
pub use workflow::WorkflowEngine;
