//! Sluice Engine
//!
//! This crate evaluates workflow triggers against the job registry and
//! dispatches their actions.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowRunner                         │
//! │  - subscribes to JobRegistry state changes                  │
//! │  - start(cancel) runs the event loop                        │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Scheduler                            │
//! │  - finds triggers referencing the changed unit              │
//! │  - compare-and-fire under a per-trigger lock                │
//! │  - activate / arm / reset / cancel                          │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       JobExecutor                           │
//! │  - starts jobs and crawls, retried with backoff             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let registry = Arc::new(JobRegistry::new());
//! let scheduler = Arc::new(Scheduler::new(workflow, registry.clone(), executor));
//!
//! // Subscribe before anything reports state.
//! let runner = WorkflowRunner::new(scheduler.clone());
//! let cancel = CancellationToken::new();
//! tokio::spawn(runner.start(cancel.clone()));
//!
//! scheduler.activate("start").await?;
//! ```

mod error;
mod evaluator;
mod events;
mod executor;
mod persist;
mod runner;
mod scheduler;
mod trigger;

pub use error::{EngineError, ExecutorError};
pub use evaluator::{evaluate, evaluate_condition};
pub use events::{ChannelNotifier, EventNotifier, NoopNotifier, SchedulerEvent};
pub use executor::JobExecutor;
pub use runner::WorkflowRunner;
pub use scheduler::Scheduler;
pub use trigger::{
  Dispatched, FireOutcome, TriggerFailure, TriggerOutcome, TriggerState, TriggerStatus,
  UnitReport, WorkflowStatus,
};

pub use sluice_workflow::ArmState;
