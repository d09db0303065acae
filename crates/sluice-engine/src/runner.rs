//! Workflow runner driven by registry state changes.
//!
//! The `WorkflowRunner` subscribes to the registry when it is created and
//! hands every change to the [`Scheduler`].

use std::sync::Arc;

use sluice_registry::StateChange;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::EngineError;
use crate::events::{EventNotifier, NoopNotifier};
use crate::scheduler::Scheduler;

/// Runs the scheduler's event loop.
///
/// # Usage
///
/// ```ignore
/// // Subscribe before anything can report state.
/// let runner = WorkflowRunner::new(scheduler.clone());
///
/// let cancel = CancellationToken::new();
/// let handle = tokio::spawn(runner.start(cancel.clone()));
///
/// scheduler.activate("start").await?;
/// // ...
/// cancel.cancel();
/// handle.await??;
/// ```
pub struct WorkflowRunner<N: EventNotifier = NoopNotifier> {
  scheduler: Arc<Scheduler<N>>,
  changes: mpsc::UnboundedReceiver<StateChange>,
}

impl<N: EventNotifier> WorkflowRunner<N> {
  /// Create a runner and subscribe it to the scheduler's registry.
  pub fn new(scheduler: Arc<Scheduler<N>>) -> Self {
    let changes = scheduler.registry().subscribe();
    Self { scheduler, changes }
  }

  pub fn scheduler(&self) -> &Arc<Scheduler<N>> {
    &self.scheduler
  }

  /// Start the event loop.
  ///
  /// Runs until the cancellation token is triggered or the registry is
  /// dropped. Changes are handled one at a time in the order the registry
  /// applied them. Trigger errors are logged and the loop continues; a
  /// duplicate fire ends the loop with an error.
  pub async fn start(mut self, cancel: CancellationToken) -> Result<(), EngineError> {
    let workflow = self.scheduler.workflow().name().to_string();
    info!(workflow = %workflow, "starting workflow runner");

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!(workflow = %workflow, "workflow runner cancelled");
          break;
        }
        change = self.changes.recv() => {
          let Some(change) = change else {
            info!(workflow = %workflow, "registry closed");
            break;
          };

          match self.scheduler.handle_change(&change).await {
            Ok(outcomes) => {
              let fired = outcomes.iter().filter(|o| o.outcome.is_fired()).count();
              debug!(
                workflow = %workflow,
                unit = %change.key,
                evaluated = outcomes.len(),
                fired,
                "change handled"
              );
            }
            Err(e) => {
              error!(workflow = %workflow, error = %e, "workflow runner stopped");
              return Err(e);
            }
          }
        }
      }
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;
  use async_trait::async_trait;
  use sluice_registry::JobRegistry;
  use sluice_workflow::{ActionRef, Condition, Predicate, RunState, Trigger, UnitKey, Workflow};

  use crate::error::ExecutorError;
  use crate::executor::JobExecutor;

  struct AcceptAll;

  #[async_trait]
  impl JobExecutor for AcceptAll {
    async fn start(&self, unit: &UnitKey) -> Result<String, ExecutorError> {
      Ok(format!("run-{}", unit.name))
    }
  }

  fn create_test_scheduler() -> Arc<Scheduler> {
    let workflow = Workflow::new(
      "test-workflow",
      vec![UnitKey::job("a"), UnitKey::job("b")],
      vec![Trigger::conditional(
        "b-start",
        Predicate::all(vec![Condition::state_equals(
          UnitKey::job("a"),
          RunState::Succeeded,
        )])
        .unwrap(),
        vec![ActionRef::start_job("b")],
      )
      .with_start_on_creation(true)],
    )
    .unwrap();
    Arc::new(Scheduler::new(
      workflow,
      Arc::new(JobRegistry::new()),
      Arc::new(AcceptAll),
    ))
  }

  #[tokio::test]
  async fn test_runner_creation() {
    let scheduler = create_test_scheduler();
    let runner = WorkflowRunner::new(scheduler);

    assert_eq!(runner.scheduler().workflow().name(), "test-workflow");
  }

  #[tokio::test]
  async fn test_runner_fires_on_change() {
    let scheduler = create_test_scheduler();
    let runner = WorkflowRunner::new(scheduler.clone());
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(runner.start(cancel.clone()));

    scheduler
      .registry()
      .report_state(&UnitKey::job("a"), RunState::Succeeded)
      .unwrap();

    let b = UnitKey::job("b");
    let mut pending = false;
    for _ in 0..50 {
      if scheduler.registry().get(&b).unwrap() == Some(RunState::Pending) {
        pending = true;
        break;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(pending, "b was never dispatched");

    cancel.cancel();
    handle.await.unwrap().unwrap();
  }

  #[tokio::test]
  async fn test_runner_cancellation() {
    let scheduler = create_test_scheduler();
    let runner = WorkflowRunner::new(scheduler);
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(runner.start(cancel.clone()));
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
    assert!(result.is_ok(), "runner should stop on cancellation");
  }
}
