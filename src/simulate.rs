//! A local executor that plays out job and crawl runs in-process.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sluice_config::SimulationSettings;
use sluice_engine::{ExecutorError, JobExecutor};
use sluice_registry::JobRegistry;
use sluice_workflow::{RunState, UnitKey};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Reports `RUNNING` one step after a start request, then `SUCCEEDED` (or
/// `FAILED` for units selected with `--fail`) one step later.
pub struct SimulatedExecutor {
  registry: Arc<JobRegistry>,
  step_delay: Duration,
  failing: Vec<String>,
  in_flight: Arc<AtomicUsize>,
  cancel: CancellationToken,
}

impl SimulatedExecutor {
  /// `failing` holds unit names (`transform`) or keys (`job:transform`).
  pub fn new(
    registry: Arc<JobRegistry>,
    settings: &SimulationSettings,
    failing: Vec<String>,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      registry,
      step_delay: Duration::from_millis(settings.step_delay_ms),
      failing,
      in_flight: Arc::new(AtomicUsize::new(0)),
      cancel,
    }
  }

  /// Runs started but not yet finished.
  pub fn in_flight(&self) -> usize {
    self.in_flight.load(Ordering::SeqCst)
  }

  pub fn step_delay(&self) -> Duration {
    self.step_delay
  }

  fn fails(&self, unit: &UnitKey) -> bool {
    self
      .failing
      .iter()
      .any(|selector| *selector == unit.name || *selector == unit.to_string())
  }
}

#[async_trait]
impl JobExecutor for SimulatedExecutor {
  async fn start(&self, unit: &UnitKey) -> Result<String, ExecutorError> {
    if self.cancel.is_cancelled() {
      return Err(ExecutorError::Unavailable {
        message: "simulation stopped".to_string(),
      });
    }

    let run_id = format!("sim-{}", uuid::Uuid::new_v4());
    let outcome = if self.fails(unit) {
      RunState::Failed
    } else {
      RunState::Succeeded
    };

    self.in_flight.fetch_add(1, Ordering::SeqCst);
    let registry = self.registry.clone();
    let in_flight = self.in_flight.clone();
    let cancel = self.cancel.clone();
    let delay = self.step_delay;
    let key = unit.clone();

    tokio::spawn(async move {
      for state in [RunState::Running, outcome] {
        tokio::select! {
          _ = cancel.cancelled() => break,
          _ = tokio::time::sleep(delay) => {}
        }
        if let Err(e) = registry.report_state(&key, state) {
          warn!(unit = %key, error = %e, "simulated report rejected");
          break;
        }
      }
      in_flight.fetch_sub(1, Ordering::SeqCst);
    });

    debug!(unit = %unit, run_id = %run_id, outcome = %outcome, "simulated run started");
    Ok(run_id)
  }
}
