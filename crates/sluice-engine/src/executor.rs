//! The executor boundary.

use async_trait::async_trait;
use sluice_workflow::UnitKey;

use crate::error::ExecutorError;

/// Starts jobs and crawls on behalf of the scheduler.
///
/// `start` returns once the executor has accepted the request; the run's
/// progress is reported back asynchronously through
/// [`sluice_registry::JobRegistry::report`]. The engine imposes no timeouts,
/// so an executor must eventually report a terminal state for every run it
/// accepts, forcing `FAILED` or `STOPPED` past its own deadline.
#[async_trait]
pub trait JobExecutor: Send + Sync {
  /// Start a run of `unit` and return the executor's run id.
  async fn start(&self, unit: &UnitKey) -> Result<String, ExecutorError>;
}
