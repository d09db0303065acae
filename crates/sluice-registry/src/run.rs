use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sluice_workflow::{RunState, UnitKey, UnitKind};

/// One run of a job or crawl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
  pub key: UnitKey,
  pub run_id: String,
  pub state: RunState,
  /// Crawl outcome. Always `None` for jobs.
  pub crawl_state: Option<RunState>,
  pub started_at: DateTime<Utc>,
  pub ended_at: Option<DateTime<Utc>>,
}

impl JobRun {
  pub(crate) fn start(update: &StateUpdate) -> Self {
    Self {
      key: update.key.clone(),
      run_id: uuid::Uuid::new_v4().to_string(),
      state: update.state,
      crawl_state: update.crawl_state,
      started_at: update.at,
      ended_at: update.state.is_terminal().then_some(update.at),
    }
  }
}

/// A state notification from an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
  pub key: UnitKey,
  pub state: RunState,
  pub crawl_state: Option<RunState>,
  pub at: DateTime<Utc>,
}

impl StateUpdate {
  pub fn new(key: UnitKey, state: RunState) -> Self {
    Self {
      key,
      state,
      crawl_state: None,
      at: Utc::now(),
    }
  }

  /// Lifecycle update that mirrors terminal states into the crawl state for
  /// crawls.
  pub fn mirrored(key: UnitKey, state: RunState) -> Self {
    let crawl_state = (key.kind == UnitKind::Crawl && state.is_terminal()).then_some(state);
    Self {
      crawl_state,
      ..Self::new(key, state)
    }
  }

  pub fn with_crawl_state(mut self, crawl_state: RunState) -> Self {
    self.crawl_state = Some(crawl_state);
    self
  }
}

/// Published after every accepted registry mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
  /// Registry-wide mutation sequence number.
  pub seq: u64,
  pub key: UnitKey,
  /// State of the unit's current run before the change, `None` if idle.
  pub previous: Option<RunState>,
  /// The unit's current run after the change.
  pub run: JobRun,
  /// The run closed into history when this change started a new run.
  pub archived: Option<JobRun>,
}
