//! Runtime trigger state and fire results.

use serde::{Deserialize, Serialize};
use sluice_registry::UnitStatus;
use sluice_workflow::{ArmState, TriggerKind, UnitKey};

use crate::error::{EngineError, ExecutorError};

/// Why a trigger could not fire, or could not finish dispatching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerFailure {
  /// An action names a unit the registry does not know. The trigger stays
  /// armed and is retried on the next relevant event.
  UnknownTarget { unit: UnitKey },

  /// The executor kept rejecting a start request. Actions after `unit` were
  /// not dispatched.
  Dispatch {
    unit: UnitKey,
    attempts: u32,
    error: ExecutorError,
  },
}

impl TriggerFailure {
  pub fn to_error(&self, trigger: &str) -> EngineError {
    match self {
      Self::UnknownTarget { unit } => EngineError::UnknownTarget {
        trigger: trigger.to_string(),
        unit: unit.clone(),
      },
      Self::Dispatch {
        unit,
        attempts,
        error,
      } => EngineError::Dispatch {
        trigger: trigger.to_string(),
        unit: unit.clone(),
        attempts: *attempts,
        source: error.clone(),
      },
    }
  }
}

/// Mutable state of one trigger, guarded by its own lock.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerState {
  pub arm: ArmState,
  /// Generation in which the trigger last fired.
  pub fired_generation: Option<u64>,
  /// Most recent failure in this generation.
  pub failure: Option<TriggerFailure>,
}

impl Default for TriggerState {
  fn default() -> Self {
    Self {
      arm: ArmState::Inactive,
      fired_generation: None,
      failure: None,
    }
  }
}

/// An action the executor accepted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dispatched {
  pub unit: UnitKey,
  pub run_id: String,
  pub attempts: u32,
  /// False when the unit already had an active run, which the executor's
  /// reports for this start will update.
  pub opened_run: bool,
}

/// Result of one compare-and-fire attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FireOutcome {
  /// The trigger moved to `FIRED`. `failure` is set when dispatch stopped
  /// before every action was started.
  Fired {
    generation: u64,
    dispatched: Vec<Dispatched>,
    failure: Option<TriggerFailure>,
  },
  /// The trigger was not armed; nothing happened.
  NotArmed(ArmState),
  /// The predicate does not hold yet.
  Unsatisfied,
  /// The trigger could not fire and stays armed.
  Blocked(TriggerFailure),
}

impl FireOutcome {
  pub fn is_fired(&self) -> bool {
    matches!(self, Self::Fired { .. })
  }
}

/// Fire outcome for a named trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerOutcome {
  pub trigger: String,
  pub outcome: FireOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerStatus {
  pub name: String,
  pub kind: TriggerKind,
  pub arm: ArmState,
  pub fired_generation: Option<u64>,
  pub failure: Option<TriggerFailure>,
  /// Whether this is a final stage of the workflow.
  pub terminal: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
  pub unit: UnitKey,
  #[serde(flatten)]
  pub status: UnitStatus,
}

/// Point-in-time view of a workflow run.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStatus {
  pub workflow: String,
  pub generation: u64,
  pub triggers: Vec<TriggerStatus>,
  pub units: Vec<UnitReport>,
}

impl WorkflowStatus {
  /// The pipeline finished: every terminal trigger fired in this generation
  /// and every unit it started succeeded.
  pub fn complete(&self) -> bool {
    let mut terminal = self.triggers.iter().filter(|t| t.terminal).peekable();
    if terminal.peek().is_none() {
      return false;
    }
    terminal.all(|t| t.arm == ArmState::Fired && t.failure.is_none())
      && self
        .units
        .iter()
        .all(|u| u.status.state.is_none_or(|s| s == sluice_workflow::RunState::Succeeded))
  }
}
