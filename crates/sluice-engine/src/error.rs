//! Engine error types.

use serde::{Deserialize, Serialize};
use sluice_registry::RegistryError;
use sluice_workflow::UnitKey;

/// Errors returned by a job executor when asked to start a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutorError {
  /// The executor refused the start request.
  #[error("start of {unit} rejected: {message}")]
  Rejected { unit: UnitKey, message: String },

  /// The executor could not be reached.
  #[error("executor unavailable: {message}")]
  Unavailable { message: String },
}

/// Errors that can occur while scheduling a workflow.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// A condition or action names a unit that was never registered.
  #[error("trigger '{trigger}' references unregistered unit {unit}")]
  UnknownTarget { trigger: String, unit: UnitKey },

  /// The executor kept rejecting a start request.
  #[error("trigger '{trigger}' failed to start {unit} after {attempts} attempts: {source}")]
  Dispatch {
    trigger: String,
    unit: UnitKey,
    attempts: u32,
    #[source]
    source: ExecutorError,
  },

  /// A trigger was about to fire twice in one generation. This is an
  /// internal invariant violation, not a recoverable condition.
  #[error("trigger '{trigger}' already fired in generation {generation}")]
  DuplicateFire { trigger: String, generation: u64 },

  #[error("trigger not found: {0}")]
  UnknownTrigger(String),

  #[error("workflow not found: {0}")]
  UnknownWorkflow(String),

  #[error("trigger '{0}' is not an on-demand trigger")]
  NotOnDemand(String),

  #[error(transparent)]
  Registry(#[from] RegistryError),

  #[error("store error: {0}")]
  Store(#[from] sluice_store::Error),
}
