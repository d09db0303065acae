//! Engine settings.
//!
//! Settings are read from an optional JSON file. Every field has a default so
//! a partial file (or none at all) is valid.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
  pub dispatch: DispatchSettings,
  pub simulation: SimulationSettings,
}

impl EngineSettings {
  pub fn from_json(content: &str) -> Result<Self, ConfigError> {
    Ok(serde_json::from_str(content)?)
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json(&content)
  }
}

/// Retry policy for starting jobs and crawls through the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
  /// Total attempts per action, including the first.
  pub max_attempts: u32,
  pub initial_backoff_ms: u64,
  pub max_backoff_ms: u64,
}

impl Default for DispatchSettings {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      initial_backoff_ms: 100,
      max_backoff_ms: 5_000,
    }
  }
}

impl DispatchSettings {
  /// Exponential backoff before retry number `attempt` (1-based).
  pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
    let factor = 2_u64.saturating_pow(attempt.saturating_sub(1));
    let delay = self.initial_backoff_ms.saturating_mul(factor);
    Duration::from_millis(delay.min(self.max_backoff_ms))
  }
}

/// Settings for the local simulated executor used by `sluice run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
  /// Delay between the simulated lifecycle transitions of a run.
  pub step_delay_ms: u64,
}

impl Default for SimulationSettings {
  fn default() -> Self {
    Self { step_delay_ms: 50 }
  }
}
