use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a job or crawl run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum RunState {
  Pending,
  Running,
  Succeeded,
  Failed,
  Stopped,
}

impl RunState {
  /// Terminal states need an external restart before the unit moves again.
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Succeeded | Self::Failed | Self::Stopped)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "PENDING",
      Self::Running => "RUNNING",
      Self::Succeeded => "SUCCEEDED",
      Self::Failed => "FAILED",
      Self::Stopped => "STOPPED",
    }
  }
}

impl fmt::Display for RunState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// The kind of runnable unit a name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum UnitKind {
  Job,
  #[serde(alias = "crawler")]
  Crawl,
}

impl UnitKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Job => "job",
      Self::Crawl => "crawl",
    }
  }
}

impl fmt::Display for UnitKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
  /// Fires only through an explicit activation call.
  OnDemand,
  /// Fires when its predicate becomes satisfied.
  Conditional,
}

/// Comparison applied by a single condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicalOperator {
  #[default]
  Equals,
}

/// How the conditions of a predicate are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Combinator {
  #[default]
  And,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_terminal_states() {
    assert!(!RunState::Pending.is_terminal());
    assert!(!RunState::Running.is_terminal());
    assert!(RunState::Succeeded.is_terminal());
    assert!(RunState::Failed.is_terminal());
    assert!(RunState::Stopped.is_terminal());
  }

  #[test]
  fn test_run_state_serializes_upper_case() {
    let json = serde_json::to_string(&RunState::Succeeded).unwrap();
    assert_eq!(json, "\"SUCCEEDED\"");

    let parsed: RunState = serde_json::from_str("\"FAILED\"").unwrap();
    assert_eq!(parsed, RunState::Failed);
  }

  #[test]
  fn test_unit_kind_accepts_crawler_alias() {
    let kind: UnitKind = serde_json::from_str("\"crawler\"").unwrap();
    assert_eq!(kind, UnitKind::Crawl);
    assert_eq!(serde_json::to_string(&kind).unwrap(), "\"crawl\"");
    assert!(serde_json::from_str::<UnitKind>("\"lambda\"").is_err());
  }

  #[test]
  fn test_unknown_combinator_is_rejected() {
    let result: Result<Combinator, _> = serde_json::from_str("\"OR\"");
    assert!(result.is_err());
  }
}
