use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::enums::{Combinator, LogicalOperator, RunState, TriggerType, UnitKind};
use crate::error::ConfigError;

/// A workflow definition as written by the pipeline author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  /// Jobs and crawls the workflow expects to exist in the registry.
  #[serde(default)]
  pub units: Vec<UnitDef>,
  pub triggers: Vec<TriggerDef>,
}

impl WorkflowDef {
  /// Parse a definition from a JSON string.
  pub fn from_json(content: &str) -> Result<Self, ConfigError> {
    Ok(serde_json::from_str(content)?)
  }

  /// Read and parse a definition file.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json(&content)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitDef {
  pub name: String,
  pub kind: UnitKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDef {
  pub name: String,
  #[serde(rename = "type")]
  pub trigger_type: TriggerType,
  /// When false the trigger exists but is not evaluated until armed.
  #[serde(default)]
  pub start_on_creation: bool,
  pub actions: Vec<ActionDef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub predicate: Option<PredicateDef>,
}

/// An action names exactly one of a job or a crawler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDef {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub job_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub crawler_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredicateDef {
  #[serde(default)]
  pub logical: Combinator,
  pub conditions: Vec<ConditionDef>,
}

/// A single predicate condition.
///
/// Job conditions pair `job_name` with `state`; crawl conditions pair
/// `crawler_name` with either `crawl_state` or `state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionDef {
  #[serde(default)]
  pub logical_operator: LogicalOperator,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub job_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub crawler_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub state: Option<RunState>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub crawl_state: Option<RunState>,
}
