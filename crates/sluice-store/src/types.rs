use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sluice_workflow::{ArmState, RunState, UnitKind};
use sqlx::FromRow;

/// The current run of a unit as stored in the database.
///
/// All run columns are `None` while the unit is idle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct UnitRecord {
  pub unit_name: String,
  pub kind: UnitKind,
  pub run_id: Option<String>,
  pub state: Option<RunState>,
  pub crawl_state: Option<RunState>,
  pub started_at: Option<DateTime<Utc>>,
  pub ended_at: Option<DateTime<Utc>>,
  pub updated_at: DateTime<Utc>,
}

/// A closed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RunRecord {
  pub run_id: String,
  pub unit_name: String,
  pub kind: UnitKind,
  pub state: RunState,
  pub crawl_state: Option<RunState>,
  pub started_at: DateTime<Utc>,
  pub ended_at: Option<DateTime<Utc>>,
}

/// Trigger state within a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TriggerRecord {
  pub workflow_name: String,
  pub trigger_name: String,
  pub arm_state: ArmState,
  pub fired_generation: Option<i64>,
  pub updated_at: DateTime<Utc>,
}
