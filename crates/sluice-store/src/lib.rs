//! Sluice Store
//!
//! This crate provides the storage trait and SQLite implementation for the
//! state a long-running pipeline must keep across restarts:
//! - the current run of every unit, keyed by `(unit name, kind)`
//! - closed runs (history)
//! - per-trigger arm state and fired generation, keyed by `(workflow, trigger)`
//! - the current generation of each workflow

mod sqlite;
mod types;

pub use sqlite::SqliteStore;
pub use types::{RunRecord, TriggerRecord, UnitRecord};

use async_trait::async_trait;
use sluice_workflow::UnitKind;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("migration failed: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Storage trait for registry and trigger state.
#[async_trait]
pub trait Store: Send + Sync {
  /// Insert or replace the current run of a unit.
  async fn save_unit(&self, unit: &UnitRecord) -> Result<(), Error>;

  /// Get the stored record of a unit.
  async fn get_unit(&self, unit_name: &str, kind: UnitKind) -> Result<UnitRecord, Error>;

  /// List every stored unit.
  async fn list_units(&self) -> Result<Vec<UnitRecord>, Error>;

  /// Append a closed run to history. Re-appending the same run is a no-op.
  async fn append_run(&self, run: &RunRecord) -> Result<(), Error>;

  /// List closed runs of a unit, oldest first.
  async fn list_runs(&self, unit_name: &str, kind: UnitKind) -> Result<Vec<RunRecord>, Error>;

  /// Insert or replace a trigger's state.
  async fn save_trigger(&self, trigger: &TriggerRecord) -> Result<(), Error>;

  /// List trigger states for a workflow.
  async fn list_triggers(&self, workflow_name: &str) -> Result<Vec<TriggerRecord>, Error>;

  /// Record the current generation of a workflow.
  async fn save_generation(&self, workflow_name: &str, generation: i64) -> Result<(), Error>;

  /// Get the current generation of a workflow, if one was recorded.
  async fn get_generation(&self, workflow_name: &str) -> Result<Option<i64>, Error>;
}
