use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sluice_workflow::UnitKind;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::{Error, RunRecord, Store, TriggerRecord, UnitRecord};

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if missing) a database file and run migrations.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// A private in-memory database, migrated. Useful for tests.
  pub async fn in_memory() -> Result<Self, Error> {
    // Every connection to :memory: is a separate database.
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .connect("sqlite::memory:")
      .await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), Error> {
    sqlx::migrate!("./migrations").run(&self.pool).await?;
    Ok(())
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn save_unit(&self, unit: &UnitRecord) -> Result<(), Error> {
    sqlx::query(
      r#"
            INSERT INTO unit_states (unit_name, kind, run_id, state, crawl_state, started_at, ended_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (unit_name, kind) DO UPDATE SET
                run_id = excluded.run_id,
                state = excluded.state,
                crawl_state = excluded.crawl_state,
                started_at = excluded.started_at,
                ended_at = excluded.ended_at,
                updated_at = excluded.updated_at
            "#,
    )
    .bind(&unit.unit_name)
    .bind(unit.kind)
    .bind(&unit.run_id)
    .bind(unit.state)
    .bind(unit.crawl_state)
    .bind(unit.started_at)
    .bind(unit.ended_at)
    .bind(unit.updated_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn get_unit(&self, unit_name: &str, kind: UnitKind) -> Result<UnitRecord, Error> {
    sqlx::query_as(
      r#"
            SELECT unit_name, kind, run_id, state, crawl_state, started_at, ended_at, updated_at
            FROM unit_states
            WHERE unit_name = ? AND kind = ?
            "#,
    )
    .bind(unit_name)
    .bind(kind)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("{}:{}", kind, unit_name)))
  }

  async fn list_units(&self) -> Result<Vec<UnitRecord>, Error> {
    let units = sqlx::query_as(
      r#"
            SELECT unit_name, kind, run_id, state, crawl_state, started_at, ended_at, updated_at
            FROM unit_states
            ORDER BY kind, unit_name
            "#,
    )
    .fetch_all(&self.pool)
    .await?;

    Ok(units)
  }

  async fn append_run(&self, run: &RunRecord) -> Result<(), Error> {
    sqlx::query(
      r#"
            INSERT INTO unit_runs (run_id, unit_name, kind, state, crawl_state, started_at, ended_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (run_id) DO NOTHING
            "#,
    )
    .bind(&run.run_id)
    .bind(&run.unit_name)
    .bind(run.kind)
    .bind(run.state)
    .bind(run.crawl_state)
    .bind(run.started_at)
    .bind(run.ended_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn list_runs(&self, unit_name: &str, kind: UnitKind) -> Result<Vec<RunRecord>, Error> {
    let runs = sqlx::query_as(
      r#"
            SELECT run_id, unit_name, kind, state, crawl_state, started_at, ended_at
            FROM unit_runs
            WHERE unit_name = ? AND kind = ?
            ORDER BY started_at ASC
            "#,
    )
    .bind(unit_name)
    .bind(kind)
    .fetch_all(&self.pool)
    .await?;

    Ok(runs)
  }

  async fn save_trigger(&self, trigger: &TriggerRecord) -> Result<(), Error> {
    sqlx::query(
      r#"
            INSERT INTO trigger_states (workflow_name, trigger_name, arm_state, fired_generation, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (workflow_name, trigger_name) DO UPDATE SET
                arm_state = excluded.arm_state,
                fired_generation = excluded.fired_generation,
                updated_at = excluded.updated_at
            "#,
    )
    .bind(&trigger.workflow_name)
    .bind(&trigger.trigger_name)
    .bind(trigger.arm_state)
    .bind(trigger.fired_generation)
    .bind(trigger.updated_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn list_triggers(&self, workflow_name: &str) -> Result<Vec<TriggerRecord>, Error> {
    let triggers = sqlx::query_as(
      r#"
            SELECT workflow_name, trigger_name, arm_state, fired_generation, updated_at
            FROM trigger_states
            WHERE workflow_name = ?
            ORDER BY trigger_name
            "#,
    )
    .bind(workflow_name)
    .fetch_all(&self.pool)
    .await?;

    Ok(triggers)
  }

  async fn save_generation(&self, workflow_name: &str, generation: i64) -> Result<(), Error> {
    sqlx::query(
      r#"
            INSERT INTO workflow_generations (workflow_name, generation, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (workflow_name) DO UPDATE SET
                generation = excluded.generation,
                updated_at = excluded.updated_at
            "#,
    )
    .bind(workflow_name)
    .bind(generation)
    .bind(Utc::now())
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn get_generation(&self, workflow_name: &str) -> Result<Option<i64>, Error> {
    let generation: Option<(i64,)> = sqlx::query_as(
      r#"
            SELECT generation
            FROM workflow_generations
            WHERE workflow_name = ?
            "#,
    )
    .bind(workflow_name)
    .fetch_optional(&self.pool)
    .await?;

    Ok(generation.map(|(g,)| g))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{Duration, Utc};
  use sluice_workflow::{ArmState, RunState};

  fn unit(name: &str, state: Option<RunState>) -> UnitRecord {
    UnitRecord {
      unit_name: name.to_string(),
      kind: UnitKind::Job,
      run_id: state.map(|_| format!("run-{name}")),
      state,
      crawl_state: None,
      started_at: state.map(|_| Utc::now()),
      ended_at: None,
      updated_at: Utc::now(),
    }
  }

  #[tokio::test]
  async fn test_unit_upsert_and_get() {
    let store = SqliteStore::in_memory().await.unwrap();

    store.save_unit(&unit("extract", Some(RunState::Running))).await.unwrap();
    store.save_unit(&unit("extract", Some(RunState::Succeeded))).await.unwrap();

    let record = store.get_unit("extract", UnitKind::Job).await.unwrap();
    assert_eq!(record.state, Some(RunState::Succeeded));
    assert_eq!(store.list_units().await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_same_name_different_kind_are_distinct() {
    let store = SqliteStore::in_memory().await.unwrap();

    let job = unit("catalog", Some(RunState::Succeeded));
    let crawl = UnitRecord {
      kind: UnitKind::Crawl,
      crawl_state: Some(RunState::Failed),
      ..unit("catalog", Some(RunState::Failed))
    };
    store.save_unit(&job).await.unwrap();
    store.save_unit(&crawl).await.unwrap();

    let stored = store.get_unit("catalog", UnitKind::Crawl).await.unwrap();
    assert_eq!(stored.crawl_state, Some(RunState::Failed));
    assert_eq!(store.list_units().await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_idle_unit_round_trips_nulls() {
    let store = SqliteStore::in_memory().await.unwrap();
    store.save_unit(&unit("load", None)).await.unwrap();

    let record = store.get_unit("load", UnitKind::Job).await.unwrap();
    assert_eq!(record.state, None);
    assert_eq!(record.run_id, None);
  }

  #[tokio::test]
  async fn test_missing_unit_is_not_found() {
    let store = SqliteStore::in_memory().await.unwrap();
    let err = store.get_unit("ghost", UnitKind::Job).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(key) if key == "job:ghost"));
  }

  #[tokio::test]
  async fn test_run_history_is_ordered_and_idempotent() {
    let store = SqliteStore::in_memory().await.unwrap();
    let now = Utc::now();
    let first = RunRecord {
      run_id: "r1".to_string(),
      unit_name: "extract".to_string(),
      kind: UnitKind::Job,
      state: RunState::Failed,
      crawl_state: None,
      started_at: now - Duration::minutes(10),
      ended_at: Some(now - Duration::minutes(9)),
    };
    let second = RunRecord {
      run_id: "r2".to_string(),
      state: RunState::Succeeded,
      started_at: now - Duration::minutes(5),
      ended_at: Some(now),
      ..first.clone()
    };

    store.append_run(&second).await.unwrap();
    store.append_run(&first).await.unwrap();
    store.append_run(&first).await.unwrap();

    let runs = store.list_runs("extract", UnitKind::Job).await.unwrap();
    let ids: Vec<&str> = runs.iter().map(|r| r.run_id.as_str()).collect();
    assert_eq!(ids, vec!["r1", "r2"]);
  }

  #[tokio::test]
  async fn test_trigger_state_and_generation() {
    let store = SqliteStore::in_memory().await.unwrap();
    assert_eq!(store.get_generation("bulk-load").await.unwrap(), None);

    let mut record = TriggerRecord {
      workflow_name: "bulk-load".to_string(),
      trigger_name: "crawl-start".to_string(),
      arm_state: ArmState::Armed,
      fired_generation: None,
      updated_at: Utc::now(),
    };
    store.save_trigger(&record).await.unwrap();

    record.arm_state = ArmState::Fired;
    record.fired_generation = Some(2);
    store.save_trigger(&record).await.unwrap();
    store.save_generation("bulk-load", 2).await.unwrap();

    let triggers = store.list_triggers("bulk-load").await.unwrap();
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].arm_state, ArmState::Fired);
    assert_eq!(triggers[0].fired_generation, Some(2));
    assert_eq!(store.get_generation("bulk-load").await.unwrap(), Some(2));
    assert!(store.list_triggers("other").await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_open_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sluice.db");

    {
      let store = SqliteStore::open(&path).await.unwrap();
      store.save_generation("w", 3).await.unwrap();
    }

    let reopened = SqliteStore::open(&path).await.unwrap();
    assert_eq!(reopened.get_generation("w").await.unwrap(), Some(3));
  }
}
