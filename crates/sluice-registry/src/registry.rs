use std::collections::HashMap;

use parking_lot::RwLock;
use sluice_workflow::{RunState, UnitKey, UnitKind};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::RegistryError;
use crate::run::{JobRun, StateChange, StateUpdate};
use crate::snapshot::{RegistrySnapshot, UnitStatus};

#[derive(Debug, Default)]
struct UnitEntry {
  current: Option<JobRun>,
  history: Vec<JobRun>,
}

impl UnitEntry {
  fn status(&self) -> UnitStatus {
    UnitStatus {
      state: self.current.as_ref().map(|run| run.state),
      crawl_state: self.current.as_ref().and_then(|run| run.crawl_state),
    }
  }
}

#[derive(Debug, Default)]
struct Inner {
  units: HashMap<UnitKey, UnitEntry>,
  seq: u64,
  subscribers: Vec<mpsc::UnboundedSender<StateChange>>,
}

enum Applied {
  Unchanged,
  Changed { archived: Option<JobRun> },
}

/// Registry of job and crawl runs keyed by `(name, kind)`.
///
/// Share it between the scheduler and executors as `Arc<JobRegistry>`.
#[derive(Debug, Default)]
pub struct JobRegistry {
  inner: RwLock<Inner>,
}

impl JobRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a unit. Returns false if it was already registered.
  pub fn register(&self, key: UnitKey) -> bool {
    let mut inner = self.inner.write();
    if inner.units.contains_key(&key) {
      return false;
    }
    debug!(unit = %key, "unit registered");
    inner.units.insert(key, UnitEntry::default());
    true
  }

  pub fn contains(&self, key: &UnitKey) -> bool {
    self.inner.read().units.contains_key(key)
  }

  /// All registered units, sorted.
  pub fn keys(&self) -> Vec<UnitKey> {
    let mut keys: Vec<UnitKey> = self.inner.read().units.keys().cloned().collect();
    keys.sort();
    keys
  }

  /// Receive every state change applied after this call.
  pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StateChange> {
    let (sender, receiver) = mpsc::unbounded_channel();
    self.inner.write().subscribers.push(sender);
    receiver
  }

  /// Report a lifecycle state and return the previous one.
  ///
  /// For crawls, terminal states are mirrored into the crawl state.
  pub fn report_state(
    &self,
    key: &UnitKey,
    new_state: RunState,
  ) -> Result<Option<RunState>, RegistryError> {
    self.report(StateUpdate::mirrored(key.clone(), new_state))
  }

  /// Apply an executor notification and return the previous lifecycle state.
  ///
  /// - Repeating the current state is a no-op and publishes nothing.
  /// - A non-terminal state on an idle unit, or on a unit whose run is
  ///   terminal, opens a new run; the old one moves to history.
  /// - A terminal run cannot move to a different terminal state.
  pub fn report(&self, update: StateUpdate) -> Result<Option<RunState>, RegistryError> {
    let mut inner = self.inner.write();
    apply_locked(&mut inner, update)
  }

  /// Current lifecycle state, `None` if the unit is idle.
  pub fn get(&self, key: &UnitKey) -> Result<Option<RunState>, RegistryError> {
    let inner = self.inner.read();
    let entry = inner
      .units
      .get(key)
      .ok_or_else(|| RegistryError::NotFound(key.clone()))?;
    Ok(entry.current.as_ref().map(|run| run.state))
  }

  pub fn get_run(&self, key: &UnitKey) -> Result<Option<JobRun>, RegistryError> {
    let inner = self.inner.read();
    let entry = inner
      .units
      .get(key)
      .ok_or_else(|| RegistryError::NotFound(key.clone()))?;
    Ok(entry.current.clone())
  }

  /// Closed runs, oldest first.
  pub fn history(&self, key: &UnitKey) -> Result<Vec<JobRun>, RegistryError> {
    let inner = self.inner.read();
    let entry = inner
      .units
      .get(key)
      .ok_or_else(|| RegistryError::NotFound(key.clone()))?;
    Ok(entry.history.clone())
  }

  pub fn snapshot(&self) -> RegistrySnapshot {
    let inner = self.inner.read();
    RegistrySnapshot {
      seq: inner.seq,
      units: inner
        .units
        .iter()
        .map(|(key, entry)| (key.clone(), entry.status()))
        .collect(),
    }
  }

  /// Snapshot of just `keys`, taken under one read lock.
  ///
  /// Unregistered keys are left out, so `contains` tells them apart.
  pub fn snapshot_of(&self, keys: &[UnitKey]) -> RegistrySnapshot {
    let inner = self.inner.read();
    RegistrySnapshot {
      seq: inner.seq,
      units: keys
        .iter()
        .filter_map(|key| {
          inner
            .units
            .get(key)
            .map(|entry| (key.clone(), entry.status()))
        })
        .collect(),
    }
  }

  /// Force every non-terminal run among `keys` to `STOPPED`.
  ///
  /// Returns the units that were stopped. Unregistered keys are skipped.
  pub fn stop_active(&self, keys: &[UnitKey]) -> Vec<UnitKey> {
    let mut inner = self.inner.write();
    let mut stopped = Vec::new();
    for key in keys {
      let active = inner
        .units
        .get(key)
        .and_then(|entry| entry.current.as_ref())
        .is_some_and(|run| !run.state.is_terminal());
      if !active {
        continue;
      }
      if apply_locked(&mut inner, StateUpdate::mirrored(key.clone(), RunState::Stopped)).is_ok() {
        stopped.push(key.clone());
      }
    }
    if !stopped.is_empty() {
      info!(count = stopped.len(), "stopped active runs");
    }
    stopped
  }

  /// Close the current run of each unit into history, leaving it idle.
  ///
  /// Publishes nothing. Returns the archived runs.
  pub fn archive_all(&self, keys: &[UnitKey]) -> Vec<JobRun> {
    let mut inner = self.inner.write();
    let mut archived = Vec::new();
    for key in keys {
      if let Some(entry) = inner.units.get_mut(key) {
        if let Some(run) = entry.current.take() {
          entry.history.push(run.clone());
          archived.push(run);
        }
      }
    }
    archived
  }

  /// Load a persisted current run without publishing a change.
  pub fn restore(&self, run: JobRun) {
    let mut inner = self.inner.write();
    let entry = inner.units.entry(run.key.clone()).or_default();
    entry.current = Some(run);
  }
}

fn apply_locked(inner: &mut Inner, mut update: StateUpdate) -> Result<Option<RunState>, RegistryError> {
  if update.key.kind != UnitKind::Crawl {
    update.crawl_state = None;
  }

  let entry = inner
    .units
    .get_mut(&update.key)
    .ok_or_else(|| RegistryError::NotFound(update.key.clone()))?;
  let previous = entry.current.as_ref().map(|run| run.state);

  let applied = match entry.current.as_mut() {
    None => {
      entry.current = Some(JobRun::start(&update));
      Applied::Changed { archived: None }
    }
    Some(run) if !run.state.is_terminal() => {
      let crawl_changed = update.crawl_state.is_some() && update.crawl_state != run.crawl_state;
      if run.state == update.state && !crawl_changed {
        Applied::Unchanged
      } else {
        run.state = update.state;
        if update.crawl_state.is_some() {
          run.crawl_state = update.crawl_state;
        }
        if update.state.is_terminal() {
          run.ended_at = Some(update.at);
        }
        Applied::Changed { archived: None }
      }
    }
    Some(run) if !update.state.is_terminal() => {
      let closed = run.clone();
      entry.history.push(closed.clone());
      entry.current = Some(JobRun::start(&update));
      Applied::Changed {
        archived: Some(closed),
      }
    }
    Some(run) if run.state == update.state => {
      // A crawl outcome may arrive after the lifecycle state.
      if update.crawl_state.is_some() && update.crawl_state != run.crawl_state {
        run.crawl_state = update.crawl_state;
        Applied::Changed { archived: None }
      } else {
        Applied::Unchanged
      }
    }
    Some(run) => {
      return Err(RegistryError::InvalidTransition {
        key: update.key.clone(),
        from: run.state,
        to: update.state,
      });
    }
  };

  let Applied::Changed { archived } = applied else {
    return Ok(previous);
  };

  let Some(run) = entry.current.clone() else {
    return Ok(previous);
  };

  inner.seq += 1;
  let change = StateChange {
    seq: inner.seq,
    key: update.key,
    previous,
    run,
    archived,
  };

  debug!(
    unit = %change.key,
    seq = change.seq,
    previous = ?change.previous,
    state = %change.run.state,
    "unit state changed"
  );

  // Sent under the write lock so per-unit order matches mutation order.
  inner
    .subscribers
    .retain(|subscriber| subscriber.send(change.clone()).is_ok());

  Ok(previous)
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;

  fn registry_with(keys: &[UnitKey]) -> JobRegistry {
    let registry = JobRegistry::new();
    for key in keys {
      registry.register(key.clone());
    }
    registry
  }

  #[test]
  fn test_register_is_idempotent() {
    let registry = JobRegistry::new();
    assert!(registry.register(UnitKey::job("extract")));
    assert!(!registry.register(UnitKey::job("extract")));
    assert!(registry.register(UnitKey::crawl("extract")));
    assert_eq!(registry.keys().len(), 2);
  }

  #[test]
  fn test_unregistered_unit_is_not_found() {
    let registry = JobRegistry::new();
    let key = UnitKey::job("ghost");

    assert!(matches!(registry.get(&key), Err(RegistryError::NotFound(_))));
    assert!(matches!(
      registry.report_state(&key, RunState::Running),
      Err(RegistryError::NotFound(_))
    ));
  }

  #[test]
  fn test_report_returns_previous_state() {
    let key = UnitKey::job("extract");
    let registry = registry_with(&[key.clone()]);

    assert_eq!(registry.get(&key).unwrap(), None);
    assert_eq!(registry.report_state(&key, RunState::Pending).unwrap(), None);
    assert_eq!(
      registry.report_state(&key, RunState::Running).unwrap(),
      Some(RunState::Pending)
    );
    assert_eq!(
      registry.report_state(&key, RunState::Succeeded).unwrap(),
      Some(RunState::Running)
    );

    let run = registry.get_run(&key).unwrap().unwrap();
    assert_eq!(run.state, RunState::Succeeded);
    assert!(run.ended_at.is_some());
    assert_eq!(run.crawl_state, None);
  }

  #[test]
  fn test_restart_archives_terminal_run() {
    let key = UnitKey::job("extract");
    let registry = registry_with(&[key.clone()]);

    registry.report_state(&key, RunState::Pending).unwrap();
    registry.report_state(&key, RunState::Failed).unwrap();
    let first = registry.get_run(&key).unwrap().unwrap();

    registry.report_state(&key, RunState::Pending).unwrap();
    let second = registry.get_run(&key).unwrap().unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(second.state, RunState::Pending);
    assert_eq!(registry.history(&key).unwrap(), vec![first]);
  }

  #[test]
  fn test_terminal_to_other_terminal_is_rejected() {
    let key = UnitKey::job("extract");
    let registry = registry_with(&[key.clone()]);

    registry.report_state(&key, RunState::Running).unwrap();
    registry.report_state(&key, RunState::Succeeded).unwrap();

    assert!(matches!(
      registry.report_state(&key, RunState::Failed),
      Err(RegistryError::InvalidTransition {
        from: RunState::Succeeded,
        to: RunState::Failed,
        ..
      })
    ));
  }

  #[test]
  fn test_crawl_state_is_mirrored_for_crawls_only() {
    let crawl = UnitKey::crawl("catalog");
    let job = UnitKey::job("extract");
    let registry = registry_with(&[crawl.clone(), job.clone()]);

    registry.report_state(&crawl, RunState::Running).unwrap();
    assert_eq!(registry.snapshot().crawl_state(&crawl), None);

    registry.report_state(&crawl, RunState::Succeeded).unwrap();
    registry
      .report(StateUpdate::new(job.clone(), RunState::Succeeded).with_crawl_state(RunState::Failed))
      .unwrap();

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.crawl_state(&crawl), Some(RunState::Succeeded));
    assert_eq!(snapshot.crawl_state(&job), None);
  }

  #[test]
  fn test_late_crawl_state_updates_terminal_run() {
    let crawl = UnitKey::crawl("catalog");
    let registry = registry_with(&[crawl.clone()]);
    let mut events = registry.subscribe();

    registry.report(StateUpdate::new(crawl.clone(), RunState::Running)).unwrap();
    registry.report(StateUpdate::new(crawl.clone(), RunState::Stopped)).unwrap();
    registry
      .report(StateUpdate::new(crawl.clone(), RunState::Stopped).with_crawl_state(RunState::Succeeded))
      .unwrap();

    assert_eq!(registry.snapshot().crawl_state(&crawl), Some(RunState::Succeeded));
    let mut seqs = Vec::new();
    while let Ok(change) = events.try_recv() {
      seqs.push(change.seq);
    }
    assert_eq!(seqs, vec![1, 2, 3]);
  }

  #[test]
  fn test_duplicate_reports_publish_once() {
    let key = UnitKey::job("extract");
    let registry = registry_with(&[key.clone()]);
    let mut events = registry.subscribe();

    registry.report_state(&key, RunState::Succeeded).unwrap();
    registry.report_state(&key, RunState::Succeeded).unwrap();

    let change = events.try_recv().unwrap();
    assert_eq!(change.previous, None);
    assert_eq!(change.run.state, RunState::Succeeded);
    assert!(events.try_recv().is_err());
  }

  #[test]
  fn test_stop_active_only_touches_running_units() {
    let running = UnitKey::job("transform");
    let done = UnitKey::job("extract");
    let idle = UnitKey::job("load");
    let registry = registry_with(&[running.clone(), done.clone(), idle.clone()]);

    registry.report_state(&done, RunState::Succeeded).unwrap();
    registry.report_state(&running, RunState::Running).unwrap();

    let stopped = registry.stop_active(&[running.clone(), done.clone(), idle.clone()]);

    assert_eq!(stopped, vec![running.clone()]);
    assert_eq!(registry.get(&running).unwrap(), Some(RunState::Stopped));
    assert_eq!(registry.get(&done).unwrap(), Some(RunState::Succeeded));
    assert_eq!(registry.get(&idle).unwrap(), None);
  }

  #[test]
  fn test_snapshot_of_copies_only_requested_units() {
    let extract = UnitKey::job("extract");
    let load = UnitKey::job("load");
    let registry = registry_with(&[extract.clone(), load.clone()]);
    registry.report_state(&extract, RunState::Succeeded).unwrap();

    let snapshot = registry.snapshot_of(&[extract.clone(), UnitKey::job("ghost")]);

    assert_eq!(snapshot.state(&extract), Some(RunState::Succeeded));
    assert!(!snapshot.contains(&load));
    assert!(!snapshot.contains(&UnitKey::job("ghost")));
    assert_eq!(snapshot.seq(), 1);
  }

  #[test]
  fn test_archive_all_leaves_units_idle() {
    let key = UnitKey::job("extract");
    let registry = registry_with(&[key.clone()]);
    registry.report_state(&key, RunState::Succeeded).unwrap();

    let archived = registry.archive_all(&[key.clone()]);

    assert_eq!(archived.len(), 1);
    assert_eq!(registry.get(&key).unwrap(), None);
    assert_eq!(registry.history(&key).unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_per_unit_order_is_preserved_across_threads() {
    let units: Vec<UnitKey> = (0..4).map(|i| UnitKey::job(format!("job-{i}"))).collect();
    let registry = Arc::new(registry_with(&units));
    let mut events = registry.subscribe();

    let handles: Vec<_> = units
      .iter()
      .cloned()
      .map(|key| {
        let registry = registry.clone();
        tokio::spawn(async move {
          for state in [RunState::Pending, RunState::Running, RunState::Succeeded] {
            registry.report_state(&key, state).unwrap();
          }
        })
      })
      .collect();
    for handle in handles {
      handle.await.unwrap();
    }

    let mut per_unit: HashMap<UnitKey, Vec<RunState>> = HashMap::new();
    let mut last_seq = 0;
    while let Ok(change) = events.try_recv() {
      assert!(change.seq > last_seq);
      last_seq = change.seq;
      per_unit.entry(change.key).or_default().push(change.run.state);
    }

    for key in &units {
      assert_eq!(
        per_unit[key],
        vec![RunState::Pending, RunState::Running, RunState::Succeeded]
      );
    }
  }
}
