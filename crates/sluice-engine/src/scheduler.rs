//! The trigger scheduler.
//!
//! Each trigger's mutable state sits behind its own async mutex. Firing is a
//! compare-and-fire under that lock: check the arm state, evaluate the
//! predicate against a fresh registry snapshot, mark the trigger `FIRED` and
//! dispatch its actions, all before the lock is released. Concurrent change
//! events for the same trigger serialize on the lock, and the second one
//! finds the trigger already fired.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use sluice_config::DispatchSettings;
use sluice_registry::{JobRegistry, StateChange};
use sluice_store::Store;
use sluice_workflow::{ArmState, RunState, TriggerKind, UnitKey, Workflow};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, instrument, warn};

use crate::error::EngineError;
use crate::evaluator::evaluate;
use crate::events::{EventNotifier, NoopNotifier, SchedulerEvent};
use crate::executor::JobExecutor;
use crate::persist;
use crate::trigger::{
  Dispatched, FireOutcome, TriggerFailure, TriggerOutcome, TriggerState, TriggerStatus,
  UnitReport, WorkflowStatus,
};

/// Evaluates and fires the triggers of one workflow.
///
/// Share it as `Arc<Scheduler>` between the [`crate::WorkflowRunner`] and
/// whatever calls [`Scheduler::activate`].
pub struct Scheduler<N: EventNotifier = NoopNotifier> {
  workflow: Workflow,
  registry: Arc<JobRegistry>,
  executor: Arc<dyn JobExecutor>,
  settings: DispatchSettings,
  store: Option<Arc<dyn Store>>,
  notifier: N,
  generation: AtomicU64,
  slots: Vec<Mutex<TriggerState>>,
  /// Serializes unit writes to the store with reset, so a stale change
  /// cannot overwrite a unit that reset left idle.
  unit_writes: Mutex<()>,
}

impl Scheduler<NoopNotifier> {
  pub fn new(
    workflow: Workflow,
    registry: Arc<JobRegistry>,
    executor: Arc<dyn JobExecutor>,
  ) -> Self {
    Self::with_notifier(workflow, registry, executor, NoopNotifier)
  }
}

impl<N: EventNotifier> Scheduler<N> {
  /// Create a scheduler that reports events to `notifier`.
  ///
  /// Registers the workflow's declared units, arms `start_on_creation`
  /// triggers, and records an unknown-target failure on every trigger that
  /// references a unit the registry does not know. Armed conditional
  /// triggers are not evaluated until [`Scheduler::evaluate_all`] or the
  /// first relevant change.
  pub fn with_notifier(
    workflow: Workflow,
    registry: Arc<JobRegistry>,
    executor: Arc<dyn JobExecutor>,
    notifier: N,
  ) -> Self {
    for unit in workflow.units() {
      registry.register(unit.clone());
    }

    let mut slots = Vec::with_capacity(workflow.triggers().len());
    for trigger in workflow.triggers() {
      let mut state = TriggerState::default();

      if trigger.start_on_creation {
        state.arm = ArmState::Armed;
        notifier.notify(SchedulerEvent::TriggerArmed {
          workflow: workflow.name().to_string(),
          trigger: trigger.name.clone(),
        });
      }

      if let Some(unit) = trigger
        .referenced_units()
        .into_iter()
        .find(|unit| !registry.contains(unit))
      {
        warn!(
          workflow = %workflow.name(),
          trigger = %trigger.name,
          unit = %unit,
          "trigger references unregistered unit"
        );
        let failure = TriggerFailure::UnknownTarget { unit };
        notifier.notify(SchedulerEvent::TriggerFailed {
          workflow: workflow.name().to_string(),
          trigger: trigger.name.clone(),
          failure: failure.clone(),
        });
        state.failure = Some(failure);
      }

      slots.push(Mutex::new(state));
    }

    Self {
      workflow,
      registry,
      executor,
      settings: DispatchSettings::default(),
      store: None,
      notifier,
      generation: AtomicU64::new(1),
      slots,
      unit_writes: Mutex::new(()),
    }
  }

  pub fn with_settings(mut self, settings: DispatchSettings) -> Self {
    self.settings = settings;
    self
  }

  /// Persist unit and trigger state to `store`.
  pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
    self.store = Some(store);
    self
  }

  pub fn workflow(&self) -> &Workflow {
    &self.workflow
  }

  pub fn registry(&self) -> &Arc<JobRegistry> {
    &self.registry
  }

  pub fn generation(&self) -> u64 {
    self.generation.load(Ordering::SeqCst)
  }

  /// Re-evaluate the triggers that depend on a changed unit.
  ///
  /// Candidates come from the graph's unit index and are tried in
  /// declaration order. Per-trigger errors are logged and the remaining
  /// candidates still run; only [`EngineError::DuplicateFire`] is returned.
  #[instrument(skip_all, fields(workflow = %self.workflow.name(), unit = %change.key, seq = change.seq))]
  pub async fn handle_change(
    &self,
    change: &StateChange,
  ) -> Result<Vec<TriggerOutcome>, EngineError> {
    if let Err(e) = self.persist_change(change).await {
      error!(error = %e, "failed to persist unit state");
    }

    let mut outcomes = Vec::new();
    for &idx in self.workflow.graph().triggers_for_unit(&change.key) {
      let name = &self.workflow.triggers()[idx].name;
      match self.try_fire(idx, false).await {
        Ok(outcome) => outcomes.push(TriggerOutcome {
          trigger: name.clone(),
          outcome,
        }),
        Err(e @ EngineError::DuplicateFire { .. }) => return Err(e),
        Err(e) => error!(trigger = %name, error = %e, "trigger evaluation failed"),
      }
    }
    Ok(outcomes)
  }

  /// Fire an on-demand trigger.
  ///
  /// An inactive trigger is left alone and reported as
  /// [`FireOutcome::NotArmed`]; an armed one fires exactly once per
  /// generation.
  #[instrument(skip(self), fields(workflow = %self.workflow.name()))]
  pub async fn activate(&self, trigger: &str) -> Result<FireOutcome, EngineError> {
    let idx = self.index_of(trigger)?;
    if self.workflow.triggers()[idx].kind != TriggerKind::OnDemand {
      return Err(EngineError::NotOnDemand(trigger.to_string()));
    }
    self.try_fire(idx, true).await
  }

  /// Move an inactive trigger to `ARMED`.
  ///
  /// Conditional triggers are evaluated right away and the outcome is
  /// returned; on-demand triggers wait for [`Scheduler::activate`] and yield
  /// `None`. A fired trigger stays fired.
  #[instrument(skip(self), fields(workflow = %self.workflow.name()))]
  pub async fn arm(&self, trigger: &str) -> Result<Option<FireOutcome>, EngineError> {
    let idx = self.index_of(trigger)?;
    self.arm_index(idx).await
  }

  /// Arm every trigger, in dependency order.
  pub async fn arm_all(&self) -> Result<Vec<TriggerOutcome>, EngineError> {
    let mut outcomes = Vec::new();
    for &idx in self.workflow.graph().dependency_order() {
      if let Some(outcome) = self.arm_index(idx).await? {
        outcomes.push(TriggerOutcome {
          trigger: self.workflow.triggers()[idx].name.clone(),
          outcome,
        });
      }
    }
    Ok(outcomes)
  }

  /// Start a new generation and return its number.
  ///
  /// Waits for in-flight fires, closes every unit's current run into
  /// history (including runs still in flight), clears failures and arms
  /// every trigger. Nothing is evaluated; the new generation starts when an
  /// on-demand trigger is activated or a unit changes.
  #[instrument(skip(self))]
  pub async fn reset_workflow(&self, workflow: &str) -> Result<u64, EngineError> {
    if workflow != self.workflow.name() {
      return Err(EngineError::UnknownWorkflow(workflow.to_string()));
    }

    let mut guards = self.lock_all().await;
    let _unit_writes = self.unit_writes.lock().await;
    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

    let units = self.workflow.all_units();
    let archived = self.registry.archive_all(&units);

    for guard in guards.iter_mut() {
      guard.arm = ArmState::Armed;
      guard.failure = None;
    }

    if let Some(store) = &self.store {
      store
        .save_generation(self.workflow.name(), generation as i64)
        .await?;
      for run in &archived {
        store.append_run(&persist::run_record(run)).await?;
        store
          .save_unit(&persist::unit_record(&run.key, None))
          .await?;
      }
      for (trigger, guard) in self.workflow.triggers().iter().zip(guards.iter()) {
        store
          .save_trigger(&persist::trigger_record(
            self.workflow.name(),
            &trigger.name,
            guard,
          ))
          .await?;
      }
    }

    info!(
      generation,
      archived = archived.len(),
      "workflow reset"
    );
    self.notifier.notify(SchedulerEvent::WorkflowReset {
      workflow: self.workflow.name().to_string(),
      generation,
    });
    Ok(generation)
  }

  /// Stop the current run: active units go to `STOPPED` and armed triggers
  /// go back to `INACTIVE`. Returns the stopped units.
  #[instrument(skip(self), fields(workflow = %self.workflow.name()))]
  pub async fn cancel_workflow(&self) -> Result<Vec<UnitKey>, EngineError> {
    let mut guards = self.lock_all().await;
    let _unit_writes = self.unit_writes.lock().await;

    let mut disarmed = Vec::new();
    for (idx, guard) in guards.iter_mut().enumerate() {
      if guard.arm == ArmState::Armed {
        guard.arm = ArmState::Inactive;
        disarmed.push(idx);
      }
    }

    let stopped = self.registry.stop_active(&self.workflow.all_units());

    if let Some(store) = &self.store {
      for &idx in &disarmed {
        let name = &self.workflow.triggers()[idx].name;
        store
          .save_trigger(&persist::trigger_record(
            self.workflow.name(),
            name,
            &guards[idx],
          ))
          .await?;
      }
      for unit in &stopped {
        let run = self.registry.get_run(unit)?;
        store
          .save_unit(&persist::unit_record(unit, run.as_ref()))
          .await?;
      }
    }

    info!(
      disarmed = disarmed.len(),
      stopped = stopped.len(),
      "workflow cancelled"
    );
    self.notifier.notify(SchedulerEvent::WorkflowCancelled {
      workflow: self.workflow.name().to_string(),
      stopped: stopped.clone(),
    });
    Ok(stopped)
  }

  /// Evaluate every armed conditional trigger, in dependency order.
  pub async fn evaluate_all(&self) -> Result<Vec<TriggerOutcome>, EngineError> {
    let mut outcomes = Vec::new();
    for &idx in self.workflow.graph().dependency_order() {
      let trigger = &self.workflow.triggers()[idx];
      if trigger.kind != TriggerKind::Conditional {
        continue;
      }
      let outcome = self.try_fire(idx, false).await?;
      outcomes.push(TriggerOutcome {
        trigger: trigger.name.clone(),
        outcome,
      });
    }
    Ok(outcomes)
  }

  /// Load the generation, unit runs and trigger states from the store.
  ///
  /// Nothing fires here. Call [`Scheduler::evaluate_all`] afterwards to pick
  /// up predicates that became true while the process was down; triggers
  /// restored as `FIRED` stay fired.
  #[instrument(skip(self), fields(workflow = %self.workflow.name()))]
  pub async fn restore(&self) -> Result<(), EngineError> {
    let Some(store) = &self.store else {
      return Ok(());
    };

    let mut guards = self.lock_all().await;

    match store.get_generation(self.workflow.name()).await? {
      Some(generation) => self.generation.store(generation as u64, Ordering::SeqCst),
      None => {
        store
          .save_generation(self.workflow.name(), self.generation() as i64)
          .await?
      }
    }

    let mut runs = 0;
    for record in store.list_units().await? {
      let key = UnitKey::new(record.unit_name.clone(), record.kind);
      self.registry.register(key);
      if let Some(run) = persist::job_run(&record) {
        self.registry.restore(run);
        runs += 1;
      }
    }

    for record in store.list_triggers(self.workflow.name()).await? {
      let Some(idx) = self.workflow.trigger_index(&record.trigger_name) else {
        warn!(trigger = %record.trigger_name, "stored trigger is not in the workflow");
        continue;
      };
      let guard = &mut guards[idx];
      guard.arm = record.arm_state;
      guard.fired_generation = record.fired_generation.map(|g| g as u64);
    }

    info!(generation = self.generation(), runs, "restored workflow state");
    Ok(())
  }

  /// Current state of one trigger.
  pub async fn trigger_state(&self, trigger: &str) -> Result<TriggerState, EngineError> {
    let idx = self.index_of(trigger)?;
    Ok(self.slots[idx].lock().await.clone())
  }

  pub async fn status(&self) -> WorkflowStatus {
    let terminal = self.workflow.graph().terminal_triggers();
    let mut triggers = Vec::with_capacity(self.slots.len());
    for (idx, trigger) in self.workflow.triggers().iter().enumerate() {
      let state = self.slots[idx].lock().await.clone();
      triggers.push(TriggerStatus {
        name: trigger.name.clone(),
        kind: trigger.kind,
        arm: state.arm,
        fired_generation: state.fired_generation,
        failure: state.failure,
        terminal: terminal.contains(&idx),
      });
    }

    let snapshot = self.registry.snapshot();
    let units = self
      .workflow
      .all_units()
      .into_iter()
      .map(|unit| {
        let status = snapshot.status(&unit).unwrap_or_default();
        UnitReport { unit, status }
      })
      .collect();

    WorkflowStatus {
      workflow: self.workflow.name().to_string(),
      generation: self.generation(),
      triggers,
      units,
    }
  }

  /// Compare-and-fire for one trigger.
  ///
  /// `manual` skips the predicate; it is set only for on-demand activation.
  async fn try_fire(&self, idx: usize, manual: bool) -> Result<FireOutcome, EngineError> {
    let trigger = &self.workflow.triggers()[idx];
    let mut state = self.slots[idx].lock().await;
    let generation = self.generation();

    if state.arm != ArmState::Armed {
      debug!(trigger = %trigger.name, arm = state.arm.as_str(), "trigger not armed");
      return Ok(FireOutcome::NotArmed(state.arm));
    }
    if state.fired_generation == Some(generation) {
      error!(trigger = %trigger.name, generation, "trigger armed after firing in this generation");
      return Err(EngineError::DuplicateFire {
        trigger: trigger.name.clone(),
        generation,
      });
    }

    let snapshot = self.registry.snapshot_of(&trigger.referenced_units());
    if !manual {
      let satisfied = trigger
        .predicate
        .as_ref()
        .is_some_and(|predicate| evaluate(predicate, &snapshot));
      if !satisfied {
        return Ok(FireOutcome::Unsatisfied);
      }
    }

    if let Some(unit) = trigger.action_targets().find(|unit| !snapshot.contains(unit)) {
      let failure = TriggerFailure::UnknownTarget { unit };
      if state.failure.as_ref() != Some(&failure) {
        warn!(trigger = %trigger.name, error = %failure.to_error(&trigger.name), "trigger blocked");
        self.notify_failure(&trigger.name, &failure);
        state.failure = Some(failure.clone());
      }
      return Ok(FireOutcome::Blocked(failure));
    }

    // Persist FIRED before any action goes out, so a restart never refires.
    let fired = TriggerState {
      arm: ArmState::Fired,
      fired_generation: Some(generation),
      failure: None,
    };
    self.persist_trigger(&trigger.name, &fired).await?;
    *state = fired;

    info!(trigger = %trigger.name, generation, manual, "trigger fired");
    self.notifier.notify(SchedulerEvent::TriggerFired {
      workflow: self.workflow.name().to_string(),
      trigger: trigger.name.clone(),
      generation,
    });

    let mut dispatched = Vec::with_capacity(trigger.actions.len());
    for unit in trigger.action_targets() {
      match self.dispatch(&trigger.name, &unit).await {
        Ok(mut action) => {
          action.opened_run = self.mark_pending(&trigger.name, &action)?;
          self.notifier.notify(SchedulerEvent::ActionDispatched {
            workflow: self.workflow.name().to_string(),
            trigger: trigger.name.clone(),
            unit: action.unit.clone(),
            run_id: action.run_id.clone(),
            attempts: action.attempts,
          });
          dispatched.push(action);
        }
        Err(failure) => {
          error!(trigger = %trigger.name, error = %failure.to_error(&trigger.name), "dispatch failed");
          self.notify_failure(&trigger.name, &failure);
          state.failure = Some(failure.clone());
          return Ok(FireOutcome::Fired {
            generation,
            dispatched,
            failure: Some(failure),
          });
        }
      }
    }

    Ok(FireOutcome::Fired {
      generation,
      dispatched,
      failure: None,
    })
  }

  /// Start one unit, retrying rejected requests with exponential backoff.
  async fn dispatch(&self, trigger: &str, unit: &UnitKey) -> Result<Dispatched, TriggerFailure> {
    let max_attempts = self.settings.max_attempts.max(1);
    let mut attempt = 1;
    loop {
      match self.executor.start(unit).await {
        Ok(run_id) => {
          debug!(trigger, unit = %unit, run_id = %run_id, attempt, "action dispatched");
          return Ok(Dispatched {
            unit: unit.clone(),
            run_id,
            attempts: attempt,
            opened_run: false,
          });
        }
        Err(error) if attempt < max_attempts => {
          let delay = self.settings.backoff_for_attempt(attempt);
          warn!(
            trigger,
            unit = %unit,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "start rejected, retrying"
          );
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
        Err(error) => {
          return Err(TriggerFailure::Dispatch {
            unit: unit.clone(),
            attempts: attempt,
            error,
          });
        }
      }
    }
  }

  /// Record the acknowledged start as `PENDING`.
  ///
  /// A unit that already has an active run keeps it: either the executor
  /// reported progress before the acknowledgement, or a run started outside
  /// the engine is still going and the executor's reports for the new run
  /// will land on it. Returns false in that case.
  fn mark_pending(&self, trigger: &str, action: &Dispatched) -> Result<bool, EngineError> {
    let current = self.registry.get_run(&action.unit)?;
    if let Some(run) = current.filter(|run| !run.state.is_terminal()) {
      warn!(
        trigger,
        unit = %action.unit,
        run_id = %action.run_id,
        active_run = %run.run_id,
        state = %run.state,
        "dispatched unit already has an active run; not opening a new one"
      );
      return Ok(false);
    }
    self.registry.report_state(&action.unit, RunState::Pending)?;
    Ok(true)
  }

  async fn arm_index(&self, idx: usize) -> Result<Option<FireOutcome>, EngineError> {
    let trigger = &self.workflow.triggers()[idx];
    {
      let mut state = self.slots[idx].lock().await;
      if state.arm == ArmState::Inactive {
        let armed = TriggerState {
          arm: ArmState::Armed,
          ..state.clone()
        };
        self.persist_trigger(&trigger.name, &armed).await?;
        *state = armed;
        debug!(trigger = %trigger.name, "trigger armed");
        self.notifier.notify(SchedulerEvent::TriggerArmed {
          workflow: self.workflow.name().to_string(),
          trigger: trigger.name.clone(),
        });
      }
    }

    match trigger.kind {
      TriggerKind::Conditional => self.try_fire(idx, false).await.map(Some),
      TriggerKind::OnDemand => Ok(None),
    }
  }

  async fn lock_all(&self) -> Vec<MutexGuard<'_, TriggerState>> {
    let mut guards = Vec::with_capacity(self.slots.len());
    // Index order, so concurrent resets and cancels cannot deadlock.
    for slot in &self.slots {
      guards.push(slot.lock().await);
    }
    guards
  }

  fn index_of(&self, trigger: &str) -> Result<usize, EngineError> {
    self
      .workflow
      .trigger_index(trigger)
      .ok_or_else(|| EngineError::UnknownTrigger(trigger.to_string()))
  }

  fn notify_failure(&self, trigger: &str, failure: &TriggerFailure) {
    self.notifier.notify(SchedulerEvent::TriggerFailed {
      workflow: self.workflow.name().to_string(),
      trigger: trigger.to_string(),
      failure: failure.clone(),
    });
  }

  async fn persist_trigger(&self, trigger: &str, state: &TriggerState) -> Result<(), EngineError> {
    if let Some(store) = &self.store {
      store
        .save_trigger(&persist::trigger_record(self.workflow.name(), trigger, state))
        .await?;
    }
    Ok(())
  }

  /// Write the unit's current run, not the one carried by the change: the
  /// change may have been queued across a reset.
  async fn persist_change(&self, change: &StateChange) -> Result<(), EngineError> {
    let Some(store) = &self.store else {
      return Ok(());
    };
    let _unit_writes = self.unit_writes.lock().await;
    if let Some(archived) = &change.archived {
      store.append_run(&persist::run_record(archived)).await?;
    }
    let current = self.registry.get_run(&change.key)?;
    store
      .save_unit(&persist::unit_record(&change.key, current.as_ref()))
      .await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use sluice_workflow::{ActionRef, Condition, Predicate, Trigger};

  use crate::error::ExecutorError;

  struct AcceptAll;

  #[async_trait]
  impl JobExecutor for AcceptAll {
    async fn start(&self, unit: &UnitKey) -> Result<String, ExecutorError> {
      Ok(format!("run-{}", unit.name))
    }
  }

  fn workflow() -> Workflow {
    Workflow::new(
      "w",
      vec![UnitKey::job("a"), UnitKey::job("b")],
      vec![
        Trigger::on_demand("start", vec![ActionRef::start_job("a")]),
        Trigger::conditional(
          "next",
          Predicate::all(vec![Condition::state_equals(
            UnitKey::job("a"),
            RunState::Succeeded,
          )])
          .unwrap(),
          vec![ActionRef::start_job("b")],
        ),
      ],
    )
    .unwrap()
  }

  #[tokio::test]
  async fn test_new_registers_declared_units() {
    let registry = Arc::new(JobRegistry::new());
    let scheduler = Scheduler::new(workflow(), registry.clone(), Arc::new(AcceptAll));

    assert!(registry.contains(&UnitKey::job("a")));
    assert!(registry.contains(&UnitKey::job("b")));
    assert_eq!(scheduler.generation(), 1);
    assert_eq!(
      scheduler.trigger_state("start").await.unwrap().arm,
      ArmState::Inactive
    );
  }

  #[tokio::test]
  async fn test_conditional_trigger_cannot_be_activated() {
    let scheduler = Scheduler::new(workflow(), Arc::new(JobRegistry::new()), Arc::new(AcceptAll));

    assert!(matches!(
      scheduler.activate("next").await,
      Err(EngineError::NotOnDemand(_))
    ));
    assert!(matches!(
      scheduler.activate("missing").await,
      Err(EngineError::UnknownTrigger(_))
    ));
  }

  #[tokio::test]
  async fn test_activate_marks_target_pending() {
    let registry = Arc::new(JobRegistry::new());
    let scheduler = Scheduler::new(workflow(), registry.clone(), Arc::new(AcceptAll));
    scheduler.arm("start").await.unwrap();

    let outcome = scheduler.activate("start").await.unwrap();

    match outcome {
      FireOutcome::Fired {
        generation,
        dispatched,
        failure,
      } => {
        assert_eq!(generation, 1);
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].run_id, "run-a");
        assert!(dispatched[0].opened_run);
        assert!(failure.is_none());
      }
      other => panic!("expected fire, got {:?}", other),
    }
    assert_eq!(
      registry.get(&UnitKey::job("a")).unwrap(),
      Some(RunState::Pending)
    );
  }

  #[tokio::test]
  async fn test_reset_rejects_other_workflow() {
    let scheduler = Scheduler::new(workflow(), Arc::new(JobRegistry::new()), Arc::new(AcceptAll));

    assert!(matches!(
      scheduler.reset_workflow("other").await,
      Err(EngineError::UnknownWorkflow(_))
    ));
  }
}
