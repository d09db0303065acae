//! Mapping between registry runs and store records.

use chrono::Utc;
use sluice_registry::JobRun;
use sluice_store::{RunRecord, TriggerRecord, UnitRecord};
use sluice_workflow::UnitKey;

use crate::trigger::TriggerState;

pub(crate) fn unit_record(key: &UnitKey, run: Option<&JobRun>) -> UnitRecord {
  UnitRecord {
    unit_name: key.name.clone(),
    kind: key.kind,
    run_id: run.map(|r| r.run_id.clone()),
    state: run.map(|r| r.state),
    crawl_state: run.and_then(|r| r.crawl_state),
    started_at: run.map(|r| r.started_at),
    ended_at: run.and_then(|r| r.ended_at),
    updated_at: Utc::now(),
  }
}

pub(crate) fn run_record(run: &JobRun) -> RunRecord {
  RunRecord {
    run_id: run.run_id.clone(),
    unit_name: run.key.name.clone(),
    kind: run.key.kind,
    state: run.state,
    crawl_state: run.crawl_state,
    started_at: run.started_at,
    ended_at: run.ended_at,
  }
}

/// Rebuild a current run from its stored record. Idle units yield `None`.
pub(crate) fn job_run(record: &UnitRecord) -> Option<JobRun> {
  let (Some(run_id), Some(state), Some(started_at)) =
    (&record.run_id, record.state, record.started_at)
  else {
    return None;
  };
  Some(JobRun {
    key: UnitKey::new(record.unit_name.clone(), record.kind),
    run_id: run_id.clone(),
    state,
    crawl_state: record.crawl_state,
    started_at,
    ended_at: record.ended_at,
  })
}

pub(crate) fn trigger_record(workflow: &str, trigger: &str, state: &TriggerState) -> TriggerRecord {
  TriggerRecord {
    workflow_name: workflow.to_string(),
    trigger_name: trigger.to_string(),
    arm_state: state.arm,
    fired_generation: state.fired_generation.map(|g| g as i64),
    updated_at: Utc::now(),
  }
}
