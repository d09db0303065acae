use std::collections::HashSet;

use sluice_config::{ActionDef, ConditionDef, TriggerDef, TriggerType, UnitKind, WorkflowDef};

use crate::error::WorkflowError;
use crate::graph::WorkflowGraph;
use crate::trigger::{ActionRef, Condition, Predicate, StateField, Trigger, TriggerKind};
use crate::unit::UnitKey;

/// A validated workflow ready to be scheduled.
#[derive(Debug, Clone)]
pub struct Workflow {
  name: String,
  units: Vec<UnitKey>,
  triggers: Vec<Trigger>,
  graph: WorkflowGraph,
}

impl Workflow {
  /// Validate triggers and build the dependency graph.
  pub fn new(
    name: impl Into<String>,
    units: Vec<UnitKey>,
    triggers: Vec<Trigger>,
  ) -> Result<Self, WorkflowError> {
    let mut seen_units = HashSet::new();
    for unit in &units {
      if !seen_units.insert(unit) {
        return Err(WorkflowError::DuplicateUnit(unit.to_string()));
      }
    }

    let mut seen_triggers = HashSet::new();
    for trigger in &triggers {
      if !seen_triggers.insert(trigger.name.as_str()) {
        return Err(WorkflowError::DuplicateTrigger(trigger.name.clone()));
      }
      validate_trigger(trigger)?;
    }

    let graph = WorkflowGraph::new(&triggers)?;

    Ok(Self {
      name: name.into(),
      units,
      triggers,
      graph,
    })
  }

  /// Resolve a definition into a validated workflow.
  pub fn from_def(def: WorkflowDef) -> Result<Self, WorkflowError> {
    let units = def
      .units
      .into_iter()
      .map(|unit| UnitKey::new(unit.name, unit.kind))
      .collect();

    let triggers = def
      .triggers
      .into_iter()
      .map(resolve_trigger)
      .collect::<Result<Vec<_>, _>>()?;

    Self::new(def.name, units, triggers)
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Units declared by the workflow definition.
  pub fn units(&self) -> &[UnitKey] {
    &self.units
  }

  /// Triggers in declaration order.
  pub fn triggers(&self) -> &[Trigger] {
    &self.triggers
  }

  pub fn trigger_index(&self, name: &str) -> Option<usize> {
    self.triggers.iter().position(|t| t.name == name)
  }

  pub fn graph(&self) -> &WorkflowGraph {
    &self.graph
  }

  /// Declared units plus every unit a trigger reads or starts.
  pub fn all_units(&self) -> Vec<UnitKey> {
    let mut units = self.units.clone();
    for trigger in &self.triggers {
      for unit in trigger.referenced_units() {
        if !units.contains(&unit) {
          units.push(unit);
        }
      }
    }
    units
  }
}

fn validate_trigger(trigger: &Trigger) -> Result<(), WorkflowError> {
  match (trigger.kind, &trigger.predicate) {
    (TriggerKind::Conditional, None) => {
      return Err(WorkflowError::EmptyPredicate {
        trigger: trigger.name.clone(),
      });
    }
    (TriggerKind::OnDemand, Some(_)) => {
      return Err(WorkflowError::UnexpectedPredicate {
        trigger: trigger.name.clone(),
      });
    }
    _ => {}
  }

  if trigger.actions.is_empty() {
    return Err(WorkflowError::NoActions {
      trigger: trigger.name.clone(),
    });
  }

  for action in &trigger.actions {
    if action.target_name.is_empty() {
      return Err(WorkflowError::InvalidAction {
        trigger: trigger.name.clone(),
        message: "empty target name".to_string(),
      });
    }
  }

  if let Some(predicate) = &trigger.predicate {
    for condition in predicate.conditions() {
      if condition.field == StateField::CrawlState && condition.target.kind != UnitKind::Crawl {
        return Err(WorkflowError::InvalidCondition {
          trigger: trigger.name.clone(),
          message: format!("crawl state checked on {}", condition.target),
        });
      }
    }
  }

  Ok(())
}

fn resolve_trigger(def: TriggerDef) -> Result<Trigger, WorkflowError> {
  let actions = def
    .actions
    .iter()
    .map(|action| resolve_action(&def.name, action))
    .collect::<Result<Vec<_>, _>>()?;

  let kind = match def.trigger_type {
    TriggerType::OnDemand => TriggerKind::OnDemand,
    TriggerType::Conditional => TriggerKind::Conditional,
  };

  let predicate = match def.predicate {
    Some(predicate_def) => {
      let conditions = predicate_def
        .conditions
        .iter()
        .map(|condition| resolve_condition(&def.name, condition))
        .collect::<Result<Vec<_>, _>>()?;
      match Predicate::all(conditions) {
        Some(predicate) => Some(predicate),
        None if kind == TriggerKind::Conditional => {
          return Err(WorkflowError::EmptyPredicate { trigger: def.name });
        }
        None => None,
      }
    }
    None => None,
  };

  Ok(Trigger {
    name: def.name,
    kind,
    predicate,
    actions,
    start_on_creation: def.start_on_creation,
  })
}

fn resolve_action(trigger: &str, def: &ActionDef) -> Result<ActionRef, WorkflowError> {
  match (&def.job_name, &def.crawler_name) {
    (Some(job), None) => Ok(ActionRef::start_job(job.clone())),
    (None, Some(crawler)) => Ok(ActionRef::start_crawl(crawler.clone())),
    (Some(_), Some(_)) => Err(WorkflowError::InvalidAction {
      trigger: trigger.to_string(),
      message: "both job_name and crawler_name set".to_string(),
    }),
    (None, None) => Err(WorkflowError::InvalidAction {
      trigger: trigger.to_string(),
      message: "one of job_name or crawler_name is required".to_string(),
    }),
  }
}

fn resolve_condition(trigger: &str, def: &ConditionDef) -> Result<Condition, WorkflowError> {
  let invalid = |message: &str| WorkflowError::InvalidCondition {
    trigger: trigger.to_string(),
    message: message.to_string(),
  };

  match (&def.job_name, &def.crawler_name) {
    (Some(job), None) => {
      if def.crawl_state.is_some() {
        return Err(invalid("crawl_state is only valid with crawler_name"));
      }
      let state = def.state.ok_or_else(|| invalid("job condition requires state"))?;
      Ok(Condition::state_equals(UnitKey::job(job.clone()), state))
    }
    (None, Some(crawler)) => match (def.state, def.crawl_state) {
      (None, Some(crawl_state)) => Ok(Condition::crawl_state_equals(crawler.clone(), crawl_state)),
      (Some(state), None) => Ok(Condition::state_equals(
        UnitKey::crawl(crawler.clone()),
        state,
      )),
      (Some(_), Some(_)) => Err(invalid("set only one of state or crawl_state")),
      (None, None) => Err(invalid("crawler condition requires crawl_state or state")),
    },
    (Some(_), Some(_)) => Err(invalid("both job_name and crawler_name set")),
    (None, None) => Err(invalid("one of job_name or crawler_name is required")),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use sluice_config::RunState;

  fn bulk_load_def() -> WorkflowDef {
    WorkflowDef::from_json(
      r#"{
        "name": "bulk-load",
        "units": [
          { "name": "extract", "kind": "job" },
          { "name": "catalog", "kind": "crawl" },
          { "name": "transform", "kind": "job" },
          { "name": "load", "kind": "job" }
        ],
        "triggers": [
          { "name": "start", "type": "ON_DEMAND", "actions": [{ "job_name": "extract" }] },
          {
            "name": "crawl-start",
            "type": "CONDITIONAL",
            "actions": [{ "crawler_name": "catalog" }],
            "predicate": { "conditions": [{ "job_name": "extract", "state": "SUCCEEDED" }] }
          },
          {
            "name": "transform-start",
            "type": "CONDITIONAL",
            "actions": [{ "job_name": "transform" }],
            "predicate": { "conditions": [{ "crawler_name": "catalog", "crawl_state": "SUCCEEDED" }] }
          },
          {
            "name": "load-start",
            "type": "CONDITIONAL",
            "actions": [{ "job_name": "load" }],
            "predicate": { "conditions": [{ "job_name": "transform", "state": "SUCCEEDED" }] }
          }
        ]
      }"#,
    )
    .unwrap()
  }

  #[test]
  fn test_from_def() {
    let workflow = Workflow::from_def(bulk_load_def()).unwrap();

    assert_eq!(workflow.name(), "bulk-load");
    assert_eq!(workflow.units().len(), 4);
    assert_eq!(workflow.trigger_index("transform-start"), Some(2));

    let transform = &workflow.triggers()[2];
    let condition = &transform.predicate.as_ref().unwrap().conditions()[0];
    assert_eq!(condition.target, UnitKey::crawl("catalog"));
    assert_eq!(condition.field, StateField::CrawlState);
    assert_eq!(condition.expected, RunState::Succeeded);

    assert_eq!(workflow.graph().dependency_order(), &[0, 1, 2, 3]);
    assert_eq!(workflow.graph().terminal_triggers(), &[3]);
  }

  #[test]
  fn test_conditional_without_predicate_fails() {
    let mut def = bulk_load_def();
    def.triggers[1].predicate = None;

    assert!(matches!(
      Workflow::from_def(def),
      Err(WorkflowError::EmptyPredicate { trigger }) if trigger == "crawl-start"
    ));
  }

  #[test]
  fn test_conditional_with_empty_conditions_fails() {
    let mut def = bulk_load_def();
    if let Some(predicate) = def.triggers[1].predicate.as_mut() {
      predicate.conditions.clear();
    }

    assert!(matches!(
      Workflow::from_def(def),
      Err(WorkflowError::EmptyPredicate { .. })
    ));
  }

  #[test]
  fn test_on_demand_with_predicate_fails() {
    let mut def = bulk_load_def();
    def.triggers[0].predicate = def.triggers[1].predicate.clone();

    assert!(matches!(
      Workflow::from_def(def),
      Err(WorkflowError::UnexpectedPredicate { .. })
    ));
  }

  #[test]
  fn test_action_must_name_one_unit() {
    let mut def = bulk_load_def();
    def.triggers[0].actions[0].crawler_name = Some("catalog".to_string());

    assert!(matches!(
      Workflow::from_def(def),
      Err(WorkflowError::InvalidAction { .. })
    ));
  }

  #[test]
  fn test_crawl_state_on_job_fails() {
    let trigger = Trigger::conditional(
      "bad",
      Predicate::all(vec![Condition {
        target: UnitKey::job("extract"),
        field: StateField::CrawlState,
        expected: RunState::Succeeded,
        comparator: Default::default(),
      }])
      .unwrap(),
      vec![ActionRef::start_job("transform")],
    );

    assert!(matches!(
      Workflow::new("w", vec![], vec![trigger]),
      Err(WorkflowError::InvalidCondition { .. })
    ));
  }

  #[test]
  fn test_duplicate_trigger_names_fail() {
    let start = Trigger::on_demand("start", vec![ActionRef::start_job("extract")]);
    let result = Workflow::new("w", vec![], vec![start.clone(), start]);

    assert!(matches!(result, Err(WorkflowError::DuplicateTrigger(name)) if name == "start"));
  }

  #[test]
  fn test_all_units_includes_undeclared_references() {
    let workflow = Workflow::new(
      "w",
      vec![UnitKey::job("extract")],
      vec![Trigger::on_demand("start", vec![ActionRef::start_job("other")])],
    )
    .unwrap();

    assert_eq!(
      workflow.all_units(),
      vec![UnitKey::job("extract"), UnitKey::job("other")]
    );
  }
}
