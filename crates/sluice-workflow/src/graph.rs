use std::collections::{HashMap, VecDeque};

use crate::error::WorkflowError;
use crate::trigger::Trigger;
use crate::unit::UnitKey;

/// Dependency structure over a workflow's triggers.
///
/// Triggers are addressed by their index in declaration order. Trigger `b`
/// depends on trigger `a` when `b`'s predicate references a unit that one of
/// `a`'s actions starts.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
  /// unit -> triggers whose predicate references it.
  by_unit: HashMap<UnitKey, Vec<usize>>,
  /// trigger -> triggers it depends on.
  upstream: Vec<Vec<usize>>,
  /// Topological order, ties broken by declaration order.
  order: Vec<usize>,
  /// Triggers nothing depends on.
  terminal: Vec<usize>,
}

impl WorkflowGraph {
  /// Build the graph, failing on dependency cycles.
  pub fn new(triggers: &[Trigger]) -> Result<Self, WorkflowError> {
    let mut by_unit: HashMap<UnitKey, Vec<usize>> = HashMap::new();
    for (idx, trigger) in triggers.iter().enumerate() {
      if let Some(predicate) = &trigger.predicate {
        for target in predicate.targets() {
          by_unit.entry(target.clone()).or_default().push(idx);
        }
      }
    }

    let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); triggers.len()];
    let mut upstream: Vec<Vec<usize>> = vec![Vec::new(); triggers.len()];
    for (idx, trigger) in triggers.iter().enumerate() {
      for target in trigger.action_targets() {
        for &dependent in by_unit.get(&target).map(|v| v.as_slice()).unwrap_or(&[]) {
          if !downstream[idx].contains(&dependent) {
            downstream[idx].push(dependent);
            upstream[dependent].push(idx);
          }
        }
      }
    }

    let order = topological_order(&downstream, &upstream).ok_or_else(|| {
      let stuck = stuck_triggers(&downstream, &upstream);
      WorkflowError::Cycle {
        triggers: stuck.into_iter().map(|i| triggers[i].name.clone()).collect(),
      }
    })?;

    let terminal = (0..triggers.len())
      .filter(|&idx| downstream[idx].is_empty())
      .collect();

    Ok(Self {
      by_unit,
      upstream,
      order,
      terminal,
    })
  }

  /// Triggers whose predicate references the unit.
  pub fn triggers_for_unit(&self, unit: &UnitKey) -> &[usize] {
    self
      .by_unit
      .get(unit)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  pub fn upstream(&self, trigger: usize) -> &[usize] {
    self
      .upstream
      .get(trigger)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Triggers that depend on no other trigger.
  pub fn entry_points(&self) -> Vec<usize> {
    (0..self.upstream.len())
      .filter(|&idx| self.upstream[idx].is_empty())
      .collect()
  }

  pub fn dependency_order(&self) -> &[usize] {
    &self.order
  }

  /// Final stages: a pipeline run is complete once these have fired.
  pub fn terminal_triggers(&self) -> &[usize] {
    &self.terminal
  }
}

fn topological_order(downstream: &[Vec<usize>], upstream: &[Vec<usize>]) -> Option<Vec<usize>> {
  let mut in_degree: Vec<usize> = upstream.iter().map(Vec::len).collect();
  let mut ready: VecDeque<usize> = (0..in_degree.len()).filter(|&i| in_degree[i] == 0).collect();
  let mut order = Vec::with_capacity(in_degree.len());

  while let Some(idx) = ready.pop_front() {
    order.push(idx);
    let mut released: Vec<usize> = Vec::new();
    for &next in &downstream[idx] {
      in_degree[next] -= 1;
      if in_degree[next] == 0 {
        released.push(next);
      }
    }
    released.sort_unstable();
    ready.extend(released);
  }

  (order.len() == in_degree.len()).then_some(order)
}

/// Triggers left over after peeling off everything that is not on a cycle.
fn stuck_triggers(downstream: &[Vec<usize>], upstream: &[Vec<usize>]) -> Vec<usize> {
  let mut in_degree: Vec<usize> = upstream.iter().map(Vec::len).collect();
  let mut ready: Vec<usize> = (0..in_degree.len()).filter(|&i| in_degree[i] == 0).collect();
  let mut removed = vec![false; in_degree.len()];

  while let Some(idx) = ready.pop() {
    removed[idx] = true;
    for &next in &downstream[idx] {
      in_degree[next] -= 1;
      if in_degree[next] == 0 {
        ready.push(next);
      }
    }
  }

  (0..removed.len()).filter(|&i| !removed[i]).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::trigger::{ActionRef, Condition, Predicate};
  use sluice_config::RunState;

  fn on_success(name: &str, upstream_job: &str, action: ActionRef) -> Trigger {
    Trigger::conditional(
      name,
      Predicate::all(vec![Condition::state_equals(
        UnitKey::job(upstream_job),
        RunState::Succeeded,
      )])
      .unwrap(),
      vec![action],
    )
  }

  fn pipeline() -> Vec<Trigger> {
    vec![
      // Declared out of dependency order on purpose.
      on_success("load-start", "transform", ActionRef::start_job("load")),
      Trigger::on_demand("start", vec![ActionRef::start_job("extract")]),
      Trigger::conditional(
        "transform-start",
        Predicate::all(vec![Condition::crawl_state_equals(
          "catalog",
          RunState::Succeeded,
        )])
        .unwrap(),
        vec![ActionRef::start_job("transform")],
      ),
      on_success("crawl-start", "extract", ActionRef::start_crawl("catalog")),
    ]
  }

  #[test]
  fn test_unit_index() {
    let graph = WorkflowGraph::new(&pipeline()).unwrap();

    assert_eq!(graph.triggers_for_unit(&UnitKey::job("extract")), &[3]);
    assert_eq!(graph.triggers_for_unit(&UnitKey::crawl("catalog")), &[2]);
    assert!(graph.triggers_for_unit(&UnitKey::job("load")).is_empty());
    // Same name, different kind.
    assert!(graph.triggers_for_unit(&UnitKey::crawl("extract")).is_empty());
  }

  #[test]
  fn test_dependency_order_follows_stages() {
    let graph = WorkflowGraph::new(&pipeline()).unwrap();

    assert_eq!(graph.dependency_order(), &[1, 3, 2, 0]);
    assert_eq!(graph.entry_points(), vec![1]);
    assert_eq!(graph.terminal_triggers(), &[0]);
    assert_eq!(graph.upstream(0), &[2]);
  }

  #[test]
  fn test_cycle_is_rejected() {
    let triggers = vec![
      on_success("a", "y", ActionRef::start_job("x")),
      on_success("b", "x", ActionRef::start_job("y")),
      Trigger::on_demand("start", vec![ActionRef::start_job("z")]),
    ];

    match WorkflowGraph::new(&triggers) {
      Err(WorkflowError::Cycle { triggers }) => {
        assert_eq!(triggers, vec!["a".to_string(), "b".to_string()]);
      }
      other => panic!("expected cycle error, got {:?}", other),
    }
  }
}
