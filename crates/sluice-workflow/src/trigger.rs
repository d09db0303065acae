use serde::{Deserialize, Serialize};
use sluice_config::{Combinator, RunState, UnitKind};

use crate::unit::UnitKey;

/// Which state of the target a condition reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateField {
  /// The run's lifecycle state.
  State,
  /// The crawl outcome, only reported for crawls.
  CrawlState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
  #[default]
  Equals,
}

/// A single check against one unit's current state.
///
/// The condition holds a reference to its unit by key; the registry owns the
/// run records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
  pub target: UnitKey,
  pub field: StateField,
  pub expected: RunState,
  pub comparator: Comparator,
}

impl Condition {
  /// `target.state == expected`
  pub fn state_equals(target: UnitKey, expected: RunState) -> Self {
    Self {
      target,
      field: StateField::State,
      expected,
      comparator: Comparator::Equals,
    }
  }

  /// `target.crawl_state == expected`
  pub fn crawl_state_equals(crawler: impl Into<String>, expected: RunState) -> Self {
    Self {
      target: UnitKey::crawl(crawler),
      field: StateField::CrawlState,
      expected,
      comparator: Comparator::Equals,
    }
  }
}

/// Conditions combined into one boolean. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
  combinator: Combinator,
  conditions: Vec<Condition>,
}

impl Predicate {
  /// Combine conditions with AND. Returns `None` for an empty list.
  pub fn all(conditions: Vec<Condition>) -> Option<Self> {
    if conditions.is_empty() {
      return None;
    }
    Some(Self {
      combinator: Combinator::And,
      conditions,
    })
  }

  pub fn combinator(&self) -> Combinator {
    self.combinator
  }

  pub fn conditions(&self) -> &[Condition] {
    &self.conditions
  }

  /// Units referenced by this predicate, in condition order, without repeats.
  pub fn targets(&self) -> Vec<&UnitKey> {
    let mut targets: Vec<&UnitKey> = Vec::with_capacity(self.conditions.len());
    for condition in &self.conditions {
      if !targets.contains(&&condition.target) {
        targets.push(&condition.target);
      }
    }
    targets
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
  StartJob,
  StartCrawl,
}

/// A unit to start when a trigger fires. Resolved against the registry at
/// fire time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRef {
  pub kind: ActionKind,
  pub target_name: String,
}

impl ActionRef {
  pub fn start_job(name: impl Into<String>) -> Self {
    Self {
      kind: ActionKind::StartJob,
      target_name: name.into(),
    }
  }

  pub fn start_crawl(name: impl Into<String>) -> Self {
    Self {
      kind: ActionKind::StartCrawl,
      target_name: name.into(),
    }
  }

  pub fn target(&self) -> UnitKey {
    let kind = match self.kind {
      ActionKind::StartJob => UnitKind::Job,
      ActionKind::StartCrawl => UnitKind::Crawl,
    };
    UnitKey::new(self.target_name.clone(), kind)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
  OnDemand,
  Conditional,
}

/// Activation state of a trigger within the current generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum ArmState {
  /// Created but not evaluated until armed.
  Inactive,
  /// Eligible for evaluation or manual activation.
  Armed,
  /// Actions dispatched for this generation.
  Fired,
}

impl ArmState {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Inactive => "inactive",
      Self::Armed => "armed",
      Self::Fired => "fired",
    }
  }
}

/// A named rule that dispatches actions on activation or when its predicate
/// is satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
  pub name: String,
  pub kind: TriggerKind,
  pub predicate: Option<Predicate>,
  pub actions: Vec<ActionRef>,
  /// Arm the trigger as soon as the workflow is loaded.
  pub start_on_creation: bool,
}

impl Trigger {
  pub fn on_demand(name: impl Into<String>, actions: Vec<ActionRef>) -> Self {
    Self {
      name: name.into(),
      kind: TriggerKind::OnDemand,
      predicate: None,
      actions,
      start_on_creation: false,
    }
  }

  pub fn conditional(
    name: impl Into<String>,
    predicate: Predicate,
    actions: Vec<ActionRef>,
  ) -> Self {
    Self {
      name: name.into(),
      kind: TriggerKind::Conditional,
      predicate: Some(predicate),
      actions,
      start_on_creation: false,
    }
  }

  pub fn with_start_on_creation(mut self, start: bool) -> Self {
    self.start_on_creation = start;
    self
  }

  /// Units this trigger starts, in action order.
  pub fn action_targets(&self) -> impl Iterator<Item = UnitKey> + '_ {
    self.actions.iter().map(ActionRef::target)
  }

  /// Every unit the trigger reads or starts.
  pub fn referenced_units(&self) -> Vec<UnitKey> {
    let mut units: Vec<UnitKey> = self
      .predicate
      .iter()
      .flat_map(|p| p.targets())
      .cloned()
      .collect();
    for target in self.action_targets() {
      if !units.contains(&target) {
        units.push(target);
      }
    }
    units
  }
}
