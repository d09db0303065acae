//! Condition and predicate evaluation.
//!
//! Evaluation is a pure function over a [`RegistrySnapshot`]. Units that are
//! unknown, idle, or (for crawl-state checks) have no crawl outcome never
//! satisfy a condition, so a trigger simply stays pending until its
//! dependencies exist and reach the expected state.

use sluice_registry::RegistrySnapshot;
use sluice_workflow::{Combinator, Comparator, Condition, Predicate, StateField};

/// Evaluate one condition against a snapshot.
pub fn evaluate_condition(condition: &Condition, snapshot: &RegistrySnapshot) -> bool {
  let actual = match condition.field {
    StateField::State => snapshot.state(&condition.target),
    StateField::CrawlState => snapshot.crawl_state(&condition.target),
  };

  match condition.comparator {
    Comparator::Equals => actual == Some(condition.expected),
  }
}

/// Evaluate a predicate against a snapshot.
pub fn evaluate(predicate: &Predicate, snapshot: &RegistrySnapshot) -> bool {
  match predicate.combinator() {
    Combinator::And => predicate
      .conditions()
      .iter()
      .all(|condition| evaluate_condition(condition, snapshot)),
  }
}
