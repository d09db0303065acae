use std::collections::HashMap;

use serde::Serialize;
use sluice_workflow::{RunState, UnitKey};

/// State of one unit at snapshot time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnitStatus {
  /// `None` while the unit has no run in this generation.
  pub state: Option<RunState>,
  pub crawl_state: Option<RunState>,
}

/// A consistent copy of every unit's state.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
  pub(crate) seq: u64,
  pub(crate) units: HashMap<UnitKey, UnitStatus>,
}

impl RegistrySnapshot {
  /// Sequence number of the last mutation included in this snapshot.
  pub fn seq(&self) -> u64 {
    self.seq
  }

  pub fn contains(&self, key: &UnitKey) -> bool {
    self.units.contains_key(key)
  }

  pub fn status(&self, key: &UnitKey) -> Option<UnitStatus> {
    self.units.get(key).copied()
  }

  pub fn state(&self, key: &UnitKey) -> Option<RunState> {
    self.units.get(key).and_then(|s| s.state)
  }

  pub fn crawl_state(&self, key: &UnitKey) -> Option<RunState> {
    self.units.get(key).and_then(|s| s.crawl_state)
  }
}

impl FromIterator<(UnitKey, UnitStatus)> for RegistrySnapshot {
  fn from_iter<I: IntoIterator<Item = (UnitKey, UnitStatus)>>(iter: I) -> Self {
    Self {
      seq: 0,
      units: iter.into_iter().collect(),
    }
  }
}
