use std::fmt;

use serde::{Deserialize, Serialize};
use sluice_config::UnitKind;

/// Identity of a runnable unit: a job or crawl, keyed by name and kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitKey {
  pub name: String,
  pub kind: UnitKind,
}

impl UnitKey {
  pub fn new(name: impl Into<String>, kind: UnitKind) -> Self {
    Self {
      name: name.into(),
      kind,
    }
  }

  pub fn job(name: impl Into<String>) -> Self {
    Self::new(name, UnitKind::Job)
  }

  pub fn crawl(name: impl Into<String>) -> Self {
    Self::new(name, UnitKind::Crawl)
  }
}

impl fmt::Display for UnitKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.kind, self.name)
  }
}
