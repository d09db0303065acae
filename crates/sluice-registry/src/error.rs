use sluice_workflow::{RunState, UnitKey};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
  /// The unit was never registered. A dangling reference means the
  /// workflow definition is malformed.
  #[error("unit not registered: {0}")]
  NotFound(UnitKey),

  #[error("invalid transition for {key}: {from} -> {to}")]
  InvalidTransition {
    key: UnitKey,
    from: RunState,
    to: RunState,
  },
}
