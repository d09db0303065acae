use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
  #[error("duplicate trigger name: {0}")]
  DuplicateTrigger(String),

  #[error("unit declared twice: {0}")]
  DuplicateUnit(String),

  #[error("conditional trigger '{trigger}' has no conditions")]
  EmptyPredicate { trigger: String },

  #[error("on-demand trigger '{trigger}' must not have a predicate")]
  UnexpectedPredicate { trigger: String },

  #[error("trigger '{trigger}' has no actions")]
  NoActions { trigger: String },

  #[error("invalid action in trigger '{trigger}': {message}")]
  InvalidAction { trigger: String, message: String },

  #[error("invalid condition in trigger '{trigger}': {message}")]
  InvalidCondition { trigger: String, message: String },

  #[error("trigger dependency cycle through: {}", triggers.join(", "))]
  Cycle { triggers: Vec<String> },
}
