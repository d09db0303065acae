//! Scheduler events and notifiers for observability.
//!
//! Events are emitted as triggers arm, fire, dispatch and fail, so consumers
//! can persist an audit trail, stream progress, or assert on dispatch order
//! in tests.

use serde::{Deserialize, Serialize};
use sluice_workflow::UnitKey;
use tokio::sync::mpsc;

use crate::trigger::TriggerFailure;

/// Events emitted by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
  /// A trigger became eligible for evaluation or activation.
  TriggerArmed { workflow: String, trigger: String },

  /// A trigger fired; its actions are about to be dispatched.
  TriggerFired {
    workflow: String,
    trigger: String,
    generation: u64,
  },

  /// The executor acknowledged a start request.
  ActionDispatched {
    workflow: String,
    trigger: String,
    unit: UnitKey,
    run_id: String,
    attempts: u32,
  },

  /// A trigger could not fire, or could not dispatch all of its actions.
  TriggerFailed {
    workflow: String,
    trigger: String,
    failure: TriggerFailure,
  },

  /// A new generation started.
  WorkflowReset { workflow: String, generation: u64 },

  /// The workflow run was cancelled.
  WorkflowCancelled {
    workflow: String,
    stopped: Vec<UnitKey>,
  },
}

/// Trait for receiving scheduler events.
///
/// The scheduler calls `notify` for each event; implementations decide what
/// to do with them.
pub trait EventNotifier: Send + Sync {
  /// Called when a scheduler event occurs.
  fn notify(&self, event: SchedulerEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl EventNotifier for NoopNotifier {
  fn notify(&self, _event: SchedulerEvent) {}
}

/// A notifier that sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never stalls a fire in progress. Volume is a
  // handful of events per trigger per generation.
  sender: mpsc::UnboundedSender<SchedulerEvent>,
}

impl ChannelNotifier {
  /// Create a new channel notifier.
  pub fn new(sender: mpsc::UnboundedSender<SchedulerEvent>) -> Self {
    Self { sender }
  }

  /// Create a notifier together with its receiving end.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<SchedulerEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self::new(sender), receiver)
  }
}

impl EventNotifier for ChannelNotifier {
  fn notify(&self, event: SchedulerEvent) {
    // Receiver may have been dropped.
    let _ = self.sender.send(event);
  }
}
