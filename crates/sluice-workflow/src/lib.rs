//! Sluice Workflow
//!
//! This crate provides the validated workflow representation for Sluice.
//! A [`Workflow`] is built from a [`sluice_config::WorkflowDef`] (or directly
//! from model types) and guarantees:
//! - trigger names are unique
//! - conditional triggers carry a non-empty predicate, on-demand triggers none
//! - every trigger has at least one action naming exactly one unit
//! - crawl-state conditions only target crawls
//! - the trigger dependency graph is acyclic
//!
//! Rejecting cycles is a restriction of this crate, not something the
//! scheduler needs: a trigger fires at most once per generation, so a loop of
//! triggers would stop after one pass anyway. Requiring an acyclic graph
//! gives every workflow a dependency order for `sluice validate`,
//! [`crate::WorkflowGraph::dependency_order`] and the arming order of
//! `arm_all`, and a well-defined set of final stages for pipeline
//! completion. Lifting it would mean falling back to declaration order for
//! triggers on a cycle.
//!
//! The [`WorkflowGraph`] indexes triggers by the units their predicates
//! reference, so the scheduler can find the triggers affected by a state
//! change without scanning the workflow.

mod error;
mod graph;
mod trigger;
mod unit;
mod workflow;

pub use error::WorkflowError;
pub use graph::WorkflowGraph;
pub use trigger::{
  ActionKind, ActionRef, ArmState, Comparator, Condition, Predicate, StateField, Trigger,
  TriggerKind,
};
pub use unit::UnitKey;
pub use workflow::Workflow;

pub use sluice_config::{Combinator, RunState, UnitKind};
