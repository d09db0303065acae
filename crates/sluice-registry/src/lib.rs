//! Sluice Registry
//!
//! The [`JobRegistry`] is the single owner of every job and crawl run record.
//! Runs change only through [`JobRegistry::report`] (or the
//! [`JobRegistry::report_state`] shorthand); each accepted change is published
//! as a [`StateChange`] to every subscriber.
//!
//! All mutation is serialized behind one lock and events are sent while that
//! lock is held, so subscribers observe a unit's transitions in the order they
//! were applied. Evaluation reads go through [`JobRegistry::snapshot`], which
//! copies every unit's state under a single read lock.

mod error;
mod registry;
mod run;
mod snapshot;

pub use error::RegistryError;
pub use registry::JobRegistry;
pub use run::{JobRun, StateChange, StateUpdate};
pub use snapshot::{RegistrySnapshot, UnitStatus};
