//! Sluice Config
//!
//! Serializable definition types for Sluice workflows and engine settings.
//! These describe a workflow before it is validated and resolved into the
//! model in `sluice-workflow`.
//!
//! The definition format follows the shape of a managed ETL scheduler's
//! trigger resources:
//!
//! ```json
//! {
//!   "name": "bulk-load",
//!   "units": [
//!     { "name": "extract", "kind": "job" },
//!     { "name": "catalog", "kind": "crawl" }
//!   ],
//!   "triggers": [
//!     { "name": "start", "type": "ON_DEMAND", "actions": [{ "job_name": "extract" }] },
//!     {
//!       "name": "crawl-start",
//!       "type": "CONDITIONAL",
//!       "start_on_creation": true,
//!       "actions": [{ "crawler_name": "catalog" }],
//!       "predicate": {
//!         "conditions": [
//!           { "logical_operator": "EQUALS", "job_name": "extract", "state": "SUCCEEDED" }
//!         ]
//!       }
//!     }
//!   ]
//! }
//! ```

mod enums;
mod error;
mod settings;
mod workflow;

pub use enums::{Combinator, LogicalOperator, RunState, TriggerType, UnitKind};
pub use error::ConfigError;
pub use settings::{DispatchSettings, EngineSettings, SimulationSettings};
pub use workflow::{ActionDef, ConditionDef, PredicateDef, TriggerDef, UnitDef, WorkflowDef};
