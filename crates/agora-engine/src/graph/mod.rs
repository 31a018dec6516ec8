//! Fixed-DAG workflow execution: scheduling, running, and suggestion.

pub mod runner;
pub mod schedule;
pub mod suggest;

pub use runner::WorkflowRunner;
pub use schedule::{compute_topological_order, TopoSchedule};
pub use suggest::{suggest_workflow, Suggestion};
