//! Deliberation engine: the debate orchestrator, the workflow DAG runner,
//! scoring and aggregation, and run control.

pub mod aggregate;
pub mod citations;
pub mod collab;
pub mod factcheck;
pub mod graph;
pub mod oracle;
pub mod orchestrator;
pub mod parse;
pub mod pool;
pub mod registry;
pub mod roster;
pub mod run;
pub mod scoring;
pub mod service;
pub mod verify;

pub use aggregate::{DirectAverage, FinalAnswer, MentionWeighted, RankedCandidate, ScoreAggregator};
pub use graph::{compute_topological_order, suggest_workflow, Suggestion, TopoSchedule, WorkflowRunner};
pub use orchestrator::DebateOrchestrator;
pub use registry::{RunRegistry, RunTicket};
pub use run::{RunOptions, RunOutcome};
pub use service::{RunService, StartedRun};
