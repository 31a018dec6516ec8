//! Options and outcome shared by the debate and workflow flows.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use agora_core::types::{TokenUsageSummary, TraceEntry};

pub type IterationCallback = Box<dyn Fn(&TraceEntry) + Send + Sync>;
pub type FinalCallback = Box<dyn Fn(&RunOutcome) + Send + Sync>;

/// Per-run knobs: identity, cancellation, and live streaming hooks.
#[derive(Default)]
pub struct RunOptions {
    pub run_id: Option<String>,
    pub cancel: CancellationToken,
    pub on_iteration: Option<IterationCallback>,
    pub on_final: Option<FinalCallback>,
}

impl RunOptions {
    pub(crate) fn run_id_or_new(&self) -> String {
        self.run_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    pub(crate) fn emit_iteration(&self, entry: &TraceEntry) {
        if let Some(cb) = &self.on_iteration {
            cb(entry);
        }
    }

    pub(crate) fn emit_final(&self, outcome: &RunOutcome) {
        if let Some(cb) = &self.on_final {
            cb(outcome);
        }
    }
}

/// What a completed run hands back to its caller.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub answer: String,
    pub confidence: f64,
    pub justification: String,
    pub run_id: String,
    pub trace: Vec<TraceEntry>,
    pub tokens: TokenUsageSummary,
}
