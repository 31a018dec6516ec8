//! Wires a flow to the run registry and the live trace hub.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use agora_core::error::Result;
use agora_core::graph::WorkflowGraph;
use agora_core::hub::{LiveTraceHub, TraceEvent, TraceEventKind};
use agora_core::types::AgentUnit;

use crate::graph::runner::WorkflowRunner;
use crate::orchestrator::DebateOrchestrator;
use crate::registry::RunRegistry;
use crate::run::{RunOptions, RunOutcome};

/// How long a finished run's trace channel stays subscribable.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(30);

/// A run accepted by the service. The secret authorizes cancellation; the
/// handle resolves with the outcome.
pub struct StartedRun {
    pub run_id: String,
    pub secret: String,
    pub handle: JoinHandle<Result<RunOutcome>>,
}

/// Front door for starting, observing, and cancelling runs.
pub struct RunService {
    registry: Arc<RunRegistry>,
    hub: Arc<LiveTraceHub>,
    orchestrator: Arc<DebateOrchestrator>,
    runner: Arc<WorkflowRunner>,
    grace: Duration,
}

impl RunService {
    pub fn new(
        registry: Arc<RunRegistry>,
        hub: Arc<LiveTraceHub>,
        orchestrator: Arc<DebateOrchestrator>,
        runner: Arc<WorkflowRunner>,
    ) -> Self {
        Self { registry, hub, orchestrator, runner, grace: DEFAULT_GRACE }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Start a debate run for the question.
    pub fn start_ask(
        &self,
        question: String,
        roster: Vec<AgentUnit>,
        run_id: Option<String>,
    ) -> StartedRun {
        let orchestrator = self.orchestrator.clone();
        self.start(run_id, move |opts| async move {
            orchestrator.run(&question, roster, opts).await
        })
    }

    /// Start a fixed-workflow run.
    pub fn start_workflow(
        &self,
        question: String,
        graph: WorkflowGraph,
        roster: Vec<AgentUnit>,
        run_id: Option<String>,
    ) -> StartedRun {
        let runner = self.runner.clone();
        self.start(run_id, move |opts| async move {
            runner.run(&question, &graph, &roster, opts).await
        })
    }

    fn start<F, Fut>(&self, run_id: Option<String>, flow: F) -> StartedRun
    where
        F: FnOnce(RunOptions) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<RunOutcome>> + Send,
    {
        let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let ticket = self.registry.register(&run_id);
        info!(run_id = %run_id, "run started");

        let hub_iter = self.hub.clone();
        let hub_final = self.hub.clone();
        let iter_run_id = run_id.clone();
        let final_run_id = run_id.clone();
        let opts = RunOptions {
            run_id: Some(run_id.clone()),
            cancel: ticket.signal.clone(),
            on_iteration: Some(Box::new(move |entry| {
                let payload = serde_json::to_value(entry).unwrap_or_else(|_| json!({}));
                hub_iter.publish(&iter_run_id, TraceEventKind::Iteration, payload);
            })),
            on_final: Some(Box::new(move |outcome| {
                let payload = json!({
                    "answer": outcome.answer,
                    "confidence": outcome.confidence,
                    "justification": outcome.justification,
                    "tokens": outcome.tokens,
                });
                hub_final.publish(&final_run_id, TraceEventKind::Final, payload);
            })),
        };

        let hub = self.hub.clone();
        let registry = self.registry.clone();
        let grace = self.grace;
        let task_run_id = run_id.clone();
        let handle = tokio::spawn(async move {
            let result = flow(opts).await;
            if let Err(err) = &result {
                error!(run_id = %task_run_id, error = %err, "run failed");
                hub.publish(
                    &task_run_id,
                    TraceEventKind::Error,
                    json!({ "error": err.to_string() }),
                );
            }

            // Keep the channel subscribable for late readers, then tear down.
            // The registry entry goes first so `subscribe` stops minting hub
            // channels for a run about to be cleared.
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                registry.complete(&task_run_id);
                hub.clear(&task_run_id);
            });

            result
        });

        StartedRun { run_id, secret: ticket.secret, handle }
    }

    /// Cancel a run; only the matching secret succeeds.
    pub fn cancel(&self, run_id: &str, secret: &str) -> bool {
        self.registry.cancel(run_id, secret)
    }

    /// Subscribe to a run's trace stream, history replayed first. A run id
    /// the service is not tracking gets a closed, empty stream rather than
    /// a hub channel nothing would ever clear.
    pub fn subscribe(&self, run_id: &str) -> UnboundedReceiver<TraceEvent> {
        if self.registry.signal(run_id).is_some() || self.hub.history_len(run_id) > 0 {
            return self.hub.subscribe(run_id);
        }
        let (_tx, rx) = mpsc::unbounded_channel();
        rx
    }
}
