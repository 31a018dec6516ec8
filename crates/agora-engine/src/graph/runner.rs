//! Executes a fixed workflow DAG node by node.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use agora_core::config::RunConfig;
use agora_core::error::{AgoraError, Result};
use agora_core::graph::WorkflowGraph;
use agora_core::traits::{BackendMessage, ChatBackend, MemoryStore, RunStore};
use agora_core::types::{AgentUnit, Candidate, RunRecord, TraceDecision, TraceEntry};

use crate::graph::schedule::compute_topological_order;
use crate::pool::{AgentCall, ExecutionPool};
use crate::run::{RunOptions, RunOutcome};

/// Fixed confidence reported by workflow runs; no scoring stage exists to
/// derive a better one.
const WORKFLOW_CONFIDENCE: f64 = 0.5;

/// Neutral performance recorded for workflow agents (no scores or critiques
/// are available in a fixed pipeline).
const NEUTRAL_SCORE: f64 = 5.0;

pub struct WorkflowRunner {
    backend: Arc<dyn ChatBackend>,
    config: Arc<RunConfig>,
    memory: Arc<dyn MemoryStore>,
    runs: Arc<dyn RunStore>,
}

impl WorkflowRunner {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        config: Arc<RunConfig>,
        memory: Arc<dyn MemoryStore>,
        runs: Arc<dyn RunStore>,
    ) -> Self {
        Self { backend, config, memory, runs }
    }

    /// Walk the graph in topological order, one backend call per node.
    /// Validation failures are fatal; individual call failures degrade that
    /// node's output and the walk continues. Cancellation is polled between
    /// nodes.
    #[instrument(skip_all, fields(workflow = %graph.name))]
    pub async fn run(
        &self,
        question: &str,
        graph: &WorkflowGraph,
        roster: &[AgentUnit],
        opts: RunOptions,
    ) -> Result<RunOutcome> {
        if graph.nodes.is_empty() {
            return Err(AgoraError::GraphValidation("workflow has no nodes".to_string()));
        }

        let agent_by_id: HashMap<&str, &AgentUnit> =
            roster.iter().map(|a| (a.id.as_str(), a)).collect();
        for node in &graph.nodes {
            match agent_by_id.get(node.agent_id.as_str()) {
                None => {
                    return Err(AgoraError::GraphValidation(format!(
                        "unknown agent in workflow: {}",
                        node.agent_id
                    )))
                }
                Some(agent) if !agent.enabled => {
                    return Err(AgoraError::GraphValidation(format!(
                        "agent disabled in workflow: {}",
                        node.agent_id
                    )))
                }
                Some(_) => {}
            }
        }

        let schedule = compute_topological_order(graph)?;
        let pool = ExecutionPool::new(self.backend.clone(), self.config.clone(), opts.cancel.clone());

        let mut outputs: HashMap<String, Candidate> = HashMap::new();
        let mut labels: HashMap<String, Option<String>> = HashMap::new();
        let mut trace: Vec<TraceEntry> = Vec::new();

        for (step, node_id) in schedule.order.iter().enumerate() {
            if opts.cancel.is_cancelled() {
                info!(node_id = %node_id, "workflow cancelled before node");
                break;
            }

            // Validated above; node ids come from the schedule.
            let Some(node) = graph.node(node_id) else { continue };
            let Some(agent) = agent_by_id.get(node.agent_id.as_str()).copied() else { continue };

            let upstream = schedule.incoming[node_id]
                .iter()
                .filter_map(|src| {
                    let prev = outputs.get(src)?;
                    let title = labels
                        .get(src)
                        .and_then(|l| l.clone())
                        .or_else(|| {
                            agent_by_id.get(prev.agent_id.as_str()).map(|a| a.name.clone())
                        })
                        .unwrap_or_else(|| prev.agent_id.clone());
                    Some(format!("From {title} ({}):\n{}", prev.agent_id, prev.content))
                })
                .collect::<Vec<_>>()
                .join("\n\n");

            let has_downstream = !schedule.outgoing[node_id].is_empty();
            let mut user_content = format!("Question:\n{question}\n\n");
            if !upstream.is_empty() {
                user_content.push_str(&format!("Upstream outputs:\n{upstream}\n\n"));
            }
            user_content.push_str(if has_downstream {
                "Produce your best intermediate output for the next agent(s). Keep it structured.\n"
            } else {
                "Produce the final answer.\n"
            });

            let call = AgentCall {
                unit: agent.clone(),
                messages: vec![
                    BackendMessage::system(&agent.system_prompt),
                    BackendMessage::user(user_content),
                ],
            };
            let outcome = pool
                .invoke_all(vec![call], None)
                .await
                .into_iter()
                .next()
                .ok_or_else(|| AgoraError::GraphValidation("empty pool result".to_string()))?;

            let candidate = Candidate {
                agent_id: outcome.agent_id.clone(),
                content: outcome.text,
                model: outcome.model,
                provider: outcome.provider,
                cost: outcome.cost,
                usage: outcome.usage,
            };
            outputs.insert(node_id.clone(), candidate.clone());
            labels.insert(node_id.clone(), node.label.clone());

            let entry = TraceEntry {
                iteration: step,
                agents_ran: vec![agent.id.clone()],
                responder_outputs: vec![candidate],
                critic_outputs: vec![],
                fact_checks: vec![],
                scores: vec![],
                decision: TraceDecision::WorkflowStep {
                    workflow_id: graph.id.clone(),
                    workflow_name: graph.name.clone(),
                    node_id: node_id.clone(),
                    node_label: node.label.clone(),
                    agent_id: agent.id.clone(),
                },
                evidence: vec![],
            };
            opts.emit_iteration(&entry);
            trace.push(entry);
        }

        let chosen_sink = schedule
            .order
            .iter()
            .filter(|id| schedule.outgoing[id.as_str()].is_empty())
            .next_back()
            .or_else(|| schedule.order.last())
            .cloned()
            .unwrap_or_default();

        let answer = outputs
            .get(&chosen_sink)
            .map(|c| c.content.clone())
            .unwrap_or_else(|| "Unable to answer".to_string());
        let justification = format!(
            "Workflow \"{}\" ({}) produced answer from node {chosen_sink}",
            graph.name, graph.id
        );

        let tokens = pool.usage_summary();
        let run_id = opts.run_id_or_new();
        let outcome = RunOutcome {
            answer,
            confidence: WORKFLOW_CONFIDENCE,
            justification,
            run_id: run_id.clone(),
            trace,
            tokens,
        };
        opts.emit_final(&outcome);

        let mut agents_used: Vec<String> = Vec::new();
        for entry in &outcome.trace {
            for id in &entry.agents_ran {
                if !agents_used.contains(id) {
                    agents_used.push(id.clone());
                }
            }
        }

        self.runs
            .add(RunRecord {
                id: run_id,
                question: question.to_string(),
                timestamp: Utc::now(),
                final_answer: outcome.answer.clone(),
                confidence: outcome.confidence,
                justification: outcome.justification.clone(),
                iterations: outcome.trace.len(),
                trace: outcome.trace.clone(),
                tokens: outcome.tokens.clone(),
                agents_used: agents_used.clone(),
                workflow: Some(graph.clone()),
            })
            .await?;

        self.memory.record_question(question, true, outcome.confidence).await?;
        for agent_id in &agents_used {
            let cost = outcome.tokens.agent_usage.get(agent_id).map(|u| u.cost).unwrap_or(0.0);
            self.memory.record_agent_performance(agent_id, NEUTRAL_SCORE, 0.0, cost).await?;
        }

        Ok(outcome)
    }
}
