//! The iterative debate loop: decide, mutate the roster, fan out, score,
//! and finally aggregate.

use std::sync::Arc;
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use tracing::{debug, info, instrument};

use agora_core::config::RunConfig;
use agora_core::decision::DecisionAction;
use agora_core::error::Result;
use agora_core::traits::{BackendMessage, ChatBackend, EvidenceSource, MemoryStore, RunStore};
use agora_core::types::{
    AgentUnit, Candidate, Critique, FactCheckResult, RunRecord, ScoreResult, TraceDecision,
    TraceEntry,
};

use crate::aggregate::ScoreAggregator;
use crate::factcheck::{perform_fact_check, DEFAULT_FACT_CHECKER_ID};
use crate::oracle::DecisionOracle;
use crate::parse::try_parse_value;
use crate::pool::{AgentCall, AgentCallOutcome, ExecutionPool};
use crate::roster::WorkingRoster;
use crate::run::{RunOptions, RunOutcome};
use crate::scoring::parse_candidate_scores;
use crate::verify::canonicalize_whitespace;

/// Severity assumed when a critic's output carries no parseable severity.
const DEFAULT_SEVERITY: f64 = 2.5;

/// How many evidence snippets back a run.
const EVIDENCE_LIMIT: usize = 3;

fn severity_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)severity\s*[:=]\s*([-+]?(?:\d+\.?\d*|\.\d+))")
            .expect("severity line pattern")
    })
}

/// Pull a severity out of critic prose: embedded JSON `{"severity": n}`
/// first, then a `severity: n` line, else the default. Clamped 0..=5.
fn parse_severity(text: &str) -> f64 {
    let raw = try_parse_value(text)
        .and_then(|v| v.get("severity").and_then(|s| s.as_f64()))
        .or_else(|| {
            severity_line_pattern()
                .captures(text)
                .and_then(|c| c[1].parse::<f64>().ok())
        })
        .unwrap_or(DEFAULT_SEVERITY);
    if raw.is_finite() { raw.clamp(0.0, 5.0) } else { DEFAULT_SEVERITY }
}

/// Runs the full deliberation loop for one question.
pub struct DebateOrchestrator {
    backend: Arc<dyn ChatBackend>,
    config: Arc<RunConfig>,
    memory: Arc<dyn MemoryStore>,
    runs: Arc<dyn RunStore>,
    evidence: Arc<dyn EvidenceSource>,
    aggregator: ScoreAggregator,
}

impl DebateOrchestrator {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        config: Arc<RunConfig>,
        memory: Arc<dyn MemoryStore>,
        runs: Arc<dyn RunStore>,
        evidence: Arc<dyn EvidenceSource>,
    ) -> Self {
        Self {
            backend,
            config,
            memory,
            runs,
            evidence,
            aggregator: ScoreAggregator::default(),
        }
    }

    pub fn with_aggregator(mut self, aggregator: ScoreAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    /// Run the debate. Bounded: terminates after at most `max_iterations`
    /// rounds. Cancellation is polled between stages; already-joined work is
    /// still recorded.
    #[instrument(skip_all, fields(question_len = question.len()))]
    pub async fn run(
        &self,
        question: &str,
        initial_roster: Vec<AgentUnit>,
        opts: RunOptions,
    ) -> Result<RunOutcome> {
        let oracle = DecisionOracle::new(self.backend.clone(), self.config.clone());
        let pool =
            ExecutionPool::new(self.backend.clone(), self.config.clone(), opts.cancel.clone());
        let mut roster = WorkingRoster::new(initial_roster);
        let evidence = self.evidence.retrieve(question, EVIDENCE_LIMIT);
        let memory_snapshot = self.memory.snapshot().await;

        let mut trace: Vec<TraceEntry> = Vec::new();
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut critiques: Vec<Critique> = Vec::new();
        let mut fact_checks: Vec<FactCheckResult> = Vec::new();
        let mut scores: Vec<ScoreResult> = Vec::new();
        let mut last_severity = 0.0;

        let mut iteration: u32 = 0;
        let mut budget = self.config.max_iterations.max(1);

        while iteration < budget {
            if opts.cancel.is_cancelled() {
                info!(iteration, "run cancelled before decision");
                break;
            }

            let decision = oracle
                .decide(
                    question,
                    iteration,
                    &memory_snapshot,
                    roster.units(),
                    last_severity,
                    opts.cancel.child_token(),
                )
                .await;
            budget = decision.iteration_budget.clamp(1, self.config.max_iterations.max(1));
            roster.apply(&decision, Utc::now());

            let mut agents_ran: Vec<String> = Vec::new();

            // Cancellation observed between stages skips the rest of the
            // round; the work already joined still lands in the trace entry
            // below.
            let mut interrupted = opts.cancel.is_cancelled();

            // Responder stage. An empty plan carries the previous round's
            // candidate set forward.
            let responders = roster.enabled_named(&decision.plan.run_responders);
            if !interrupted && !responders.is_empty() {
                let calls = responders
                    .iter()
                    .map(|unit| AgentCall {
                        unit: unit.clone(),
                        messages: self.responder_messages(question, unit, &critiques),
                    })
                    .collect();
                let outcomes = pool.invoke_all(calls, Some(&decision.provider_strategy)).await;
                agents_ran.extend(outcomes.iter().map(|o| o.agent_id.clone()));
                candidates = outcomes.into_iter().map(to_candidate).collect();
                critiques = Vec::new();
                fact_checks = Vec::new();
                scores = Vec::new();
            }

            // Critic stage: one call per (critic, candidate) pair.
            interrupted = interrupted || opts.cancel.is_cancelled();
            let critics = roster.enabled_named(&decision.plan.run_critics);
            if !interrupted && !critics.is_empty() && !candidates.is_empty() {
                let mut calls = Vec::new();
                let mut pairs = Vec::new();
                for critic in &critics {
                    for candidate in &candidates {
                        pairs.push((critic.id.clone(), candidate.agent_id.clone()));
                        calls.push(AgentCall {
                            unit: critic.clone(),
                            messages: critic_messages(question, critic, candidate),
                        });
                    }
                }
                let outcomes = pool.invoke_all(calls, Some(&decision.provider_strategy)).await;
                agents_ran.extend(critics.iter().map(|c| c.id.clone()));
                critiques = pairs
                    .into_iter()
                    .zip(outcomes)
                    .map(|((agent_id, target_id), outcome)| Critique {
                        agent_id,
                        target_id,
                        severity: parse_severity(&outcome.text),
                        content: outcome.text,
                    })
                    .collect();
                if !critiques.is_empty() {
                    last_severity = critiques.iter().map(|c| c.severity).sum::<f64>()
                        / critiques.len() as f64;
                }
            }

            // Fact-check stage: pure lexical overlap, one per candidate,
            // tagged with the candidate id so aggregation can match directly.
            if !interrupted && decision.plan.run_fact_checker && !candidates.is_empty() {
                fact_checks = candidates
                    .iter()
                    .map(|c| perform_fact_check(&c.content, &evidence, &c.agent_id))
                    .collect();
                agents_ran.push(
                    roster
                        .fact_checker_id()
                        .unwrap_or_else(|| DEFAULT_FACT_CHECKER_ID.to_string()),
                );
            }

            // Scoring stage: exactly one scoring agent, permissive parse.
            interrupted = interrupted || opts.cancel.is_cancelled();
            if !interrupted && decision.plan.run_scoring && !candidates.is_empty() {
                if let Some(scorer) = roster.scoring_agent() {
                    let calls = vec![AgentCall {
                        unit: scorer.clone(),
                        messages: scoring_messages(question, &scorer, &candidates),
                    }];
                    let outcomes =
                        pool.invoke_all(calls, Some(&decision.provider_strategy)).await;
                    if let Some(outcome) = outcomes.into_iter().next() {
                        scores = parse_candidate_scores(&outcome.text, &candidates);
                        agents_ran.push(scorer.id);
                    }
                }
            }

            // Self-verification: deterministic canonicalization, no model call.
            if !interrupted && decision.plan.run_self_verifier {
                for candidate in &mut candidates {
                    candidate.content = canonicalize_whitespace(&candidate.content);
                }
            }

            let stop = decision.action == DecisionAction::Stop;
            if interrupted {
                info!(iteration, "run cancelled mid-round, recording partial entry");
            }
            debug!(
                iteration,
                candidates = candidates.len(),
                critiques = critiques.len(),
                avg_severity = last_severity,
                stop,
                "iteration complete"
            );

            let entry = TraceEntry {
                iteration: iteration as usize,
                agents_ran,
                responder_outputs: candidates.clone(),
                critic_outputs: critiques.clone(),
                fact_checks: fact_checks.clone(),
                scores: scores.clone(),
                decision: TraceDecision::Meta { decision },
                evidence: evidence.clone(),
            };
            opts.emit_iteration(&entry);
            trace.push(entry);

            iteration += 1;
            if stop || interrupted || opts.cancel.is_cancelled() {
                break;
            }
        }

        // The last iteration's sets feed the aggregator exactly once.
        let ranked = self.aggregator.aggregate(&candidates, &critiques, &fact_checks, &scores);
        let chosen = self.aggregator.choose_final(&ranked, &evidence);

        let tokens = pool.usage_summary();
        let run_id = opts.run_id_or_new();
        let outcome = RunOutcome {
            answer: chosen.answer,
            confidence: chosen.confidence,
            justification: chosen.justification,
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
                agents_used,
                workflow: None,
            })
            .await?;

        self.memory.record_question(question, true, outcome.confidence).await?;
        for ranked_candidate in &ranked {
            let agent_id = &ranked_candidate.candidate.agent_id;
            let cost =
                outcome.tokens.agent_usage.get(agent_id).map(|u| u.cost).unwrap_or(0.0);
            self.memory
                .record_agent_performance(
                    agent_id,
                    ranked_candidate.raw_score,
                    ranked_candidate.avg_severity,
                    cost,
                )
                .await?;
        }

        Ok(outcome)
    }

    fn responder_messages(
        &self,
        question: &str,
        unit: &AgentUnit,
        prior_critiques: &[Critique],
    ) -> Vec<BackendMessage> {
        let mut user = format!("Question:\n{question}\n");
        let own: Vec<&Critique> =
            prior_critiques.iter().filter(|c| c.target_id == unit.id).collect();
        if !own.is_empty() {
            user.push_str("\nCritiques of your previous answer:\n");
            for critique in own {
                user.push_str(&format!("- (severity {:.1}) {}\n", critique.severity, critique.content));
            }
            user.push_str("\nAddress the critiques and produce an improved answer.\n");
        } else {
            user.push_str("\nProduce your best answer.\n");
        }
        vec![BackendMessage::system(&unit.system_prompt), BackendMessage::user(user)]
    }
}

fn to_candidate(outcome: AgentCallOutcome) -> Candidate {
    Candidate {
        agent_id: outcome.agent_id,
        content: outcome.text,
        model: outcome.model,
        provider: outcome.provider,
        cost: outcome.cost,
        usage: outcome.usage,
    }
}

fn critic_messages(question: &str, critic: &AgentUnit, candidate: &Candidate) -> Vec<BackendMessage> {
    vec![
        BackendMessage::system(&critic.system_prompt),
        BackendMessage::user(format!(
            "Question:\n{question}\n\n\
             Candidate answer from {}:\n{}\n\n\
             Critique this answer. Point out flaws, omissions, and unsupported claims. \
             End with a line `severity: <0-5>` rating how serious the problems are.",
            candidate.agent_id, candidate.content
        )),
    ]
}

fn scoring_messages(
    question: &str,
    scorer: &AgentUnit,
    candidates: &[Candidate],
) -> Vec<BackendMessage> {
    let listing = candidates
        .iter()
        .map(|c| format!("Candidate {}:\n{}", c.agent_id, c.content))
        .collect::<Vec<_>>()
        .join("\n\n");
    vec![
        BackendMessage::system(&scorer.system_prompt),
        BackendMessage::user(format!(
            "Question:\n{question}\n\n{listing}\n\n\
             Score each candidate from 0 to 10. Return a JSON object mapping candidate id \
             to score, e.g. {{\"agent-1\": 7}}.",
        )),
    ]
}
