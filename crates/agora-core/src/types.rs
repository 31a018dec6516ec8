use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ProviderRate;
use crate::decision::Decision;
use crate::graph::WorkflowGraph;

/// Roles an agent can take in a deliberation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Responder,
    Critic,
    Opponent,
    FactChecker,
    ScoringAgent,
    SelfVerifier,
    DomainExpert,
}

impl AgentRole {
    /// Critics and opponents both produce critiques.
    pub fn is_critic(&self) -> bool {
        matches!(self, AgentRole::Critic | AgentRole::Opponent)
    }
}

/// A configured agent: a prompt bound to a model, provider, and sampling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentUnit {
    pub id: String,
    #[serde(default = "default_agent_name")]
    pub name: String,
    pub role: AgentRole,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_agent_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
}

pub fn default_agent_name() -> String { "New Agent".to_string() }
pub fn default_system_prompt() -> String { "You are a helpful assistant.".to_string() }
pub fn default_model() -> String { "gpt-4o-mini".to_string() }
pub fn default_temperature() -> f32 { 0.7 }
pub fn default_agent_max_tokens() -> u32 { 1024 }
fn default_true() -> bool { true }

/// Token counts for a single backend call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CallUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
}

/// One responder's answer for one iteration or workflow node. Immutable once
/// recorded into a trace entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub agent_id: String,
    pub content: String,
    pub model: String,
    pub provider: String,
    pub cost: f64,
    pub usage: CallUsage,
}

/// A critic's judgement of one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Critique {
    /// The critic that produced this.
    pub agent_id: String,
    /// The candidate (by its responder's agent id) being critiqued.
    pub target_id: String,
    pub content: String,
    /// 0..=5, clamped before leaving the orchestrator.
    pub severity: f64,
}

/// Lexical fact-check output for one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactCheckResult {
    pub agent_id: String,
    pub unsupported_claims: Vec<String>,
    /// 0..=1, clamped.
    pub confidence: f64,
}

/// A scoring agent's score for one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResult {
    pub candidate_id: String,
    /// 0..=10, clamped.
    pub score: f64,
}

/// A retrieved snippet of supporting material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub doc_id: String,
    pub title: String,
    pub excerpt: String,
}

/// A full document in the evidence corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub doc_id: String,
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Token and cost totals for one provider or agent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageBreakdown {
    pub input: u64,
    pub output: u64,
    pub reasoning: u64,
    pub cost: f64,
}

/// Running token/cost accounting for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsageSummary {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_reasoning_tokens: u64,
    pub total_cost: f64,
    pub provider_usage: HashMap<String, UsageBreakdown>,
    pub agent_usage: HashMap<String, UsageBreakdown>,
}

impl TokenUsageSummary {
    /// Record one call's usage under both the agent and the provider.
    pub fn add_usage(&mut self, agent_id: &str, provider: &str, rate: &ProviderRate, usage: &CallUsage) -> f64 {
        let cost = usage.input_tokens as f64 * rate.input
            + usage.output_tokens as f64 * rate.output
            + usage.reasoning_tokens as f64 * rate.reasoning;

        self.total_input_tokens += usage.input_tokens;
        self.total_output_tokens += usage.output_tokens;
        self.total_reasoning_tokens += usage.reasoning_tokens;
        self.total_cost += cost;

        let by_provider = self.provider_usage.entry(provider.to_string()).or_default();
        by_provider.input += usage.input_tokens;
        by_provider.output += usage.output_tokens;
        by_provider.reasoning += usage.reasoning_tokens;
        by_provider.cost += cost;

        let by_agent = self.agent_usage.entry(agent_id.to_string()).or_default();
        by_agent.input += usage.input_tokens;
        by_agent.output += usage.output_tokens;
        by_agent.reasoning += usage.reasoning_tokens;
        by_agent.cost += cost;

        cost
    }
}

/// What drove one trace entry: a meta decision (debate iteration) or a
/// workflow node step (fixed DAG).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceDecision {
    Meta { decision: Decision },
    WorkflowStep {
        workflow_id: String,
        workflow_name: String,
        node_id: String,
        node_label: Option<String>,
        agent_id: String,
    },
}

/// Everything produced in one iteration or one workflow node. Append-only;
/// immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub iteration: usize,
    pub agents_ran: Vec<String>,
    pub responder_outputs: Vec<Candidate>,
    pub critic_outputs: Vec<Critique>,
    pub fact_checks: Vec<FactCheckResult>,
    pub scores: Vec<ScoreResult>,
    pub decision: TraceDecision,
    pub evidence: Vec<EvidenceItem>,
}

/// Record of one completed run. Written once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub question: String,
    pub timestamp: DateTime<Utc>,
    pub final_answer: String,
    pub confidence: f64,
    pub justification: String,
    pub iterations: usize,
    pub trace: Vec<TraceEntry>,
    pub tokens: TokenUsageSummary,
    pub agents_used: Vec<String>,
    #[serde(default)]
    pub workflow: Option<WorkflowGraph>,
}

/// Per-agent running averages from past runs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AgentPerformance {
    pub runs: u64,
    pub avg_score: f64,
    pub avg_severity: f64,
    pub avg_cost: f64,
}

/// What the decision oracle sees of accumulated memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub question_count: usize,
    pub agent_performance: HashMap<String, AgentPerformance>,
}
