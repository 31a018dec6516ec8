use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use agora_core::config::RunConfig;
use agora_core::decision::{fallback_decision, normalize_decision, Decision, DecisionLimits};
use agora_core::traits::{BackendMessage, CallOptions, ChatBackend, ChatRequest};
use agora_core::types::{AgentUnit, MemorySnapshot};
use agora_llm::select_provider;

use crate::parse::try_parse_value;

const ORACLE_SYSTEM_PROMPT: &str = "You are the meta-supervisor orchestrating a debate among \
agents. Consider memory summaries and choose whether to continue. Output JSON strictly.";

/// Asks the reasoning backend for a per-iteration plan and normalizes the
/// untrusted result into a bounded [`Decision`].
///
/// Parse failures never surface: they recover locally into the deterministic
/// fallback decision.
pub struct DecisionOracle {
    backend: Arc<dyn ChatBackend>,
    config: Arc<RunConfig>,
}

impl DecisionOracle {
    pub fn new(backend: Arc<dyn ChatBackend>, config: Arc<RunConfig>) -> Self {
        Self { backend, config }
    }

    fn prompt(
        &self,
        question: &str,
        iteration: u32,
        memory: &MemorySnapshot,
        roster: &[AgentUnit],
        last_severity: f64,
    ) -> String {
        let roster_line = roster
            .iter()
            .map(|a| {
                format!(
                    "{}:{}:{}",
                    a.id,
                    serde_json::to_value(a.role)
                        .ok()
                        .and_then(|v| v.as_str().map(|s| s.to_string()))
                        .unwrap_or_default(),
                    if a.enabled { "on" } else { "off" }
                )
            })
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "Question: {question}\n\
             Iteration: {iteration}\n\
             Questions answered so far: {}\n\
             Average severity last round: {last_severity}\n\
             Agents: {roster_line}\n\
             Return JSON with action, explanation, iterationBudget, plan \
             {{runResponders, runCritics, runFactChecker, runScoring, runSelfVerifier}}, \
             providerStrategy {{objective, providerOverrides, modelOverrides}}, \
             promptUpdates, createAgents, disableAgents, \
             stopCriteria {{whyStopNow, unresolvedCritiques, factConfidence}}",
            memory.question_count,
        )
    }

    /// Produce this iteration's decision. Infallible by construction.
    pub async fn decide(
        &self,
        question: &str,
        iteration: u32,
        memory: &MemorySnapshot,
        roster: &[AgentUnit],
        last_severity: f64,
        cancel: CancellationToken,
    ) -> Decision {
        let provider = self
            .config
            .oracle
            .provider
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| select_provider(&self.config));

        let limits = DecisionLimits {
            max_iterations: self.config.max_iterations,
            max_tokens: self.config.max_tokens,
        };

        let completion = self
            .backend
            .complete(ChatRequest {
                messages: vec![
                    BackendMessage::system(ORACLE_SYSTEM_PROMPT),
                    BackendMessage::user(self.prompt(question, iteration, memory, roster, last_severity)),
                ],
                model: self.config.oracle.model.clone(),
                temperature: self.config.oracle.temperature,
                options: CallOptions {
                    provider: provider.clone(),
                    provider_config: self.config.providers.get(&provider).cloned(),
                    max_tokens: self.config.max_tokens,
                    cancel,
                },
            })
            .await;

        match try_parse_value(&completion.text) {
            Some(raw) => {
                debug!(iteration, "oracle decision parsed");
                normalize_decision(&raw, &provider, roster, &limits, last_severity, Utc::now())
            }
            None => {
                warn!(iteration, "oracle output unparseable, using fallback decision");
                fallback_decision(iteration, &limits, roster, last_severity)
            }
        }
    }
}
