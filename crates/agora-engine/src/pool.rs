use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use agora_core::config::RunConfig;
use agora_core::decision::ProviderStrategy;
use agora_core::traits::{BackendMessage, CallOptions, ChatBackend, ChatRequest};
use agora_core::types::{AgentUnit, CallUsage, TokenUsageSummary};
use agora_llm::select_provider_for;

/// One unit of fan-out work: an agent plus the conversation to send it.
pub struct AgentCall {
    pub unit: AgentUnit,
    pub messages: Vec<BackendMessage>,
}

/// Result of one pooled call. Failures never surface as errors; a degraded
/// outcome carries the backend's labeled fallback text instead.
#[derive(Debug, Clone)]
pub struct AgentCallOutcome {
    pub agent_id: String,
    pub provider: String,
    pub model: String,
    pub text: String,
    pub usage: CallUsage,
    pub cost: f64,
    pub degraded: bool,
}

/// Parallel fan-out with a full join over agent calls.
///
/// Every call runs independently; the caller gets one outcome per input, in
/// input order, only after all calls have resolved. Usage and cost accumulate
/// into a shared per-run summary.
pub struct ExecutionPool {
    backend: Arc<dyn ChatBackend>,
    config: Arc<RunConfig>,
    usage: Mutex<TokenUsageSummary>,
    cancel: CancellationToken,
}

impl ExecutionPool {
    pub fn new(backend: Arc<dyn ChatBackend>, config: Arc<RunConfig>, cancel: CancellationToken) -> Self {
        Self {
            backend,
            config,
            usage: Mutex::new(TokenUsageSummary::default()),
            cancel,
        }
    }

    /// Resolve the provider and model for a unit under an optional decision
    /// strategy: per-agent override, the unit's own provider, the strategy's
    /// `default` override, then objective-based selection.
    fn route(&self, unit: &AgentUnit, strategy: Option<&ProviderStrategy>) -> (String, String) {
        let provider = strategy
            .and_then(|s| s.provider_overrides.get(&unit.id).cloned())
            .filter(|p| !p.is_empty())
            .or_else(|| Some(unit.provider.clone()).filter(|p| !p.is_empty()))
            .or_else(|| {
                strategy
                    .and_then(|s| s.provider_overrides.get("default").cloned())
                    .filter(|p| !p.is_empty())
            })
            .unwrap_or_else(|| {
                let objective = strategy
                    .map(|s| s.objective)
                    .unwrap_or(agora_core::decision::ProviderObjective::Balanced);
                select_provider_for(objective, &self.config)
            });

        let model = strategy
            .and_then(|s| s.model_overrides.get(&unit.id).cloned())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| unit.model.clone());

        (provider, model)
    }

    async fn invoke_one(&self, call: AgentCall, strategy: Option<&ProviderStrategy>) -> AgentCallOutcome {
        let (provider, model) = self.route(&call.unit, strategy);
        let max_tokens = call.unit.max_tokens.clamp(1, self.config.max_tokens.max(1));

        debug!(agent_id = %call.unit.id, provider = %provider, model = %model, "agent call");

        let completion = self
            .backend
            .complete(ChatRequest {
                messages: call.messages,
                model: model.clone(),
                temperature: call.unit.temperature,
                options: CallOptions {
                    provider: provider.clone(),
                    provider_config: self.config.providers.get(&provider).cloned(),
                    max_tokens,
                    cancel: self.cancel.child_token(),
                },
            })
            .await;

        let degraded = completion.provider_error.is_some();
        if degraded {
            warn!(
                agent_id = %call.unit.id,
                error = completion.provider_error.as_deref().unwrap_or(""),
                "agent call degraded to fallback"
            );
        }

        let usage = CallUsage {
            input_tokens: completion.input_tokens,
            output_tokens: completion.output_tokens,
            reasoning_tokens: completion.reasoning_tokens,
        };
        let rate = self.config.rate_for(&provider);
        let cost = self
            .usage
            .lock()
            .unwrap()
            .add_usage(&call.unit.id, &provider, &rate, &usage);

        AgentCallOutcome {
            agent_id: call.unit.id,
            provider,
            model,
            text: completion.text,
            usage,
            cost,
            degraded,
        }
    }

    /// Fan out all calls concurrently and join them all. The output has the
    /// same order and length as the input; no call's failure affects its
    /// siblings or raises for the caller.
    pub async fn invoke_all(
        &self,
        calls: Vec<AgentCall>,
        strategy: Option<&ProviderStrategy>,
    ) -> Vec<AgentCallOutcome> {
        join_all(calls.into_iter().map(|call| self.invoke_one(call, strategy))).await
    }

    /// Snapshot of the run's accumulated usage.
    pub fn usage_summary(&self) -> TokenUsageSummary {
        self.usage.lock().unwrap().clone()
    }
}
