use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::ProviderEntry;
use crate::error::Result;
use crate::types::{AgentUnit, EvidenceItem, MemorySnapshot, RunRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendMessage {
    pub role: MessageRole,
    pub content: String,
}

impl BackendMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: MessageRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: MessageRole::User, content: content.into() }
    }
}

/// Per-call options threaded through to the backend.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub provider: String,
    pub provider_config: Option<ProviderEntry>,
    pub max_tokens: u32,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<BackendMessage>,
    pub model: String,
    pub temperature: f32,
    pub options: CallOptions,
}

/// Outcome of one backend call. Never an error: provider failures come back
/// as a labeled fallback completion with `fallback = true`.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub fallback: bool,
    pub provider_error: Option<String>,
}

/// Model backend — one-shot chat completion.
pub trait ChatBackend: Send + Sync + 'static {
    /// Complete a conversation. Degrades to a fallback completion on provider
    /// failure or missing credentials; no retries.
    fn complete(&self, request: ChatRequest) -> BoxFuture<'_, ChatCompletion>;
}

/// Mutation for one roster entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentPatch {
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Agent roster — persistence collaborator.
pub trait RosterStore: Send + Sync + 'static {
    fn list(&self) -> BoxFuture<'_, Result<Vec<AgentUnit>>>;

    fn add(&self, unit: AgentUnit) -> BoxFuture<'_, Result<()>>;

    fn update(&self, id: &str, patch: AgentPatch) -> BoxFuture<'_, Result<()>>;

    /// Tombstone an agent. Never a physical removal: earlier trace references
    /// must stay resolvable.
    fn disable(&self, id: &str) -> BoxFuture<'_, Result<()>>;
}

/// Cross-run memory — question history plus per-agent performance averages.
pub trait MemoryStore: Send + Sync + 'static {
    fn record_question(
        &self,
        question: &str,
        success: bool,
        confidence: f64,
    ) -> BoxFuture<'_, Result<()>>;

    fn record_agent_performance(
        &self,
        agent_id: &str,
        score: f64,
        severity: f64,
        cost: f64,
    ) -> BoxFuture<'_, Result<()>>;

    fn snapshot(&self) -> BoxFuture<'_, MemorySnapshot>;
}

/// Completed-run archive.
pub trait RunStore: Send + Sync + 'static {
    fn add(&self, record: RunRecord) -> BoxFuture<'_, Result<()>>;
}

/// Evidence retrieval over a document corpus. Lexical and synchronous; the
/// fact-check stage depends on this staying a pure computation.
pub trait EvidenceSource: Send + Sync + 'static {
    fn retrieve(&self, query: &str, limit: usize) -> Vec<EvidenceItem>;
}
