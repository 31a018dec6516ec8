//! In-memory collaborator implementations. Each guards its state with one
//! mutex, so per-key writes are serialized the way the persistence contract
//! requires.

use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;
use tracing::debug;

use agora_core::error::Result;
use agora_core::traits::{AgentPatch, EvidenceSource, MemoryStore, RosterStore, RunStore};
use agora_core::types::{
    AgentUnit, DocumentRecord, EvidenceItem, MemorySnapshot, RunRecord,
};

/// How many recorded questions the memory keeps.
const QUESTION_HISTORY_CAP: usize = 500;

/// How much of a matching document becomes the evidence excerpt.
const EXCERPT_CHARS: usize = 200;

#[derive(Default)]
pub struct InMemoryRoster {
    agents: Mutex<Vec<AgentUnit>>,
}

impl InMemoryRoster {
    pub fn new(agents: Vec<AgentUnit>) -> Self {
        Self { agents: Mutex::new(agents) }
    }
}

impl RosterStore for InMemoryRoster {
    fn list(&self) -> BoxFuture<'_, Result<Vec<AgentUnit>>> {
        let agents = self.agents.lock().unwrap().clone();
        Box::pin(async move { Ok(agents) })
    }

    fn add(&self, unit: AgentUnit) -> BoxFuture<'_, Result<()>> {
        let mut agents = self.agents.lock().unwrap();
        if !agents.iter().any(|a| a.id == unit.id) {
            agents.push(unit);
        }
        Box::pin(async { Ok(()) })
    }

    fn update(&self, id: &str, patch: AgentPatch) -> BoxFuture<'_, Result<()>> {
        let mut agents = self.agents.lock().unwrap();
        if let Some(agent) = agents.iter_mut().find(|a| a.id == id) {
            if let Some(system_prompt) = patch.system_prompt {
                agent.system_prompt = system_prompt;
            }
            if let Some(model) = patch.model {
                agent.model = model;
            }
            if let Some(provider) = patch.provider {
                agent.provider = provider;
            }
            if let Some(enabled) = patch.enabled {
                agent.enabled = enabled;
            }
        }
        Box::pin(async { Ok(()) })
    }

    fn disable(&self, id: &str) -> BoxFuture<'_, Result<()>> {
        let mut agents = self.agents.lock().unwrap();
        if let Some(agent) = agents.iter_mut().find(|a| a.id == id) {
            agent.enabled = false;
        }
        Box::pin(async { Ok(()) })
    }
}

#[derive(Default)]
struct MemoryState {
    questions: VecDeque<String>,
    snapshot: MemorySnapshot,
}

/// Question history plus running per-agent performance averages.
#[derive(Default)]
pub struct InMemoryMemory {
    state: Mutex<MemoryState>,
}

impl InMemoryMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryStore for InMemoryMemory {
    fn record_question(
        &self,
        question: &str,
        _success: bool,
        _confidence: f64,
    ) -> BoxFuture<'_, Result<()>> {
        let mut state = self.state.lock().unwrap();
        state.questions.push_back(question.to_string());
        while state.questions.len() > QUESTION_HISTORY_CAP {
            state.questions.pop_front();
        }
        state.snapshot.question_count += 1;
        Box::pin(async { Ok(()) })
    }

    fn record_agent_performance(
        &self,
        agent_id: &str,
        score: f64,
        severity: f64,
        cost: f64,
    ) -> BoxFuture<'_, Result<()>> {
        let mut state = self.state.lock().unwrap();
        let perf = state.snapshot.agent_performance.entry(agent_id.to_string()).or_default();
        perf.runs += 1;
        let n = perf.runs as f64;
        perf.avg_score += (score - perf.avg_score) / n;
        perf.avg_severity += (severity - perf.avg_severity) / n;
        perf.avg_cost += (cost - perf.avg_cost) / n;
        Box::pin(async { Ok(()) })
    }

    fn snapshot(&self) -> BoxFuture<'_, MemorySnapshot> {
        let snapshot = self.state.lock().unwrap().snapshot.clone();
        Box::pin(async move { snapshot })
    }
}

/// Completed-run archive.
#[derive(Default)]
pub struct InMemoryRuns {
    records: Mutex<Vec<RunRecord>>,
}

impl InMemoryRuns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> Vec<RunRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl RunStore for InMemoryRuns {
    fn add(&self, record: RunRecord) -> BoxFuture<'_, Result<()>> {
        debug!(run_id = %record.id, "run recorded");
        self.records.lock().unwrap().push(record);
        Box::pin(async { Ok(()) })
    }
}

/// Lexical retrieval over a fixed document set: rank by how many query terms
/// a document contains, keep positive scores only.
pub struct StaticEvidence {
    docs: Vec<DocumentRecord>,
}

impl StaticEvidence {
    pub fn new(docs: Vec<DocumentRecord>) -> Self {
        Self { docs }
    }
}

impl EvidenceSource for StaticEvidence {
    fn retrieve(&self, query: &str, limit: usize) -> Vec<EvidenceItem> {
        let terms: Vec<String> =
            query.to_lowercase().split_whitespace().map(str::to_string).collect();

        let mut scored: Vec<(usize, &DocumentRecord)> = self
            .docs
            .iter()
            .map(|doc| {
                let text = doc.text.to_lowercase();
                let score = terms.iter().filter(|t| text.contains(t.as_str())).count();
                (score, doc)
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        scored
            .into_iter()
            .take(limit)
            .filter(|(score, _)| *score > 0)
            .map(|(_, doc)| EvidenceItem {
                doc_id: doc.doc_id.clone(),
                title: doc.title.clone(),
                excerpt: doc.text.chars().take(EXCERPT_CHARS).collect(),
            })
            .collect()
    }
}
