use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use agora_core::config::RunConfig;
use agora_core::traits::{ChatBackend, ChatCompletion, ChatRequest, MessageRole};
use agora_core::types::{AgentRole, AgentUnit, TraceDecision};

use agora_engine::collab::{InMemoryMemory, InMemoryRuns, StaticEvidence};
use agora_engine::{DebateOrchestrator, RunOptions};

/// Scripted backend: routes on markers in the system prompt, so each roster
/// role gets a deterministic reply.
struct ScriptedBackend {
    fail_agents: Vec<String>,
}

impl ScriptedBackend {
    fn new() -> Self {
        Self { fail_agents: vec![] }
    }

    fn failing(agent_marker: &str) -> Self {
        Self { fail_agents: vec![agent_marker.to_string()] }
    }
}

impl ChatBackend for ScriptedBackend {
    fn complete(&self, request: ChatRequest) -> BoxFuture<'_, ChatCompletion> {
        let system = request
            .messages
            .iter()
            .find(|m| m.role == MessageRole::System)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let user = request
            .messages
            .iter()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let fail = self.fail_agents.iter().any(|marker| system.contains(marker));

        Box::pin(async move {
            if fail {
                return ChatCompletion {
                    text: "Fallback response (agent call failed): connection refused"
                        .to_string(),
                    input_tokens: 0,
                    output_tokens: 0,
                    reasoning_tokens: 0,
                    fallback: true,
                    provider_error: Some("connection refused".to_string()),
                };
            }

            let text = if system.contains("meta-supervisor") {
                r#"{
                    "action": "stop",
                    "explanation": "one round is enough",
                    "iterationBudget": 1,
                    "plan": {
                        "runResponders": ["r1", "r2"],
                        "runCritics": ["c1"],
                        "runFactChecker": true,
                        "runScoring": true,
                        "runSelfVerifier": true
                    },
                    "stopCriteria": {"whyStopNow": "test"}
                }"#
                .to_string()
            } else if system.contains("ANALYST") {
                "Alpha   answer    one.".to_string()
            } else if system.contains("PRAGMATIST") {
                "Beta answer.".to_string()
            } else if system.contains("CRITIC") {
                if user.contains("from r1") {
                    "Solid reasoning throughout.\nseverity: 0".to_string()
                } else {
                    "Misses the core question entirely.\nseverity: 5".to_string()
                }
            } else if system.contains("SCORER") {
                r#"{"r1": 8, "r2": 6}"#.to_string()
            } else {
                "unscripted".to_string()
            };

            ChatCompletion {
                text,
                input_tokens: 10,
                output_tokens: 10,
                reasoning_tokens: 0,
                fallback: false,
                provider_error: None,
            }
        })
    }
}

fn agent(id: &str, role: AgentRole, marker: &str) -> AgentUnit {
    AgentUnit {
        id: id.to_string(),
        name: id.to_string(),
        role,
        enabled: true,
        system_prompt: format!("{marker} system prompt"),
        model: "test-model".to_string(),
        provider: "mock".to_string(),
        temperature: 0.7,
        max_tokens: 512,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
        tags: vec![],
    }
}

fn roster() -> Vec<AgentUnit> {
    vec![
        agent("r1", AgentRole::Responder, "ANALYST"),
        agent("r2", AgentRole::Responder, "PRAGMATIST"),
        agent("c1", AgentRole::Critic, "CRITIC"),
        agent("s1", AgentRole::ScoringAgent, "SCORER"),
    ]
}

fn orchestrator(backend: Arc<dyn ChatBackend>) -> DebateOrchestrator {
    DebateOrchestrator::new(
        backend,
        Arc::new(RunConfig::default()),
        Arc::new(InMemoryMemory::new()),
        Arc::new(InMemoryRuns::new()),
        Arc::new(StaticEvidence::new(vec![])),
    )
}

#[tokio::test]
async fn test_full_debate_round_picks_best_candidate() {
    let orchestrator = orchestrator(Arc::new(ScriptedBackend::new()));
    let outcome = orchestrator
        .run("What is the best approach?", roster(), RunOptions::default())
        .await
        .expect("run");

    // One iteration: the oracle said stop.
    assert_eq!(outcome.trace.len(), 1);
    let entry = &outcome.trace[0];
    assert_eq!(entry.responder_outputs.len(), 2);
    // One critique per (critic, candidate) pair.
    assert_eq!(entry.critic_outputs.len(), 2);
    assert_eq!(entry.fact_checks.len(), 2);
    assert_eq!(entry.scores.len(), 2);
    assert!(matches!(entry.decision, TraceDecision::Meta { .. }));

    // r1 wins: raw 8, severity 0 vs raw 6, severity 5. Self-verification
    // canonicalized the winner's whitespace.
    assert_eq!(outcome.answer, "Alpha answer one.");
    assert!(outcome.justification.contains("r1"));
    // 8 - 0 + 0.9*2 - 0 = 9.8 -> confidence 0.98
    assert!((outcome.confidence - 0.98).abs() < 1e-9);
    assert!(outcome.tokens.total_input_tokens > 0);
}

#[tokio::test]
async fn test_one_failing_responder_does_not_abort_the_round() {
    let orchestrator = orchestrator(Arc::new(ScriptedBackend::failing("PRAGMATIST")));
    let outcome = orchestrator
        .run("Question", roster(), RunOptions::default())
        .await
        .expect("run");

    let entry = &outcome.trace[0];
    assert_eq!(entry.responder_outputs.len(), 2);
    let degraded = entry
        .responder_outputs
        .iter()
        .find(|c| c.agent_id == "r2")
        .expect("degraded candidate present");
    assert!(degraded.content.starts_with("Fallback response"));

    // The healthy candidate still wins the round.
    assert_eq!(outcome.answer, "Alpha answer one.");
}

#[tokio::test]
async fn test_unparseable_oracle_recovers_and_terminates() {
    // Every agent returns unscripted prose, including the oracle, so each
    // round uses the fallback decision; the run must still terminate at the
    // iteration cap.
    let backend = Arc::new(ScriptedBackend::new());
    let orchestrator = DebateOrchestrator::new(
        backend,
        Arc::new(RunConfig::default()),
        Arc::new(InMemoryMemory::new()),
        Arc::new(InMemoryRuns::new()),
        Arc::new(StaticEvidence::new(vec![])),
    );
    let plain_roster = vec![
        agent("r1", AgentRole::Responder, "UNKNOWN-A"),
        agent("c1", AgentRole::Critic, "UNKNOWN-B"),
    ];

    let outcome = orchestrator
        .run("Question", plain_roster, RunOptions::default())
        .await
        .expect("run");

    let cap = RunConfig::default().max_iterations as usize;
    assert!(!outcome.trace.is_empty());
    assert!(outcome.trace.len() <= cap);
    assert!(!outcome.answer.is_empty());
}

#[tokio::test]
async fn test_cancelled_before_start_yields_empty_run() {
    let orchestrator = orchestrator(Arc::new(ScriptedBackend::new()));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = orchestrator
        .run(
            "Question",
            roster(),
            RunOptions { cancel, ..Default::default() },
        )
        .await
        .expect("run");

    assert!(outcome.trace.is_empty());
    assert_eq!(outcome.answer, "Unable to answer");
    assert_eq!(outcome.confidence, 0.0);
}

#[tokio::test]
async fn test_mid_round_cancellation_records_joined_work() {
    // Cancellation lands while the responder call is in flight: the critics
    // and scorer never run, but the joined candidate must appear in the
    // trace, not just in the final answer.
    struct CancelDuringResponder {
        cancel: CancellationToken,
    }

    impl ChatBackend for CancelDuringResponder {
        fn complete(&self, request: ChatRequest) -> BoxFuture<'_, ChatCompletion> {
            let system = request
                .messages
                .iter()
                .find(|m| m.role == MessageRole::System)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let cancel = self.cancel.clone();

            Box::pin(async move {
                let text = if system.contains("meta-supervisor") {
                    r#"{
                        "action": "continue",
                        "plan": {
                            "runResponders": ["r1"],
                            "runCritics": ["c1"],
                            "runScoring": true
                        }
                    }"#
                    .to_string()
                } else {
                    cancel.cancel();
                    "The full answer from r1.".to_string()
                };

                ChatCompletion {
                    text,
                    input_tokens: 5,
                    output_tokens: 5,
                    reasoning_tokens: 0,
                    fallback: false,
                    provider_error: None,
                }
            })
        }
    }

    let cancel = CancellationToken::new();
    let orchestrator =
        orchestrator(Arc::new(CancelDuringResponder { cancel: cancel.clone() }));
    let outcome = orchestrator
        .run(
            "Question",
            roster(),
            RunOptions { cancel, ..Default::default() },
        )
        .await
        .expect("run");

    assert_eq!(outcome.trace.len(), 1);
    let entry = &outcome.trace[0];
    assert_eq!(entry.responder_outputs.len(), 1);
    assert_eq!(entry.responder_outputs[0].content, "The full answer from r1.");
    assert!(entry.critic_outputs.is_empty());
    assert!(entry.scores.is_empty());

    // The answer is drawn only from work the trace records.
    assert_eq!(outcome.answer, "The full answer from r1.");
}

#[tokio::test]
async fn test_iteration_callback_fires_per_round() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let orchestrator = orchestrator(Arc::new(ScriptedBackend::new()));
    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();

    let outcome = orchestrator
        .run(
            "Question",
            roster(),
            RunOptions {
                on_iteration: Some(Box::new(move |_entry| {
                    seen.fetch_add(1, Ordering::SeqCst);
                })),
                ..Default::default()
            },
        )
        .await
        .expect("run");

    assert_eq!(count.load(Ordering::SeqCst), outcome.trace.len());
}
