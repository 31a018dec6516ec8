//! The oracle's per-iteration plan, plus the total normalizer that turns the
//! raw, untrusted model output into a bounded [`Decision`].
//!
//! The normalizer never fails and never leaves a field unset: every malformed
//! branch produces a safe default. Parse failures upstream of it are handled
//! by [`fallback_decision`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{
    default_agent_name, default_model, default_system_prompt, AgentRole, AgentUnit,
};

/// Severity at or above which an empty agent list in the plan is widened to
/// "all enabled agents of that category".
pub const ESCALATION_SEVERITY: f64 = 2.0;

/// Per-iteration cap on prompt-update directives.
pub const MAX_PROMPT_UPDATES: usize = 5;
/// Per-iteration cap on agent-creation directives.
pub const MAX_CREATE_AGENTS: usize = 2;
/// Per-iteration cap on agent-disable directives.
pub const MAX_DISABLE_AGENTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAction {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderObjective {
    MinCost,
    MaxAccuracy,
    Balanced,
}

/// Which agents run this iteration, and which pipeline stages are on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub run_responders: Vec<String>,
    pub run_critics: Vec<String>,
    pub run_fact_checker: bool,
    pub run_scoring: bool,
    pub run_self_verifier: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStrategy {
    pub objective: ProviderObjective,
    /// Provider override per agent id; the `default` key applies to all.
    pub provider_overrides: HashMap<String, String>,
    pub model_overrides: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptUpdate {
    pub agent_id: String,
    pub new_prompt: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopCriteria {
    pub why_stop_now: String,
    pub unresolved_critiques: f64,
    /// 0..=1, clamped.
    pub fact_confidence: f64,
}

/// One iteration's plan. Only constructible through [`normalize_decision`] or
/// [`fallback_decision`], so every instance is bounded and roster-consistent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: DecisionAction,
    pub explanation: String,
    /// 1..=configured cap.
    pub iteration_budget: u32,
    pub plan: ExecutionPlan,
    pub provider_strategy: ProviderStrategy,
    pub prompt_updates: Vec<PromptUpdate>,
    pub create_agents: Vec<AgentUnit>,
    pub disable_agents: Vec<String>,
    pub stop_criteria: StopCriteria,
}

/// Configured bounds the normalizer clamps against.
#[derive(Debug, Clone, Copy)]
pub struct DecisionLimits {
    pub max_iterations: u32,
    pub max_tokens: u32,
}

fn as_str(value: Option<&Value>, default: &str) -> String {
    value
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| default.to_string())
}

fn as_f64(value: Option<&Value>, default: f64) -> f64 {
    value.and_then(|v| v.as_f64()).filter(|n| n.is_finite()).unwrap_or(default)
}

fn string_array(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn string_map(value: Option<&Value>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if let Some(obj) = value.and_then(|v| v.as_object()) {
        for (k, v) in obj {
            if let Some(s) = v.as_str() {
                out.insert(k.clone(), s.to_string());
            }
        }
    }
    out
}

fn in_roster(roster: &[AgentUnit], id: &str) -> bool {
    roster.iter().any(|a| a.id == id)
}

fn enabled_ids(roster: &[AgentUnit], filter: impl Fn(&AgentUnit) -> bool) -> Vec<String> {
    roster
        .iter()
        .filter(|a| a.enabled && filter(a))
        .map(|a| a.id.clone())
        .collect()
}

/// Normalize one raw `createAgents` entry into a full unit. Ids already in
/// the roster (or among earlier creations this round) are replaced.
fn normalize_agent_unit(
    raw: &Value,
    limits: &DecisionLimits,
    taken_ids: &mut Vec<String>,
    now: DateTime<Utc>,
) -> Option<AgentUnit> {
    let obj = raw.as_object()?;

    let role = obj
        .get("role")
        .and_then(|v| serde_json::from_value::<AgentRole>(v.clone()).ok())
        .unwrap_or(AgentRole::Responder);

    let mut id = as_str(obj.get("id"), "").trim().to_string();
    if id.is_empty() || taken_ids.iter().any(|t| *t == id) {
        id = format!("agent-{}", Uuid::new_v4());
    }
    taken_ids.push(id.clone());

    let temperature = as_f64(obj.get("temperature"), 0.7).clamp(0.0, 2.0) as f32;
    let max_tokens = (as_f64(obj.get("max_tokens"), 1024.0).max(1.0) as u32).min(limits.max_tokens.max(1));

    Some(AgentUnit {
        id,
        name: as_str(obj.get("name"), &default_agent_name()),
        role,
        enabled: obj.get("enabled").and_then(|v| v.as_bool()).unwrap_or(true),
        system_prompt: as_str(obj.get("system_prompt"), &default_system_prompt()),
        model: as_str(obj.get("model"), &default_model()),
        provider: as_str(obj.get("provider"), ""),
        temperature,
        max_tokens,
        created_at: now,
        updated_at: now,
        tags: string_array(obj.get("tags")),
    })
}

/// Total normalization of untrusted oracle output into a [`Decision`].
pub fn normalize_decision(
    raw: &Value,
    fallback_provider: &str,
    roster: &[AgentUnit],
    limits: &DecisionLimits,
    last_severity: f64,
    now: DateTime<Utc>,
) -> Decision {
    let plan = raw.get("plan").cloned().unwrap_or(Value::Null);

    let mut run_responders: Vec<String> = string_array(plan.get("runResponders"))
        .into_iter()
        .filter(|id| in_roster(roster, id))
        .collect();
    let mut run_critics: Vec<String> = string_array(plan.get("runCritics"))
        .into_iter()
        .filter(|id| in_roster(roster, id))
        .collect();

    // High recent severity widens an empty plan to every enabled agent of
    // that category rather than letting the round go idle.
    if run_responders.is_empty() && last_severity >= ESCALATION_SEVERITY {
        run_responders = enabled_ids(roster, |a| a.role == AgentRole::Responder);
    }
    if run_critics.is_empty() && last_severity >= ESCALATION_SEVERITY {
        run_critics = enabled_ids(roster, |a| a.role.is_critic());
    }

    let strategy = raw.get("providerStrategy").cloned().unwrap_or(Value::Null);
    let objective = match strategy.get("objective").and_then(|v| v.as_str()) {
        Some("min_cost") => ProviderObjective::MinCost,
        Some("max_accuracy") => ProviderObjective::MaxAccuracy,
        _ => ProviderObjective::Balanced,
    };
    let mut provider_overrides = string_map(strategy.get("providerOverrides"));
    if provider_overrides.is_empty() {
        provider_overrides.insert("default".to_string(), fallback_provider.to_string());
    }
    let model_overrides = string_map(strategy.get("modelOverrides"));

    let prompt_updates: Vec<PromptUpdate> = raw
        .get("promptUpdates")
        .and_then(|v| v.as_array())
        .map(|items| items.iter().take(MAX_PROMPT_UPDATES).collect::<Vec<_>>())
        .unwrap_or_default()
        .into_iter()
        .map(|p| PromptUpdate {
            agent_id: as_str(p.get("agentId"), ""),
            new_prompt: as_str(p.get("newPrompt"), ""),
            reason: as_str(p.get("reason"), ""),
        })
        .filter(|p| !p.agent_id.is_empty() && !p.new_prompt.is_empty() && in_roster(roster, &p.agent_id))
        .collect();

    let mut taken_ids: Vec<String> = roster.iter().map(|a| a.id.clone()).collect();
    let create_agents: Vec<AgentUnit> = raw
        .get("createAgents")
        .and_then(|v| v.as_array())
        .map(|items| items.iter().take(MAX_CREATE_AGENTS).collect::<Vec<_>>())
        .unwrap_or_default()
        .into_iter()
        .filter_map(|a| normalize_agent_unit(a, limits, &mut taken_ids, now))
        .collect();

    let disable_agents: Vec<String> = raw
        .get("disableAgents")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .take(MAX_DISABLE_AGENTS)
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .filter(|id| in_roster(roster, id))
                .collect()
        })
        .unwrap_or_default();

    let stop = raw.get("stopCriteria").cloned().unwrap_or(Value::Null);

    let cap = limits.max_iterations.max(1);
    let iteration_budget = (as_f64(raw.get("iterationBudget"), cap as f64) as i64).clamp(1, cap as i64) as u32;

    Decision {
        action: if raw.get("action").and_then(|v| v.as_str()) == Some("stop") {
            DecisionAction::Stop
        } else {
            DecisionAction::Continue
        },
        explanation: as_str(raw.get("explanation"), ""),
        iteration_budget,
        plan: ExecutionPlan {
            run_responders,
            run_critics,
            run_fact_checker: plan.get("runFactChecker").and_then(|v| v.as_bool()).unwrap_or(false),
            run_scoring: plan.get("runScoring").and_then(|v| v.as_bool()).unwrap_or(true),
            run_self_verifier: plan.get("runSelfVerifier").and_then(|v| v.as_bool()).unwrap_or(true),
        },
        provider_strategy: ProviderStrategy {
            objective,
            provider_overrides,
            model_overrides,
        },
        prompt_updates,
        create_agents,
        disable_agents,
        stop_criteria: StopCriteria {
            why_stop_now: as_str(stop.get("whyStopNow"), ""),
            unresolved_critiques: as_f64(stop.get("unresolvedCritiques"), 0.0),
            fact_confidence: as_f64(stop.get("factConfidence"), 1.0).clamp(0.0, 1.0),
        },
    }
}

/// Deterministic plan used when the oracle's output cannot be parsed at all:
/// run everything that is enabled, and stop only at the last allowed round.
pub fn fallback_decision(
    iteration: u32,
    limits: &DecisionLimits,
    roster: &[AgentUnit],
    last_severity: f64,
) -> Decision {
    let cap = limits.max_iterations.max(1);
    Decision {
        action: if iteration + 1 >= cap {
            DecisionAction::Stop
        } else {
            DecisionAction::Continue
        },
        explanation: "fallback decision due to parse error".to_string(),
        iteration_budget: cap,
        plan: ExecutionPlan {
            run_responders: enabled_ids(roster, |a| a.role == AgentRole::Responder),
            run_critics: enabled_ids(roster, |a| a.role.is_critic()),
            run_fact_checker: true,
            run_scoring: true,
            run_self_verifier: true,
        },
        provider_strategy: ProviderStrategy {
            objective: ProviderObjective::Balanced,
            provider_overrides: HashMap::new(),
            model_overrides: HashMap::new(),
        },
        prompt_updates: Vec::new(),
        create_agents: Vec::new(),
        disable_agents: Vec::new(),
        stop_criteria: StopCriteria {
            why_stop_now: "max iterations".to_string(),
            unresolved_critiques: last_severity,
            fact_confidence: 1.0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unit(id: &str, role: AgentRole, enabled: bool) -> AgentUnit {
        AgentUnit {
            id: id.to_string(),
            name: id.to_string(),
            role,
            enabled,
            system_prompt: "p".to_string(),
            model: "m".to_string(),
            provider: "mock".to_string(),
            temperature: 0.7,
            max_tokens: 256,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            tags: vec![],
        }
    }

    fn roster() -> Vec<AgentUnit> {
        vec![
            unit("r1", AgentRole::Responder, true),
            unit("r2", AgentRole::Responder, false),
            unit("c1", AgentRole::Critic, true),
            unit("o1", AgentRole::Opponent, true),
            unit("s1", AgentRole::ScoringAgent, true),
        ]
    }

    fn limits() -> DecisionLimits {
        DecisionLimits { max_iterations: 5, max_tokens: 2048 }
    }

    #[test]
    fn test_totality_on_garbage_shapes() {
        let shapes = vec![
            json!(null),
            json!(42),
            json!("nonsense"),
            json!([1, 2, 3]),
            json!({"plan": "not an object", "promptUpdates": 7, "createAgents": {"a": 1}}),
        ];
        for raw in shapes {
            let d = normalize_decision(&raw, "mock", &roster(), &limits(), 0.0, Utc::now());
            assert_eq!(d.action, DecisionAction::Continue);
            assert!(d.iteration_budget >= 1 && d.iteration_budget <= 5);
            assert!(d.prompt_updates.is_empty());
            assert!(d.create_agents.is_empty());
            assert!(d.disable_agents.is_empty());
            assert_eq!(d.provider_strategy.provider_overrides["default"], "mock");
        }
    }

    #[test]
    fn test_action_stop_only_for_exact_string() {
        let stop = normalize_decision(&json!({"action": "stop"}), "p", &roster(), &limits(), 0.0, Utc::now());
        assert_eq!(stop.action, DecisionAction::Stop);
        for other in ["STOP", "halt", "stop now", ""] {
            let d = normalize_decision(&json!({ "action": other }), "p", &roster(), &limits(), 0.0, Utc::now());
            assert_eq!(d.action, DecisionAction::Continue);
        }
    }

    #[test]
    fn test_budget_clamped_and_defaulted() {
        let d = normalize_decision(&json!({"iterationBudget": 999}), "p", &roster(), &limits(), 0.0, Utc::now());
        assert_eq!(d.iteration_budget, 5);
        let d = normalize_decision(&json!({"iterationBudget": -3}), "p", &roster(), &limits(), 0.0, Utc::now());
        assert_eq!(d.iteration_budget, 1);
        let d = normalize_decision(&json!({}), "p", &roster(), &limits(), 0.0, Utc::now());
        assert_eq!(d.iteration_budget, 5);
    }

    #[test]
    fn test_plan_filtered_to_roster_ids() {
        let raw = json!({"plan": {"runResponders": ["r1", "ghost"], "runCritics": ["c1", "nope"]}});
        let d = normalize_decision(&raw, "p", &roster(), &limits(), 0.0, Utc::now());
        assert_eq!(d.plan.run_responders, vec!["r1"]);
        assert_eq!(d.plan.run_critics, vec!["c1"]);
    }

    #[test]
    fn test_escalation_fills_empty_lists() {
        let raw = json!({"plan": {"runResponders": [], "runCritics": []}});

        // Below the threshold the lists stay empty.
        let calm = normalize_decision(&raw, "p", &roster(), &limits(), 1.9, Utc::now());
        assert!(calm.plan.run_responders.is_empty());
        assert!(calm.plan.run_critics.is_empty());

        // At the threshold every enabled agent of the category is drafted.
        let hot = normalize_decision(&raw, "p", &roster(), &limits(), 2.0, Utc::now());
        assert_eq!(hot.plan.run_responders, vec!["r1"]); // r2 is disabled
        assert_eq!(hot.plan.run_critics, vec!["c1", "o1"]); // opponent counts as critic
    }

    #[test]
    fn test_directive_caps() {
        let updates: Vec<_> = (0..9)
            .map(|i| json!({"agentId": "r1", "newPrompt": format!("p{i}")}))
            .collect();
        let creates: Vec<_> = (0..4).map(|i| json!({"name": format!("n{i}")})).collect();
        let disables: Vec<_> = (0..9).map(|_| json!("c1")).collect();
        let raw = json!({"promptUpdates": updates, "createAgents": creates, "disableAgents": disables});

        let d = normalize_decision(&raw, "p", &roster(), &limits(), 0.0, Utc::now());
        assert_eq!(d.prompt_updates.len(), MAX_PROMPT_UPDATES);
        assert_eq!(d.create_agents.len(), MAX_CREATE_AGENTS);
        assert_eq!(d.disable_agents.len(), MAX_DISABLE_AGENTS);
    }

    #[test]
    fn test_prompt_updates_require_existing_agent() {
        let raw = json!({"promptUpdates": [
            {"agentId": "ghost", "newPrompt": "x"},
            {"agentId": "r1", "newPrompt": ""},
            {"agentId": "r1", "newPrompt": "better"},
        ]});
        let d = normalize_decision(&raw, "p", &roster(), &limits(), 0.0, Utc::now());
        assert_eq!(d.prompt_updates.len(), 1);
        assert_eq!(d.prompt_updates[0].agent_id, "r1");
        assert_eq!(d.prompt_updates[0].new_prompt, "better");
    }

    #[test]
    fn test_created_agents_fully_defaulted_and_deduped() {
        let raw = json!({"createAgents": [
            {"id": "r1", "temperature": 9.0, "max_tokens": 999999},
            {"role": "domain_expert"},
        ]});
        let d = normalize_decision(&raw, "p", &roster(), &limits(), 0.0, Utc::now());
        assert_eq!(d.create_agents.len(), 2);

        // Colliding id replaced with a generated one.
        assert_ne!(d.create_agents[0].id, "r1");
        assert!(d.create_agents[0].id.starts_with("agent-"));
        assert!((d.create_agents[0].temperature - 2.0).abs() < f32::EPSILON);
        assert_eq!(d.create_agents[0].max_tokens, 2048);
        assert_eq!(d.create_agents[0].role, AgentRole::Responder);

        assert_eq!(d.create_agents[1].role, AgentRole::DomainExpert);
        assert_eq!(d.create_agents[1].name, "New Agent");
        assert!(d.create_agents[1].enabled);
    }

    #[test]
    fn test_objective_restricted() {
        for (raw, expected) in [
            (json!({"providerStrategy": {"objective": "min_cost"}}), ProviderObjective::MinCost),
            (json!({"providerStrategy": {"objective": "max_accuracy"}}), ProviderObjective::MaxAccuracy),
            (json!({"providerStrategy": {"objective": "cheapest!!"}}), ProviderObjective::Balanced),
            (json!({}), ProviderObjective::Balanced),
        ] {
            let d = normalize_decision(&raw, "p", &roster(), &limits(), 0.0, Utc::now());
            assert_eq!(d.provider_strategy.objective, expected);
        }
    }

    #[test]
    fn test_stop_criteria_clamped() {
        let raw = json!({"stopCriteria": {"factConfidence": 3.5, "unresolvedCritiques": 2}});
        let d = normalize_decision(&raw, "p", &roster(), &limits(), 0.0, Utc::now());
        assert!((d.stop_criteria.fact_confidence - 1.0).abs() < 1e-9);
        assert!((d.stop_criteria.unresolved_critiques - 2.0).abs() < 1e-9);

        let d = normalize_decision(&json!({}), "p", &roster(), &limits(), 0.0, Utc::now());
        assert!((d.stop_criteria.fact_confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_fallback_decision_shape() {
        let d = fallback_decision(0, &limits(), &roster(), 1.5);
        assert_eq!(d.action, DecisionAction::Continue);
        assert_eq!(d.explanation, "fallback decision due to parse error");
        assert_eq!(d.plan.run_responders, vec!["r1"]);
        assert_eq!(d.plan.run_critics, vec!["c1", "o1"]);
        assert!(d.plan.run_fact_checker && d.plan.run_scoring && d.plan.run_self_verifier);
        assert!((d.stop_criteria.unresolved_critiques - 1.5).abs() < 1e-9);

        // Last allowed round: stop instead of continuing.
        let d = fallback_decision(4, &limits(), &roster(), 0.0);
        assert_eq!(d.action, DecisionAction::Stop);
    }
}
