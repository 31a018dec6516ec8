//! Designer-model workflow suggestion with a deterministic fallback chain.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use agora_core::config::RunConfig;
use agora_core::graph::{WorkflowEdge, WorkflowGraph, WorkflowNode};
use agora_core::traits::{BackendMessage, CallOptions, ChatBackend, ChatRequest};
use agora_core::types::{AgentRole, AgentUnit};
use agora_llm::select_provider;

use crate::graph::schedule::compute_topological_order;
use crate::parse::try_parse_value;

const DESIGNER_SYSTEM_PROMPT: &str = "You are an expert workflow designer for a multi-agent \
LLM system. Design minimal, practical DAG workflows. Output strictly valid JSON only, \
matching the requested schema.";

const DESIGNER_TEMPERATURE: f32 = 0.2;
const DESIGNER_MAX_TOKENS: u32 = 800;
const MAX_CREATED_AGENTS: usize = 3;

/// A suggested workflow plus any agents it needs created.
#[derive(Debug, Clone)]
pub struct Suggestion {
    pub workflow: WorkflowGraph,
    pub create_agents: Vec<AgentUnit>,
}

/// Ask the designer model to draft a DAG for the question. The response is
/// sanitized and DAG-validated; anything unusable falls back to a
/// deterministic draft-critique-final chain built from the enabled roster.
/// Never errors.
pub async fn suggest_workflow(
    question: &str,
    roster: &[AgentUnit],
    config: &RunConfig,
    backend: &Arc<dyn ChatBackend>,
    allow_create: bool,
    cancel: CancellationToken,
) -> Suggestion {
    let enabled: Vec<&AgentUnit> = roster.iter().filter(|a| a.enabled).collect();
    let allowed_ids: HashSet<String> = enabled.iter().map(|a| a.id.clone()).collect();

    let provider = config
        .designer
        .provider
        .clone()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| select_provider(config));
    let model = config
        .designer
        .model
        .clone()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| first_model(config, &provider));
    let system_prompt = config
        .designer
        .system_prompt
        .clone()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| DESIGNER_SYSTEM_PROMPT.to_string());

    let completion = backend
        .complete(ChatRequest {
            messages: vec![
                BackendMessage::system(system_prompt),
                BackendMessage::user(design_prompt(question, &enabled, allow_create)),
            ],
            model,
            temperature: DESIGNER_TEMPERATURE,
            options: CallOptions {
                provider: provider.clone(),
                provider_config: config.providers.get(&provider).cloned(),
                max_tokens: DESIGNER_MAX_TOKENS,
                cancel,
            },
        })
        .await;

    if let Some(parsed) = try_parse_value(&completion.text) {
        let raw_workflow = parsed.get("workflow").unwrap_or(&parsed).clone();

        let mut existing_ids: HashSet<String> = roster.iter().map(|a| a.id.clone()).collect();
        let mut id_map: HashMap<String, String> = HashMap::new();
        let created: Vec<AgentUnit> = if allow_create {
            parsed
                .get("createAgents")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .take(MAX_CREATED_AGENTS)
                        .filter_map(|raw| {
                            normalize_suggested_agent(raw, config, &mut existing_ids, &mut id_map)
                        })
                        .collect()
                })
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        let mut allowed_with_creates = allowed_ids.clone();
        allowed_with_creates.extend(created.iter().map(|a| a.id.clone()));

        if let Some(workflow) =
            sanitize_workflow(&raw_workflow, &allowed_with_creates, &id_map)
        {
            debug!(workflow = %workflow.name, nodes = workflow.nodes.len(), "designer workflow accepted");
            let used: HashSet<&str> = workflow.nodes.iter().map(|n| n.agent_id.as_str()).collect();
            let create_agents =
                created.into_iter().filter(|a| used.contains(a.id.as_str())).collect();
            return Suggestion { workflow, create_agents };
        }
    }

    warn!("designer output unusable, falling back to deterministic workflow");
    deterministic_fallback(&enabled, config, allow_create)
}

fn first_model(config: &RunConfig, provider: &str) -> String {
    config
        .providers
        .get(provider)
        .and_then(|p| p.models.first().cloned())
        .unwrap_or_else(|| "gpt-4o-mini".to_string())
}

fn design_prompt(question: &str, enabled: &[&AgentUnit], allow_create: bool) -> String {
    let agents = serde_json::to_string_pretty(
        &enabled
            .iter()
            .map(|a| {
                json!({
                    "id": a.id,
                    "name": a.name,
                    "role": a.role,
                    "provider": a.provider,
                    "model": a.model,
                    "temperature": a.temperature,
                    "max_tokens": a.max_tokens,
                    "tags": a.tags,
                    "system_prompt": a.system_prompt,
                })
            })
            .collect::<Vec<_>>(),
    )
    .unwrap_or_else(|_| "[]".to_string());

    let create_rule = if allow_create {
        "  - Prefer existing agents; create up to 3 new agents in createAgents only when none \
         fit, and reference them by id\n"
    } else {
        "  - Do NOT create new agents; set createAgents to []\n"
    };

    format!(
        "Design a DAG workflow for a multi-agent system to answer the user question.\n\
         Return ONLY valid JSON.\n\n\
         Schema:\n\
         {{\n\
         \x20 \"workflow\": {{\n\
         \x20   \"name\": string,\n\
         \x20   \"description\": string,\n\
         \x20   \"nodes\": [{{ \"id\": \"n1\", \"agentId\": \"agent-id\", \"label\": \"optional\", \"x\": number, \"y\": number }}],\n\
         \x20   \"edges\": [{{ \"id\": \"e1\", \"from\": \"n1\", \"to\": \"n2\" }}]\n\
         \x20 }},\n\
         \x20 \"createAgents\": [{{ \"id\": string, \"name\": string, \"role\": string, \
         \"system_prompt\": string, \"provider\": string, \"model\": string, \
         \"temperature\": number, \"max_tokens\": number, \"tags\": [string] }}]\n\
         }}\n\n\
         Rules:\n\
         - Workflow must be a DAG (no cycles).\n\
         - 1 to 6 nodes.\n\
         - Prefer left-to-right layout by increasing x.\n\
         - For workflow.nodes[].agentId use an existing enabled agent id EXACTLY as listed; \
         do NOT use role names as agentId.\n\
         {create_rule}\n\
         Available enabled agents:\n{agents}\n\n\
         User question:\n{question}"
    )
}

fn trimmed_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn normalize_suggested_agent(
    raw: &Value,
    config: &RunConfig,
    existing_ids: &mut HashSet<String>,
    id_map: &mut HashMap<String, String>,
) -> Option<AgentUnit> {
    let obj = raw.as_object()?;

    let role = obj
        .get("role")
        .and_then(|v| serde_json::from_value::<AgentRole>(v.clone()).ok())
        .unwrap_or(AgentRole::DomainExpert);
    let role_name = serde_json::to_value(role)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();

    let provider = trimmed_str(obj.get("provider")).unwrap_or_else(|| {
        config
            .default_provider
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| select_provider(config))
    });
    let model = trimmed_str(obj.get("model")).unwrap_or_else(|| first_model(config, &provider));

    let temperature =
        obj.get("temperature").and_then(Value::as_f64).unwrap_or(0.6).clamp(0.0, 2.0) as f32;
    let cap = config.max_tokens.max(1);
    let max_tokens = obj
        .get("max_tokens")
        .and_then(Value::as_u64)
        .map(|n| n as u32)
        .unwrap_or_else(|| 1024.min(cap))
        .clamp(1, cap);

    let mut tags: Vec<String> = obj
        .get("tags")
        .and_then(Value::as_array)
        .map(|items| {
            items.iter().filter_map(|t| t.as_str().map(str::to_string)).take(10).collect()
        })
        .unwrap_or_default();
    for required in ["generated", "workflow"] {
        if !tags.iter().any(|t| t == required) {
            tags.push(required.to_string());
        }
    }

    let original_id = trimmed_str(obj.get("id"));
    let mut id = original_id.clone().unwrap_or_default();
    if id.is_empty() || existing_ids.contains(&id) {
        id = format!("wf-{}", Uuid::new_v4());
    }
    existing_ids.insert(id.clone());
    if let Some(original) = original_id {
        if original != id {
            id_map.insert(original, id.clone());
        }
    }

    let now = Utc::now();
    Some(AgentUnit {
        id,
        name: trimmed_str(obj.get("name")).unwrap_or_else(|| format!("Generated {role_name}")),
        role,
        enabled: true,
        system_prompt: trimmed_str(obj.get("system_prompt")).unwrap_or_else(|| {
            format!(
                "You are a helpful {role_name}. Provide accurate, concise outputs and ask \
                 clarifying questions when needed."
            )
        }),
        model,
        provider,
        temperature,
        max_tokens,
        created_at: now,
        updated_at: now,
        tags,
    })
}

fn sanitize_workflow(
    raw: &Value,
    allowed_agent_ids: &HashSet<String>,
    id_map: &HashMap<String, String>,
) -> Option<WorkflowGraph> {
    let name = trimmed_str(raw.get("name"))?;

    let mut node_ids = HashSet::new();
    let nodes: Vec<WorkflowNode> = raw
        .get("nodes")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(|n| {
            let id = trimmed_str(n.get("id"))?;
            let raw_agent = trimmed_str(n.get("agentId"))?;
            let agent_id = id_map.get(&raw_agent).cloned().unwrap_or(raw_agent);
            if !allowed_agent_ids.contains(&agent_id) || !node_ids.insert(id.clone()) {
                return None;
            }
            Some(WorkflowNode {
                id,
                agent_id,
                label: trimmed_str(n.get("label")),
                x: n.get("x").and_then(Value::as_f64).filter(|v| v.is_finite()).unwrap_or(0.0),
                y: n.get("y").and_then(Value::as_f64).filter(|v| v.is_finite()).unwrap_or(0.0),
            })
        })
        .collect();
    if nodes.is_empty() {
        return None;
    }

    let edges: Vec<WorkflowEdge> = raw
        .get("edges")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|e| {
                    let from = trimmed_str(e.get("from"))?;
                    let to = trimmed_str(e.get("to"))?;
                    if from == to || !node_ids.contains(&from) || !node_ids.contains(&to) {
                        return None;
                    }
                    Some(WorkflowEdge {
                        id: trimmed_str(e.get("id"))
                            .unwrap_or_else(|| Uuid::new_v4().to_string()),
                        from,
                        to,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let workflow = WorkflowGraph {
        id: Uuid::new_v4().to_string(),
        name,
        description: trimmed_str(raw.get("description")),
        nodes,
        edges,
        tags: vec!["ai".to_string()],
    };

    compute_topological_order(&workflow).ok()?;
    Some(workflow)
}

fn chain_node(id: &str, agent_id: &str, label: &str, x: f64) -> WorkflowNode {
    WorkflowNode {
        id: id.to_string(),
        agent_id: agent_id.to_string(),
        label: Some(label.to_string()),
        x,
        y: 80.0,
    }
}

fn deterministic_fallback(
    enabled: &[&AgentUnit],
    config: &RunConfig,
    allow_create: bool,
) -> Suggestion {
    let responder = enabled
        .iter()
        .find(|a| a.role == AgentRole::Responder)
        .or_else(|| enabled.first())
        .copied();
    let Some(responder) = responder else {
        if allow_create {
            let provider = config
                .default_provider
                .clone()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| select_provider(config));
            let now = Utc::now();
            let agent = AgentUnit {
                id: format!("wf-{}", Uuid::new_v4()),
                name: "Generated Responder".to_string(),
                role: AgentRole::Responder,
                enabled: true,
                system_prompt: "You are a helpful responder producing concise answers."
                    .to_string(),
                model: first_model(config, &provider),
                provider,
                temperature: 0.6,
                max_tokens: 1024.min(config.max_tokens.max(1)),
                created_at: now,
                updated_at: now,
                tags: vec!["generated".to_string(), "workflow".to_string()],
            };
            let workflow = WorkflowGraph {
                id: Uuid::new_v4().to_string(),
                name: "Single-agent workflow".to_string(),
                description: Some("Generated an agent for this workflow".to_string()),
                nodes: vec![chain_node("n1", &agent.id, "Answer", 80.0)],
                edges: vec![],
                tags: vec!["ai".to_string()],
            };
            return Suggestion { workflow, create_agents: vec![agent] };
        }
        return Suggestion {
            workflow: WorkflowGraph {
                id: Uuid::new_v4().to_string(),
                name: "Empty workflow".to_string(),
                description: Some("No enabled agents available".to_string()),
                nodes: vec![],
                edges: vec![],
                tags: vec!["ai".to_string()],
            },
            create_agents: vec![],
        };
    };

    let critic = enabled
        .iter()
        .find(|a| a.role.is_critic())
        .or_else(|| enabled.iter().find(|a| a.id != responder.id))
        .copied();

    let n1 = chain_node("n1", &responder.id, "Draft", 80.0);
    let Some(critic) = critic else {
        return Suggestion {
            workflow: WorkflowGraph {
                id: Uuid::new_v4().to_string(),
                name: "Single-agent workflow".to_string(),
                description: Some("Single step answer".to_string()),
                nodes: vec![n1],
                edges: vec![],
                tags: vec!["ai".to_string()],
            },
            create_agents: vec![],
        };
    };

    Suggestion {
        workflow: WorkflowGraph {
            id: Uuid::new_v4().to_string(),
            name: "Draft, critique, final".to_string(),
            description: Some(
                "Create a draft, critique it, then produce a final answer.".to_string(),
            ),
            nodes: vec![
                n1,
                chain_node("n2", &critic.id, "Critique", 360.0),
                chain_node("n3", &responder.id, "Final answer", 640.0),
            ],
            edges: vec![
                WorkflowEdge { id: "e1".to_string(), from: "n1".to_string(), to: "n2".to_string() },
                WorkflowEdge { id: "e2".to_string(), from: "n2".to_string(), to: "n3".to_string() },
            ],
            tags: vec!["ai".to_string()],
        },
        create_agents: vec![],
    }
}
