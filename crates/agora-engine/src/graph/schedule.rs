//! Topological scheduling of workflow graphs.

use std::collections::{HashMap, HashSet, VecDeque};

use agora_core::error::{AgoraError, Result};
use agora_core::graph::WorkflowGraph;

/// A validated execution plan: node ids in dependency order plus adjacency
/// maps for assembling upstream context and finding sinks.
#[derive(Debug, Clone)]
pub struct TopoSchedule {
    pub order: Vec<String>,
    /// node id -> predecessor node ids, in edge-declaration order.
    pub incoming: HashMap<String, Vec<String>>,
    /// node id -> successor node ids, in edge-declaration order.
    pub outgoing: HashMap<String, Vec<String>>,
}

/// Kahn's algorithm over the graph, FIFO queue seeded in node-declaration
/// order so runs are deterministic. Duplicate node ids, self-loops, edges
/// referencing unknown nodes, and cycles are all validation errors.
pub fn compute_topological_order(graph: &WorkflowGraph) -> Result<TopoSchedule> {
    let mut node_ids = HashSet::new();
    for node in &graph.nodes {
        if !node_ids.insert(node.id.as_str()) {
            return Err(AgoraError::GraphValidation(format!(
                "duplicate node id: {}",
                node.id
            )));
        }
    }

    let mut incoming: HashMap<String, Vec<String>> =
        graph.nodes.iter().map(|n| (n.id.clone(), Vec::new())).collect();
    let mut outgoing: HashMap<String, Vec<String>> =
        graph.nodes.iter().map(|n| (n.id.clone(), Vec::new())).collect();

    for edge in &graph.edges {
        if edge.from == edge.to {
            return Err(AgoraError::GraphValidation(format!(
                "self-loop on node: {}",
                edge.from
            )));
        }
        if !node_ids.contains(edge.from.as_str()) || !node_ids.contains(edge.to.as_str()) {
            return Err(AgoraError::GraphValidation(format!(
                "edge {} references unknown node: {} -> {}",
                edge.id, edge.from, edge.to
            )));
        }
        if let Some(predecessors) = incoming.get_mut(&edge.to) {
            predecessors.push(edge.from.clone());
        }
        if let Some(successors) = outgoing.get_mut(&edge.from) {
            successors.push(edge.to.clone());
        }
    }

    let mut in_degree: HashMap<&str, usize> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), incoming[&n.id].len()))
        .collect();

    let mut queue: VecDeque<&str> = graph
        .nodes
        .iter()
        .filter(|n| in_degree[n.id.as_str()] == 0)
        .map(|n| n.id.as_str())
        .collect();

    let mut order = Vec::with_capacity(graph.nodes.len());
    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());
        for next in &outgoing[id] {
            let degree = in_degree
                .get_mut(next.as_str())
                .ok_or_else(|| AgoraError::GraphValidation(format!("unknown node: {next}")))?;
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() < graph.nodes.len() {
        return Err(AgoraError::GraphValidation("workflow contains a cycle".to_string()));
    }

    Ok(TopoSchedule { order, incoming, outgoing })
}
