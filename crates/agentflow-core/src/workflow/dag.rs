//! Graph compiler.
//!
//! Turns a `WorkflowDefinition` into a `CompiledWorkflow`: typed node
//! handlers plus ordered outgoing routes, a single entry node and the set of
//! terminal nodes. Cycles are allowed only through a conditional node, which
//! is the one node type that can route out of a loop.

use std::collections::HashMap;

use agentflow_types::execution::ExecutionState;
use agentflow_types::workflow::{
    HumanNodeConfig, NodeType, RetryPolicy, WorkflowConfig, WorkflowDefinition,
};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use uuid::Uuid;

use crate::error::{ValidationError, Violation};
use crate::schema::SchemaValidator;

use super::context;
use super::definition::structural_violations;
use super::handler::NodeHandler;

/// An outgoing edge as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub target: String,
    pub guard: Option<String>,
}

/// A node ready to execute.
#[derive(Debug, Clone)]
pub struct CompiledNode {
    pub id: String,
    pub node_type: NodeType,
    pub handler: NodeHandler,
    pub retry: Option<RetryPolicy>,
    pub timeout_secs: Option<u64>,
    /// Outgoing edges in declaration order.
    pub routes: Vec<Route>,
}

impl CompiledNode {
    pub fn is_terminal(&self) -> bool {
        self.routes.is_empty()
    }
}

/// An executable workflow graph.
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    pub workflow_id: Uuid,
    pub version: u32,
    pub name: String,
    pub config: WorkflowConfig,
    variables: serde_json::Map<String, serde_json::Value>,
    nodes: HashMap<String, CompiledNode>,
    entry: String,
    terminals: Vec<String>,
}

impl CompiledWorkflow {
    pub fn node(&self, id: &str) -> Option<&CompiledNode> {
        self.nodes.get(id)
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn terminals(&self) -> &[String] {
        &self.terminals
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Stored agents named by agent nodes, as `(node_id, agent_id)`.
    pub fn agent_references(&self) -> Vec<(&str, Uuid)> {
        let mut refs: Vec<(&str, Uuid)> = self
            .nodes
            .values()
            .filter_map(|n| n.handler.agent_id().map(|id| (n.id.as_str(), id)))
            .collect();
        refs.sort();
        refs
    }

    /// Workflow variables overlaid with `input`.
    pub fn initial_state(&self, input: &ExecutionState) -> ExecutionState {
        context::initial_state(&self.variables, input)
    }
}

/// Compile a definition, collecting every violation.
pub fn compile(def: &WorkflowDefinition) -> Result<CompiledWorkflow, ValidationError> {
    let mut violations = structural_violations(def);

    // Typed handler config. Nodes missing a required key were already reported.
    let mut handlers = HashMap::new();
    for node in &def.nodes {
        let has_required = node
            .node_type
            .required_config()
            .iter()
            .all(|key| node.config.contains_key(*key));
        if !has_required {
            continue;
        }
        match NodeHandler::from_node(node) {
            Ok(handler) => {
                if let NodeHandler::Human(HumanNodeConfig {
                    input_schema: Some(schema),
                    ..
                }) = &handler
                {
                    if let Err(e) = SchemaValidator::compile(schema) {
                        violations.push(Violation::new(
                            format!("nodes.{}.config.input_schema", node.id),
                            format!("not a valid JSON Schema: {e}"),
                        ));
                    }
                }
                handlers.insert(node.id.as_str(), handler);
            }
            Err(message) => violations.push(Violation::new(
                format!("nodes.{}.config", node.id),
                message,
            )),
        }
    }

    violations.extend(graph_violations(def));
    ValidationError::from_violations(violations)?;

    let mut nodes = HashMap::new();
    let mut entry = String::new();
    let mut terminals = Vec::new();
    for node in &def.nodes {
        let Some(handler) = handlers.remove(node.id.as_str()) else {
            continue;
        };
        let routes: Vec<Route> = def
            .outgoing(&node.id)
            .map(|e| Route {
                target: e.target.clone(),
                guard: e.guard.clone(),
            })
            .collect();
        if node.node_type == NodeType::Start {
            entry = node.id.clone();
        }
        if routes.is_empty() {
            terminals.push(node.id.clone());
        }
        nodes.insert(
            node.id.clone(),
            CompiledNode {
                id: node.id.clone(),
                node_type: node.node_type,
                handler,
                retry: node.retry.clone(),
                timeout_secs: node.timeout_secs,
                routes,
            },
        );
    }

    tracing::debug!(
        workflow_id = %def.id,
        version = def.version,
        nodes = nodes.len(),
        entry = %entry,
        "compiled workflow"
    );

    Ok(CompiledWorkflow {
        workflow_id: def.id,
        version: def.version,
        name: def.name.clone(),
        config: def.config.clone(),
        variables: def.variables.clone(),
        nodes,
        entry,
        terminals,
    })
}

/// Cycle, terminal and reachability checks over edges whose endpoints exist.
fn graph_violations(def: &WorkflowDefinition) -> Vec<Violation> {
    let mut violations = Vec::new();

    let mut graph = DiGraph::<&str, ()>::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();
    let mut types: HashMap<&str, NodeType> = HashMap::new();
    for node in &def.nodes {
        if node.id.is_empty() || index.contains_key(node.id.as_str()) {
            continue;
        }
        index.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
        types.insert(node.id.as_str(), node.node_type);
    }
    for edge in &def.edges {
        if let (Some(&from), Some(&to)) = (
            index.get(edge.source.as_str()),
            index.get(edge.target.as_str()),
        ) {
            graph.add_edge(from, to, ());
        }
    }

    for component in tarjan_scc(&graph) {
        let is_cycle = component.len() > 1
            || component
                .first()
                .is_some_and(|&n| graph.contains_edge(n, n));
        if !is_cycle {
            continue;
        }
        let loop_capable = component
            .iter()
            .any(|&n| types.get(graph[n]).is_some_and(|t| t.is_loop_capable()));
        if !loop_capable {
            let mut members: Vec<&str> = component.iter().map(|&n| graph[n]).collect();
            members.sort_unstable();
            violations.push(Violation::new(
                "edges",
                format!(
                    "cycle without a conditional node involving: {}",
                    members.join(", ")
                ),
            ));
        }
    }

    if !index.is_empty()
        && !graph
            .node_indices()
            .any(|n| graph.neighbors(n).next().is_none())
    {
        violations.push(Violation::new("nodes", "workflow has no terminal node"));
    }

    let entry = def
        .nodes
        .iter()
        .find(|n| n.node_type == NodeType::Start)
        .and_then(|n| index.get(n.id.as_str()));
    if let Some(&entry) = entry {
        let mut reached = vec![false; graph.node_count()];
        let mut dfs = Dfs::new(&graph, entry);
        while let Some(n) = dfs.next(&graph) {
            reached[n.index()] = true;
        }
        for n in graph.node_indices().filter(|n| !reached[n.index()]) {
            tracing::warn!(
                workflow_id = %def.id,
                node_id = graph[n],
                "node is unreachable from the start node"
            );
        }
    }

    violations
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
