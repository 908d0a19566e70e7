//! Workflow definition loading, structural validation, and file operations.
//!
//! Definitions are JSON documents. Loading parses the document, then runs the
//! full compiler so a returned definition is known to be executable. Every
//! check appends to a violation list instead of returning early, so authors
//! see all problems in one pass.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use agentflow_types::workflow::{NodeType, WorkflowDefinition};
use thiserror::Error;

use crate::error::{ValidationError, Violation};

use super::dag;

/// Errors from reading or writing definition files.
#[derive(Debug, Error)]
pub enum DefinitionFileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialize(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a JSON document into a validated `WorkflowDefinition`.
pub fn load_definition(json: &str) -> Result<WorkflowDefinition, ValidationError> {
    let def: WorkflowDefinition = serde_json::from_str(json)
        .map_err(|e| ValidationError::single("$", format!("parse error: {e}")))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Run every structural and graph check without keeping the compiled graph.
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), ValidationError> {
    dag::compile(def).map(|_| ())
}

/// Structural checks that need no graph traversal.
///
/// - name is non-empty, at least one node exists
/// - node ids are non-empty and unique
/// - exactly one `start` node
/// - per-type required config fields are present
/// - edge endpoints exist
/// - `end` nodes have no outgoing edges; other non-conditional nodes have at most one
/// - guards only appear on edges leaving conditional nodes
/// - conditional nodes have at least one outgoing edge and at most one unguarded edge
/// - retry and timeout settings are in range
pub fn structural_violations(def: &WorkflowDefinition) -> Vec<Violation> {
    let mut violations = Vec::new();

    if def.name.trim().is_empty() {
        violations.push(Violation::new("name", "workflow name must not be empty"));
    }
    if def.nodes.is_empty() {
        violations.push(Violation::new("nodes", "workflow must have at least one node"));
    }

    let mut node_types: HashMap<&str, NodeType> = HashMap::new();
    for (index, node) in def.nodes.iter().enumerate() {
        if node.id.trim().is_empty() {
            violations.push(Violation::new(
                format!("nodes[{index}].id"),
                "node id must not be empty",
            ));
            continue;
        }
        if node_types.insert(node.id.as_str(), node.node_type).is_some() {
            violations.push(Violation::new(
                format!("nodes[{index}].id"),
                format!("duplicate node ID: '{}'", node.id),
            ));
        }

        for key in node.node_type.required_config() {
            let present = node
                .config
                .get(*key)
                .is_some_and(|v| v.as_str().is_none_or(|s| !s.trim().is_empty()));
            if !present {
                violations.push(Violation::new(
                    format!("nodes.{}.config.{key}", node.id),
                    format!("{} node requires '{key}'", node.node_type),
                ));
            }
        }

        if let Some(retry) = &node.retry {
            if retry.max_attempts == 0 {
                violations.push(Violation::new(
                    format!("nodes.{}.retry.max_attempts", node.id),
                    "max_attempts must be >= 1",
                ));
            }
            if retry.backoff_multiplier < 1.0 {
                violations.push(Violation::new(
                    format!("nodes.{}.retry.backoff_multiplier", node.id),
                    "backoff_multiplier must be >= 1.0",
                ));
            }
        }
        if node.timeout_secs == Some(0) {
            violations.push(Violation::new(
                format!("nodes.{}.timeout_secs", node.id),
                "timeout must be > 0",
            ));
        }
    }

    let starts: Vec<&str> = def
        .nodes
        .iter()
        .filter(|n| n.node_type == NodeType::Start)
        .map(|n| n.id.as_str())
        .collect();
    match starts.len() {
        0 => violations.push(Violation::new("nodes", "workflow must have a start node")),
        1 => {}
        _ => violations.push(Violation::new(
            "nodes",
            format!("multiple entry nodes: {}", starts.join(", ")),
        )),
    }

    for (index, edge) in def.edges.iter().enumerate() {
        let location = format!("edges[{index}]");
        let source_type = node_types.get(edge.source.as_str()).copied();
        if source_type.is_none() {
            violations.push(Violation::new(
                &location,
                format!("source '{}' does not exist", edge.source),
            ));
        }
        match node_types.get(edge.target.as_str()) {
            None => violations.push(Violation::new(
                &location,
                format!("target '{}' does not exist", edge.target),
            )),
            Some(NodeType::Start) => violations.push(Violation::new(
                &location,
                format!("edge into start node '{}'", edge.target),
            )),
            Some(_) => {}
        }

        if let Some(guard) = &edge.guard {
            if guard.trim().is_empty() {
                violations.push(Violation::new(&location, "guard must not be empty"));
            } else if source_type.is_some_and(|t| t != NodeType::Conditional) {
                violations.push(Violation::new(
                    &location,
                    format!(
                        "guard on edge leaving non-conditional node '{}'",
                        edge.source
                    ),
                ));
            }
        }
    }

    let mut seen = HashSet::new();
    for node in &def.nodes {
        if !seen.insert(node.id.as_str()) {
            continue;
        }
        let outgoing: Vec<_> = def.outgoing(&node.id).collect();
        match node.node_type {
            NodeType::End if !outgoing.is_empty() => {
                violations.push(Violation::new(
                    format!("nodes.{}", node.id),
                    "end node must not have outgoing edges",
                ));
            }
            NodeType::Conditional => {
                if outgoing.is_empty() {
                    violations.push(Violation::new(
                        format!("nodes.{}", node.id),
                        "conditional node needs at least one outgoing edge",
                    ));
                }
                if outgoing.iter().filter(|e| e.guard.is_none()).count() > 1 {
                    violations.push(Violation::new(
                        format!("nodes.{}", node.id),
                        "conditional node has more than one unguarded (default) edge",
                    ));
                }
            }
            _ if outgoing.len() > 1 => {
                violations.push(Violation::new(
                    format!("nodes.{}", node.id),
                    format!(
                        "{} node has {} outgoing edges; only conditional nodes may branch",
                        node.node_type,
                        outgoing.len()
                    ),
                ));
            }
            _ => {}
        }
    }

    violations
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load and validate a definition file.
pub fn load_definition_file(path: &Path) -> Result<WorkflowDefinition, DefinitionFileError> {
    let content = std::fs::read_to_string(path)?;
    Ok(load_definition(&content)?)
}

/// Write a definition as pretty JSON, creating parent directories.
pub fn save_definition_file(
    path: &Path,
    def: &WorkflowDefinition,
) -> Result<(), DefinitionFileError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(def)
        .map_err(|e| DefinitionFileError::Serialize(e.to_string()))?;
    std::fs::write(path, json)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
