//! Flow definition parsing, validation, and resolution.
//!
//! Converts between YAML files and the `FlowDefinition` IR, validates
//! structural constraints (name format, unique node names, non-empty action
//! references), and resolves a definition against an [`ActionRegistry`] into a
//! [`FlowNode`] tree ready to start.

use std::collections::HashSet;
use std::path::Path;

use flowline_types::definition::{FlowDefinition, NodeDefinition, TerminalDefinition};
use flowline_types::error::DefinitionError;

use super::node::{FlowNode, Parallel, Plain, Sequence, Singular, Terminal};
use super::registry::ActionRegistry;

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `FlowDefinition`.
pub fn parse_flow_yaml(yaml: &str) -> Result<FlowDefinition, DefinitionError> {
    let def: FlowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Serialize a `FlowDefinition` to a YAML string.
pub fn serialize_flow_yaml(def: &FlowDefinition) -> Result<String, DefinitionError> {
    serde_yaml_ng::to_string(def).map_err(|e| DefinitionError::Parse(e.to_string()))
}

/// Load and validate a flow definition from a YAML file.
pub async fn load_flow_file(path: &Path) -> Result<FlowDefinition, DefinitionError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_flow_yaml(&content)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `FlowDefinition`.
///
/// Checks:
/// - Name is non-empty and contains only alphanumeric characters, hyphens
///   and underscores
/// - Node names are non-empty and unique across the tree
/// - Every action reference is non-empty
/// - Terminal names are non-empty
pub fn validate_definition(def: &FlowDefinition) -> Result<(), DefinitionError> {
    if def.name.is_empty() {
        return Err(DefinitionError::Validation(
            "flow name must not be empty".to_string(),
        ));
    }
    if !def
        .name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(DefinitionError::Validation(format!(
            "flow name '{}' contains invalid characters (only alphanumeric, hyphens and underscores allowed)",
            def.name
        )));
    }

    let mut seen = HashSet::new();
    validate_node(&def.root, &mut seen)
}

fn validate_node<'a>(
    node: &'a NodeDefinition,
    seen: &mut HashSet<&'a str>,
) -> Result<(), DefinitionError> {
    if let Some(name) = node.name() {
        if name.is_empty() {
            return Err(DefinitionError::Validation(
                "node name must not be empty".to_string(),
            ));
        }
        if !seen.insert(name) {
            return Err(DefinitionError::Validation(format!(
                "duplicate node name: '{name}'"
            )));
        }
    }

    match node {
        NodeDefinition::Plain(def) => require_action(&def.action, node),
        NodeDefinition::Singular(def) => {
            require_action(&def.action, node)?;
            if let Some(stop) = &def.stop {
                if stop.name.is_empty() {
                    return Err(DefinitionError::Validation(
                        "terminal name must not be empty".to_string(),
                    ));
                }
            }
            Ok(())
        }
        NodeDefinition::Sequence(group) | NodeDefinition::Parallel(group) => group
            .children
            .iter()
            .try_for_each(|child| validate_node(child, seen)),
    }
}

fn require_action(action: &str, node: &NodeDefinition) -> Result<(), DefinitionError> {
    if action.is_empty() {
        return Err(DefinitionError::Validation(format!(
            "node '{}' has an empty action reference",
            node.name().unwrap_or("<unnamed>")
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve every name in `def` against `registry` and build the node tree.
pub fn build_node(
    def: &NodeDefinition,
    registry: &ActionRegistry,
) -> Result<FlowNode, DefinitionError> {
    let node = match def {
        NodeDefinition::Plain(plain) => {
            let mut node = Plain::from_shared(
                registry.sync_action(&plain.action)?,
                plain.attributes.clone(),
            );
            if let Some(name) = &plain.name {
                node = node.named(name);
            }
            FlowNode::Plain(node)
        }
        NodeDefinition::Singular(singular) => {
            let mut node = Singular::from_shared(
                registry.async_action(&singular.action)?,
                singular.attributes.clone(),
            )
            .end_on_failure(singular.end_on_failure);
            if let Some(name) = &singular.name {
                node = node.named(name);
            }
            if let Some(handler) = &singular.on_success {
                node = node.on_success_shared(registry.success_handler(handler)?);
            }
            if let Some(handler) = &singular.on_failure {
                node = node.on_failure_shared(registry.failure_handler(handler)?);
            }
            if let Some(stop) = &singular.stop {
                node = node.stop_with(build_terminal(stop, registry)?);
            }
            FlowNode::Singular(node)
        }
        NodeDefinition::Sequence(group) => {
            let mut node = Sequence::with_children(build_children(&group.children, registry)?);
            if let Some(name) = &group.name {
                node = node.named(name);
            }
            FlowNode::Sequence(node)
        }
        NodeDefinition::Parallel(group) => {
            let mut node = Parallel::with_children(build_children(&group.children, registry)?);
            if let Some(name) = &group.name {
                node = node.named(name);
            }
            FlowNode::Parallel(node)
        }
    };
    Ok(node)
}

fn build_children(
    children: &[NodeDefinition],
    registry: &ActionRegistry,
) -> Result<Vec<FlowNode>, DefinitionError> {
    children
        .iter()
        .map(|child| build_node(child, registry))
        .collect()
}

fn build_terminal(
    def: &TerminalDefinition,
    registry: &ActionRegistry,
) -> Result<Terminal, DefinitionError> {
    let end = def
        .end
        .as_deref()
        .map(|name| registry.sync_action(name))
        .transpose()?;
    Ok(Terminal::from_shared(&def.name, end, def.attributes.clone()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
