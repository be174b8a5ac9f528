//! `flowline run` and `flowline validate`.

use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::{Map, Value, json};
use tokio::sync::broadcast::error::TryRecvError;

use flowline_core::config::load_engine_config;
use flowline_core::flow::definition::{build_node, load_flow_file};
use flowline_core::flow::{Environment, FlowEngine, FlowRun, SharedContext};
use flowline_types::config::EngineConfig;
use flowline_types::definition::{FlowDefinition, NodeDefinition};
use flowline_types::error::DefinitionError;
use flowline_types::event::{FlowEvent, FlowOutcome};

use crate::builtins::builtin_registry;

/// A finished run plus the events it published.
pub struct RunReport {
    pub flow: String,
    pub run: FlowRun,
    pub events: Vec<FlowEvent>,
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Handle `flowline run`. Returns whether the flow succeeded.
pub async fn handle_run(
    file: &Path,
    config_path: &Path,
    overrides: &[String],
    show_events: bool,
    json: bool,
) -> Result<bool> {
    let def = load_definition(file).await?;
    let config = load_engine_config(config_path).await;
    let report = execute(&def, config, overrides).await?;

    if json {
        let mut out = json!({
            "run_id": report.run.run_id.to_string(),
            "flow": report.flow,
            "outcome": report.run.outcome,
            "fields": report.run.fields,
        });
        if show_events {
            out["events"] = serde_json::to_value(&report.events)?;
        }
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        display_report(&report, show_events);
    }

    Ok(report.run.outcome.is_success())
}

/// Resolve `def` against the built-in actions and run it to completion.
pub async fn execute(
    def: &FlowDefinition,
    config: EngineConfig,
    overrides: &[String],
) -> Result<RunReport> {
    let mut fields = def.fields.clone();
    for raw in overrides {
        let (key, value) = parse_override(raw)?;
        fields.insert(key, value);
    }

    let root = build_node(&def.root, &builtin_registry())
        .with_context(|| format!("Failed to resolve flow '{}'", def.name))?;

    let engine = FlowEngine::new(config);
    let mut receiver = engine.event_bus().subscribe();
    let environment = Environment::new().with("flow_name", def.name.clone());

    let run = engine
        .run(
            environment,
            &root,
            fields,
            |ctx: &SharedContext, _: &Value| {
                tracing::info!(run_id = %ctx.run_id(), "overall success");
            },
            |ctx: &SharedContext, _: &Value| {
                tracing::warn!(run_id = %ctx.run_id(), "overall failure");
            },
        )
        .await?;

    let mut events = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event buffer overflowed, raise event_capacity");
            }
            Err(_) => break,
        }
    }

    Ok(RunReport {
        flow: def.name.clone(),
        run,
        events,
    })
}

/// Parse a `key=value` override; the value is JSON, or a plain string if it
/// does not parse as JSON.
pub fn parse_override(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("Invalid override '{raw}': expected KEY=VALUE");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("Invalid override '{raw}': key must not be empty");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn display_report(report: &RunReport, show_events: bool) {
    let outcome = match &report.run.outcome {
        FlowOutcome::Succeeded => style("succeeded".to_string()).green().bold(),
        FlowOutcome::Failed => style("failed".to_string()).red().bold(),
        other => style(other.to_string()).yellow().bold(),
    };

    println!();
    println!(
        "  Flow '{}' {} (run {})",
        style(&report.flow).cyan(),
        outcome,
        style(report.run.run_id).dim()
    );
    println!();

    if report.run.fields.is_empty() {
        println!("  No fields.");
    } else {
        println!("{}", fields_table(&report.run.fields));
    }

    if show_events {
        println!();
        println!("{}", events_table(&report.events));
    }
    println!();
}

fn fields_table(fields: &Map<String, Value>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![Cell::new("Field").fg(Color::Cyan), Cell::new("Value")]);

    for (key, value) in fields {
        table.add_row(vec![Cell::new(key), Cell::new(value.to_string())]);
    }
    table
}

fn events_table(events: &[FlowEvent]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Event").fg(Color::Cyan),
            Cell::new("Node"),
            Cell::new("Detail"),
        ]);

    for event in events {
        let (name, node, detail) = describe_event(event);
        table.add_row(vec![Cell::new(name), Cell::new(node), Cell::new(detail)]);
    }
    table
}

fn describe_event(event: &FlowEvent) -> (&'static str, String, String) {
    match event {
        FlowEvent::FlowStarted { root, at, .. } => {
            ("started", root.clone(), at.format("%H:%M:%S%.3f").to_string())
        }
        FlowEvent::NodeStarted { node, kind, .. } => ("node", node.clone(), kind.to_string()),
        FlowEvent::ActionSucceeded { node, .. } => ("succeeded", node.clone(), String::new()),
        FlowEvent::ActionFailed {
            node, error, fatal, ..
        } => {
            let detail = if *fatal {
                format!("{error} (fatal)")
            } else {
                error.clone()
            };
            ("failed", node.clone(), detail)
        }
        FlowEvent::FlowCancelled { at, .. } => {
            ("cancelled", "-".to_string(), at.format("%H:%M:%S%.3f").to_string())
        }
        FlowEvent::FlowSettled {
            outcome,
            duration_ms,
            ..
        } => ("settled", "-".to_string(), format!("{outcome} in {duration_ms} ms")),
    }
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

/// Handle `flowline validate`.
pub async fn handle_validate(file: &Path, json: bool) -> Result<()> {
    let def = load_definition(file).await?;
    build_node(&def.root, &builtin_registry())
        .with_context(|| format!("Flow '{}' references unknown actions", def.name))?;

    let nodes = count_nodes(&def.root);
    if json {
        let out = json!({
            "flow": def.name,
            "valid": true,
            "nodes": nodes,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} Flow '{}' is valid ({} nodes)",
            style("✓").green(),
            style(&def.name).cyan(),
            nodes
        );
        if let Some(description) = &def.description {
            println!("  {}", style(description).dim());
        }
        println!();
    }
    Ok(())
}

async fn load_definition(file: &Path) -> Result<FlowDefinition> {
    load_flow_file(file).await.map_err(|e| match e {
        DefinitionError::Parse(msg) => anyhow!("Failed to parse flow YAML: {msg}"),
        DefinitionError::Validation(msg) => anyhow!("Flow validation failed: {msg}"),
        other => anyhow!("Failed to load flow '{}': {other}", file.display()),
    })
}

fn count_nodes(node: &NodeDefinition) -> usize {
    match node {
        NodeDefinition::Plain(_) | NodeDefinition::Singular(_) => 1,
        NodeDefinition::Sequence(group) | NodeDefinition::Parallel(group) => {
            1 + group.children.iter().map(count_nodes).sum::<usize>()
        }
    }
}
