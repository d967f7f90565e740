//! Report generation for placement history analysis.
//!
//! Generates both JSON and human-readable text reports.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use color_eyre::eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use super::instance_set::InstanceSetHistory;
use super::node::NodeSetHistory;
use super::timeseries::DataPoint;

/// Everything derived from one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryReport {
    pub generated_at: DateTime<Utc>,
    pub instances: InstanceSetHistory,
    pub nodes: NodeSetHistory,
    pub active_nodes_by_day: Vec<DataPoint>,
}

impl HistoryReport {
    pub fn new(instances: InstanceSetHistory) -> Self {
        let nodes = NodeSetHistory::from_instance_set_history(&instances);
        let active_nodes_by_day =
            nodes.active_nodes_by_day(instances.window_start, instances.window_end);

        Self {
            generated_at: Utc::now(),
            instances,
            nodes,
            active_nodes_by_day,
        }
    }
}

/// Generate JSON report
pub fn generate_json_report(report: &HistoryReport, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report to JSON")?;

    fs::write(output_path, json)
        .with_context(|| format!("Failed to write JSON report to {}", output_path.display()))?;

    log::info!("JSON report written to {}", output_path.display());
    Ok(())
}

fn render_text_report(report: &HistoryReport) -> String {
    let instances = &report.instances;
    let mut lines: Vec<String> = Vec::new();

    lines.push("=".repeat(80));
    lines.push("                     TUNNELSCOPE PLACEMENT HISTORY".to_string());
    lines.push("=".repeat(80));
    lines.push(String::new());

    lines.push(format!("Generated: {}", report.generated_at.to_rfc3339()));
    lines.push(format!(
        "Window: {} to {}",
        instances.window_start.to_rfc3339(),
        instances.window_end.to_rfc3339()
    ));
    lines.push(format!(
        "Instances: {} complete, {} incomplete",
        instances.complete.len(),
        instances.incomplete.len()
    ));
    lines.push(String::new());

    let incomplete = instances.incomplete_by_state();
    if !incomplete.is_empty() {
        lines.push("Incomplete Histories:".to_string());
        for (state, count) in &incomplete {
            lines.push(format!("  {}: {}", state, count));
        }
        lines.push(String::new());
    }

    lines.push("=".repeat(80));
    lines.push("                         SOLE-TENANT NODES".to_string());
    lines.push("=".repeat(80));
    lines.push(String::new());

    if report.nodes.nodes.is_empty() {
        lines.push("No sole-tenant placements in window.".to_string());
        lines.push(String::new());
    }

    for node in &report.nodes.nodes {
        lines.push(format!("Node {}:", node.server_id));
        lines.push(format!("  First use: {}", node.first_use.to_rfc3339()));
        lines.push(format!("  Last use:  {}", node.last_use.to_rfc3339()));
        lines.push(format!("  Placements: {}", node.placements.len()));
        lines.push(format!(
            "  Peak concurrent placements: {}",
            node.peak_concurrent_placements
        ));
        lines.push(String::new());
    }

    if let Some(peak) = report.active_nodes_by_day.iter().max_by_key(|p| p.value) {
        lines.push(format!(
            "Peak active nodes per day: {} (on {})",
            peak.value,
            peak.timestamp.format("%Y-%m-%d")
        ));
        lines.push(String::new());
    }

    lines.push("=".repeat(80));
    lines.join("\n")
}

/// Generate human-readable text report
pub fn generate_text_report(report: &HistoryReport, output_path: &Path) -> Result<()> {
    let content = render_text_report(report);
    fs::write(output_path, content)
        .with_context(|| format!("Failed to write text report to {}", output_path.display()))?;

    log::info!("Text report written to {}", output_path.display());
    Ok(())
}

/// Print a summary to stdout
pub fn print_summary(report: &HistoryReport) {
    println!("\n=== PLACEMENT HISTORY SUMMARY ===\n");
    println!("Complete instances: {}", report.instances.complete.len());
    println!("Incomplete instances: {}", report.instances.incomplete.len());
    for (state, count) in report.instances.incomplete_by_state() {
        println!("  {}: {}", state, count);
    }
    println!("Sole-tenant nodes: {}", report.nodes.nodes.len());
    println!();
}
