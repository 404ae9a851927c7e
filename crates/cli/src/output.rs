//! Terminal rendering of node statuses and checkpoints

use clap::ValueEnum;
use colored::Colorize;
use medallion_processor::pipeline::NodeState;
use medallion_processor::{Checkpoint, NodeStatus};
use serde_json::json;

use crate::CliResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

fn state_label(state: NodeState) -> colored::ColoredString {
    match state {
        NodeState::Succeeded => state.to_string().green(),
        NodeState::Failed => state.to_string().red().bold(),
        NodeState::Running => state.to_string().yellow(),
        NodeState::Pending => state.to_string().dimmed(),
    }
}

pub fn print_statuses(statuses: &[NodeStatus], format: OutputFormat) -> CliResult<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(statuses)?);
        return Ok(());
    }

    println!(
        "{:<32} {:<10} {:>8} {:>10} {:>10} {:>8} {:>8} {:>6}",
        "NODE".bold(),
        "STATE".bold(),
        "BATCH".bold(),
        "IN".bold(),
        "OUT".bold(),
        "DROPPED".bold(),
        "LATE".bold(),
        "OPEN".bold()
    );
    for status in statuses {
        println!(
            "{:<32} {:<10} {:>8} {:>10} {:>10} {:>8} {:>8} {:>6}",
            status.name,
            state_label(status.state),
            status.batch_id,
            status.records_in,
            status.records_out,
            status.dropped + status.filtered,
            status.late_dropped,
            status
                .open_windows
                .map_or_else(|| "-".to_string(), |n| n.to_string())
        );
        if let Some(error) = &status.last_error {
            println!("  {} {}", "error:".red(), error);
        }
        for expectation in &status.expectations {
            if expectation.dropped + expectation.warned + expectation.failed > 0 {
                println!(
                    "  {} {} ({}): dropped={} warned={} failed={}",
                    "expectation".dimmed(),
                    expectation.name,
                    expectation.policy,
                    expectation.dropped,
                    expectation.warned,
                    expectation.failed
                );
            }
        }
    }
    Ok(())
}

pub fn print_checkpoints(checkpoints: &[Checkpoint], format: OutputFormat) -> CliResult<()> {
    if format == OutputFormat::Json {
        let rows: Vec<_> = checkpoints
            .iter()
            .map(|c| {
                json!({
                    "node": c.node,
                    "batch_id": c.batch_id,
                    "output_offset": c.output_offset,
                    "input_offsets": c.input_offsets,
                    "window_state_bytes": c.window_state.as_ref().map(Vec::len),
                    "committed_at": c.committed_at.to_rfc3339(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if checkpoints.is_empty() {
        println!("{}", "No checkpoints stored".yellow());
        return Ok(());
    }
    for checkpoint in checkpoints {
        println!(
            "{} batch={} output_offset={} committed_at={}",
            checkpoint.node.green().bold(),
            checkpoint.batch_id,
            checkpoint.output_offset,
            checkpoint.committed_at.to_rfc3339()
        );
        for (input, offset) in &checkpoint.input_offsets {
            println!("    {input} -> {offset}");
        }
        if let Some(state) = &checkpoint.window_state {
            println!("    window state: {} bytes", state.len());
        }
    }
    Ok(())
}
