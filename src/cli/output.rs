//! Output formatting utilities for the CLI.

use std::env;

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

use crate::domain::models::{Task, TaskState};
use crate::services::StoreStats;

/// A command result that renders for people or as JSON.
pub trait CliOutput: Serialize {
    /// Plain-text rendering.
    fn to_human(&self) -> String;

    /// JSON rendering; defaults to the serde form.
    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Print `result` as pretty JSON or as human text.
pub fn output<T: CliOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(&result.to_json()).unwrap_or_default()
        );
    } else {
        println!("{}", result.to_human());
    }
}

/// Truncate a string to at most `max_len` characters, appending "..." if
/// truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// One row per task, in id order.
pub fn task_table(tasks: &[Task]) -> String {
    let use_colors = supports_color();
    let mut table = base_table();
    table.set_header(
        ["ID", "Type", "State", "Parent", "Retries", "Objective"]
            .into_iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold)),
    );

    for task in tasks {
        let state = if use_colors {
            Cell::new(task.state.as_str()).fg(state_color(task.state))
        } else {
            Cell::new(format!("{} {}", state_icon(task.state), task.state.as_str()))
        };
        table.add_row(vec![
            Cell::new(task.id),
            Cell::new(task.task_type.as_str()),
            state,
            Cell::new(task.parent_id.map_or_else(|| "-".to_string(), |p| p.to_string())),
            Cell::new(format!("{}/{}", task.retry_count, task.max_retries)),
            Cell::new(truncate(&task.objective, 50)),
        ]);
    }
    table.to_string()
}

/// Task counts by state.
pub fn stats_table(stats: &StoreStats) -> String {
    let mut table = base_table();
    table.set_header(
        ["Total", "Pending", "Running", "Retrying", "Succeeded", "Failed", "Cancelled"]
            .into_iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold)),
    );
    table.add_row(vec![
        stats.total,
        stats.pending,
        stats.running,
        stats.retrying,
        stats.succeeded,
        stats.failed,
        stats.cancelled,
    ]);
    table.to_string()
}

fn base_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Check if color output is supported
fn supports_color() -> bool {
    if env::var_os("NO_COLOR").is_some() {
        return false;
    }
    !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}

fn state_color(state: TaskState) -> Color {
    match state {
        TaskState::Success => Color::Green,
        TaskState::Running => Color::Cyan,
        TaskState::Retrying => Color::Yellow,
        TaskState::Failed => Color::Red,
        TaskState::Cancelled => Color::DarkGrey,
        TaskState::Pending => Color::White,
    }
}

fn state_icon(state: TaskState) -> &'static str {
    match state {
        TaskState::Success => "✓",
        TaskState::Running => "⟳",
        TaskState::Retrying => "↻",
        TaskState::Failed => "✗",
        TaskState::Cancelled => "⊘",
        TaskState::Pending => "○",
    }
}
