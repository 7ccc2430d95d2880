// ABOUTME: JSON response envelope and table/label formatting shared by all commands
// ABOUTME: Every `--json` response is `{ success, data?, error? }`

use chrono::{DateTime, Local, Utc};
use colored::*;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use taskbox_core::validation::truncate;
use taskbox_core::{Iteration, Task, TaskStatus};
use taskbox_executions::ExecutionStatus;
use taskbox_workflows::StepOutcome;

const PROGRESS_WIDTH: usize = 20;

#[derive(Debug, Serialize)]
pub struct CommandResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> CommandResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Command ran but the task it drove did not succeed
    pub fn failed_with(data: T, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Some(data),
            error: Some(error.into()),
        }
    }
}

impl CommandResponse<()> {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

pub fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        serde_json::json!({ "success": false, "error": e.to_string() }).to_string()
    })
}

pub fn print_json<T: Serialize>(value: &T) {
    println!("{}", to_json(value));
}

/// Parse a `KEY=VALUE` workflow input
pub fn parse_input(entry: &str) -> Result<(String, String), String> {
    match entry.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", entry)),
    }
}

pub fn status_label(status: TaskStatus) -> ColoredString {
    let text = status.as_str();
    match status {
        TaskStatus::New => text.normal(),
        TaskStatus::InProgress | TaskStatus::Iterating => text.cyan(),
        TaskStatus::Completed => text.green(),
        TaskStatus::Failed => text.red(),
        TaskStatus::Stopped => text.yellow(),
    }
}

pub fn execution_label(status: ExecutionStatus) -> ColoredString {
    let text = status.as_str();
    match status {
        ExecutionStatus::Completed => text.green(),
        ExecutionStatus::Failed => text.red(),
        _ => text.cyan(),
    }
}

pub fn outcome_icon(outcome: StepOutcome) -> ColoredString {
    match outcome {
        StepOutcome::Succeeded => "✓".green(),
        StepOutcome::Failed => "✗".red(),
        StepOutcome::Skipped => "-".dimmed(),
    }
}

pub fn format_date(date: &DateTime<Utc>) -> String {
    date.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

/// `[#####---------------]  25%`
pub fn progress_bar(progress: u8) -> String {
    let progress = progress.min(100) as usize;
    let filled = progress * PROGRESS_WIDTH / 100;
    format!(
        "[{}{}] {:>3}%",
        "#".repeat(filled),
        "-".repeat(PROGRESS_WIDTH - filled),
        progress
    )
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn task_table(tasks: &[Task]) -> Table {
    let mut table = new_table();
    table.set_header(vec!["ID", "Title", "Status", "Agent", "Iteration", "Branch", "Updated"]);

    for task in tasks {
        table.add_row(vec![
            task.id.to_string(),
            truncate(&task.title, 40),
            task.status.to_string(),
            task.agent.clone(),
            task.iteration.to_string(),
            task.branch_name().unwrap_or("-").to_string(),
            format_date(&task.updated_at),
        ]);
    }
    table
}

pub fn iteration_table(iterations: &[Iteration]) -> Table {
    let mut table = new_table();
    table.set_header(vec!["#", "Instructions", "Created"]);

    for iteration in iterations {
        table.add_row(vec![
            iteration.number.to_string(),
            truncate(iteration.instructions.lines().next().unwrap_or_default(), 60),
            format_date(&iteration.created_at),
        ]);
    }
    table
}
