// ABOUTME: Task subcommands: create, stop, restart, delete, shell, list, inspect, iterate, logs
// ABOUTME: Validates ids up front, drives TaskService and renders tables or JSON envelopes

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use futures::StreamExt;
use inquire::Confirm;
use std::collections::BTreeMap;
use std::env;
use std::io::Write;
use std::sync::Arc;
use taskbox_cli::output::{
    execution_label, format_date, iteration_table, outcome_icon, parse_input, print_json,
    progress_bar, status_label, task_table, CommandResponse,
};
use taskbox_cli::progress::ConsoleReporter;
use taskbox_core::{parse_task_id, Environment, Task, TaskStatus};
use taskbox_tasks::{
    CreateTaskOptions, RemovalScope, ShellTarget, StopReport, TaskDetails, TaskRun, TaskService,
};
use tracing::debug;

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Create a task and run its first iteration
    Task {
        /// What the agent should do
        #[arg(required = true, num_args = 1..)]
        description: Vec<String>,
        /// Short title (defaults to the first line of the description)
        #[arg(long)]
        title: Option<String>,
        /// Agent to run: claude, codex, gemini, ...
        #[arg(short, long)]
        agent: Option<String>,
        /// Built-in workflow name or path to a workflow YAML file
        #[arg(short, long)]
        workflow: Option<String>,
        /// Branch or commit to start from (defaults to HEAD)
        #[arg(long = "from")]
        source_branch: Option<String>,
        /// Branch to create for the task
        #[arg(long)]
        branch: Option<String>,
        /// Explicit task id
        #[arg(long)]
        id: Option<String>,
        /// Extra workflow input as KEY=VALUE (repeatable)
        #[arg(short, long = "input", value_parser = parse_input)]
        inputs: Vec<(String, String)>,
        /// Only record the task and create its worktree
        #[arg(long)]
        no_run: bool,
    },
    /// Stop a task's container
    Stop {
        id: String,
        /// Also remove the worktree and its branch
        #[arg(long)]
        remove_worktree: bool,
    },
    /// Re-run a new, failed or stopped task
    Restart { id: String },
    /// Remove a task with its container, worktree and branch
    Delete {
        id: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Open a shell in the task's container, or in its worktree when none runs
    Shell { id: String },
    /// List all tasks
    List,
    /// Show task details, iterations and progress
    Inspect { id: String },
    /// Run another iteration with follow-up instructions
    Iterate {
        id: String,
        #[arg(required = true, num_args = 1..)]
        instructions: Vec<String>,
    },
    /// Show container logs
    Logs {
        id: String,
        /// Stream logs while the container runs
        #[arg(short, long)]
        follow: bool,
    },
}

/// Run one command and return the process exit code
pub async fn handle_task_command(command: TaskCommands, json: bool, verbose: bool) -> Result<i32> {
    // Ids are checked before touching the project or any backend
    let task_id = match &command {
        TaskCommands::Task { id: Some(id), .. } => Some(parse_task_id(id)?),
        TaskCommands::Task { .. } | TaskCommands::List => None,
        TaskCommands::Stop { id, .. }
        | TaskCommands::Restart { id }
        | TaskCommands::Delete { id, .. }
        | TaskCommands::Shell { id }
        | TaskCommands::Inspect { id }
        | TaskCommands::Iterate { id, .. }
        | TaskCommands::Logs { id, .. } => Some(parse_task_id(id)?),
    };

    let cwd = env::current_dir().context("Failed to read the current directory")?;
    let environment = Environment::discover(&cwd)?
        .with_verbose(verbose)
        .with_json(json);
    debug!("Project root: {}", environment.project_root().display());
    let mut service = TaskService::open(environment)?;
    if !json {
        service = service.with_reporter(Arc::new(ConsoleReporter));
    }
    let id = task_id.unwrap_or_default();

    match command {
        TaskCommands::Task {
            description,
            title,
            agent,
            workflow,
            source_branch,
            branch,
            inputs,
            no_run,
            ..
        } => {
            let options = CreateTaskOptions {
                title,
                description: description.join(" "),
                agent,
                workflow,
                source_branch,
                branch,
                task_id,
                inputs: inputs.into_iter().collect::<BTreeMap<_, _>>(),
                no_run,
            };
            create_task(&service, options, json).await
        }
        TaskCommands::Stop {
            remove_worktree, ..
        } => {
            let scope = RemovalScope {
                container: true,
                worktree: remove_worktree,
            };
            let report = service.stop(id, scope).await?;
            print_stop(id, "Stopped", &report, json);
            Ok(0)
        }
        TaskCommands::Restart { .. } => {
            if !json {
                println!("{}", format!("Restarting task {}", id).blue().bold());
            }
            let run = service.restart(id).await?;
            Ok(print_run(&run, json))
        }
        TaskCommands::Delete { yes, .. } => delete_task(&service, id, yes, json).await,
        TaskCommands::Shell { .. } => open_shell(&service, id, json).await,
        TaskCommands::List => {
            let tasks = service.list()?;
            print_list(&tasks, json);
            Ok(0)
        }
        TaskCommands::Inspect { .. } => {
            let details = service.inspect(id)?;
            print_details(&details, json);
            Ok(0)
        }
        TaskCommands::Iterate { instructions, .. } => {
            if !json {
                println!("{}", format!("Iterating on task {}", id).blue().bold());
            }
            let run = service.iterate(id, &instructions.join(" ")).await?;
            Ok(print_run(&run, json))
        }
        TaskCommands::Logs { follow, .. } => show_logs(&service, id, follow, json).await,
    }
}

async fn create_task(service: &TaskService, options: CreateTaskOptions, json: bool) -> Result<i32> {
    let no_run = options.no_run;
    let task = service.create(options).await?;
    let failed = task.status == TaskStatus::Failed;

    if json {
        match (&task.error, failed) {
            (Some(error), true) => print_json(&CommandResponse::failed_with(&task, error.clone())),
            _ => print_json(&CommandResponse::success(&task)),
        }
    } else {
        println!(
            "{} {}",
            format!("Task {} created:", task.id).green(),
            task.title
        );
        if let Some(branch) = task.branch_name() {
            println!("{:<12} {}", "Branch:".cyan(), branch);
        }
        if let Some(path) = task.worktree_path() {
            println!("{:<12} {}", "Worktree:".cyan(), path.display());
        }
        if no_run {
            println!(
                "{}",
                format!("Run it with 'taskbox restart {}'", task.id).dimmed()
            );
        } else {
            println!("{:<12} {}", "Status:".cyan(), status_label(task.status));
            if let Some(error) = &task.error {
                println!("{:<12} {}", "Error:".cyan(), error.red());
            }
        }
    }

    Ok(i32::from(failed))
}

fn print_run(run: &TaskRun, json: bool) -> i32 {
    let failed = run.task.status == TaskStatus::Failed;

    if json {
        match (&run.task.error, failed) {
            (Some(error), true) => print_json(&CommandResponse::failed_with(run, error.clone())),
            _ => print_json(&CommandResponse::success(run)),
        }
        return i32::from(failed);
    }

    let result = &run.result;
    println!();
    println!(
        "{} {} ({})",
        format!("Workflow {}", result.workflow).bold(),
        status_label(run.task.status),
        format!("{:.1}s", result.total_duration_secs).dimmed()
    );
    for step in &result.step_results {
        println!("  {} {}", outcome_icon(step.outcome), step.name);
        if let Some(error) = &step.error {
            println!("      {}", error.red());
        }
    }
    println!(
        "{} succeeded, {} failed, {} skipped",
        result.successful_steps.to_string().green(),
        result.failed_steps.to_string().red(),
        result.skipped_steps.to_string().dimmed()
    );
    for warning in &run.teardown.warnings {
        println!("{} {}", "Warning:".yellow(), warning);
    }

    i32::from(failed)
}

fn print_stop(id: u64, verb: &str, report: &StopReport, json: bool) {
    if json {
        print_json(&CommandResponse::success(report));
        return;
    }

    println!("{}", format!("{} task {}", verb, id).green());
    if let Some(workspace) = &report.workspace {
        if workspace.worktree_removed {
            println!("  {} worktree removed", "✓".green());
        }
        if workspace.branch_deleted {
            println!("  {} branch deleted", "✓".green());
        }
    }
    for warning in report.all_warnings() {
        println!("{} {}", "Warning:".yellow(), warning);
    }
}

async fn delete_task(service: &TaskService, id: u64, yes: bool, json: bool) -> Result<i32> {
    let task = service.store().load(id)?;

    if !yes && !json {
        let confirmed = Confirm::new(&format!(
            "Delete task {} '{}' with its worktree and branch?",
            id, task.title
        ))
        .with_default(false)
        .prompt()
        .map_err(|e| anyhow::anyhow!("Confirmation failed: {}", e))?;
        if !confirmed {
            println!("{}", "Deletion cancelled".yellow());
            return Ok(0);
        }
    }

    let report = service.delete(id).await?;
    print_stop(id, "Deleted", &report, json);
    Ok(0)
}

async fn open_shell(service: &TaskService, id: u64, json: bool) -> Result<i32> {
    let target = service.shell_target(id).await?;
    if json {
        anyhow::bail!("shell is interactive and has no JSON output");
    }

    match &target {
        ShellTarget::Container { backend, container } => println!(
            "{}",
            format!("Opening shell in {} container {}", backend, container).dimmed()
        ),
        ShellTarget::Worktree(path) => println!(
            "{}",
            format!("No running container; opening shell in {}", path.display()).dimmed()
        ),
    }
    Ok(service.shell(id).await?)
}

fn print_list(tasks: &[Task], json: bool) {
    if json {
        print_json(&CommandResponse::success(tasks));
        return;
    }

    if tasks.is_empty() {
        println!("{}", "No tasks found".yellow());
        println!(
            "{}",
            "Use 'taskbox task <description>' to create your first task".dimmed()
        );
        return;
    }

    println!("{}", task_table(tasks));
    println!("Total: {} tasks", tasks.len().to_string().cyan());
}

fn print_details(details: &TaskDetails, json: bool) {
    if json {
        print_json(&CommandResponse::success(details));
        return;
    }

    let task = &details.task;
    println!("{}", format!("Task {} - {}", task.id, task.title).blue().bold());
    println!();
    println!("{:<15} {}", "Status:".cyan(), status_label(task.status));
    println!("{:<15} {}", "Agent:".cyan(), task.agent);
    println!("{:<15} {}", "Workflow:".cyan(), task.workflow);
    println!("{:<15} {}", "Iteration:".cyan(), task.iteration);
    if let Some(source) = &task.source_branch {
        println!("{:<15} {}", "From:".cyan(), source);
    }
    if let Some(branch) = task.branch_name() {
        println!("{:<15} {}", "Branch:".cyan(), branch);
    }
    if let Some(path) = task.worktree_path() {
        println!("{:<15} {}", "Worktree:".cyan(), path.display());
    }
    if let Some(container) = &task.container_id {
        println!("{:<15} {}", "Container:".cyan(), container);
    }
    println!("{:<15} {}", "Created:".cyan(), format_date(&task.created_at));
    println!("{:<15} {}", "Updated:".cyan(), format_date(&task.updated_at));
    if let Some(error) = &task.error {
        println!("{:<15} {}", "Error:".cyan(), error.red());
    }

    println!();
    println!("{}", "Description".bold());
    println!("{}", task.description);

    if let Some(status) = &details.latest_status {
        println!();
        println!("{}", "Latest iteration".bold());
        println!(
            "{:<15} {} at '{}'",
            "Status:".cyan(),
            execution_label(status.status),
            status.current_step
        );
        println!("{:<15} {}", "Progress:".cyan(), progress_bar(status.progress));
        if let Some(error) = &status.error {
            println!("{:<15} {}", "Error:".cyan(), error.red());
        }
    }
    if let Some(error) = &details.status_error {
        println!("{} {}", "Warning:".yellow(), error);
    }

    if !details.iterations.is_empty() {
        println!();
        println!("{}", iteration_table(&details.iterations));
    }

    if !details.changed_files.is_empty() {
        println!();
        println!("{}", "Changed files".bold());
        for file in &details.changed_files {
            println!("  {}", file);
        }
    }
}

async fn show_logs(service: &TaskService, id: u64, follow: bool, json: bool) -> Result<i32> {
    if !follow || json {
        let logs = service.logs(id).await?;
        if json {
            print_json(&CommandResponse::success(serde_json::json!({ "logs": logs })));
        } else {
            print!("{}", logs);
        }
        return Ok(0);
    }

    let mut stream = service.follow_logs(id).await?;
    let mut stdout = std::io::stdout();
    while let Some(chunk) = stream.next().await {
        stdout.write_all(chunk?.as_bytes())?;
        stdout.flush()?;
    }
    Ok(0)
}
