// ABOUTME: taskbox command line entry point
// ABOUTME: Parses arguments, sets up logging and dispatches to the task command handlers

use clap::Parser;
use colored::*;
use std::process;
use taskbox_cli::logging::init_tracing;
use taskbox_cli::output::{print_json, CommandResponse};

mod cli;

use cli::tasks::TaskCommands;

#[derive(Parser)]
#[command(name = "taskbox")]
#[command(about = "Taskbox - run coding agents on tasks inside isolated container sandboxes")]
#[command(version)]
struct Cli {
    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Show informational logs (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: TaskCommands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json = cli.json;

    match cli::tasks::handle_task_command(cli.command, json, cli.verbose).await {
        Ok(0) => {}
        Ok(code) => process::exit(code),
        Err(e) => {
            if json {
                print_json(&CommandResponse::failure(format!("{:#}", e)));
            } else {
                eprintln!("{} {:#}", "Error:".red().bold(), e);
            }
            process::exit(1);
        }
    }
}
