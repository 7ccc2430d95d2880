// ABOUTME: Human-readable progress lines for sandbox provisioning and teardown
// ABOUTME: Written to stderr so command output on stdout is unaffected

use colored::*;
use taskbox_sandbox::ProgressReporter;

#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter;

impl ProgressReporter for ConsoleReporter {
    fn step_started(&self, step: &str) {
        eprintln!("  {} {}", "→".cyan(), step.dimmed());
    }

    fn step_completed(&self, step: &str) {
        eprintln!("  {} {}", "✓".green(), step);
    }

    fn step_failed(&self, step: &str, error: &str) {
        eprintln!("  {} {}: {}", "✗".red(), step, error.red());
    }
}
