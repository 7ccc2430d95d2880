// ABOUTME: Default progress reporter that forwards sandbox steps to tracing
// ABOUTME: Used when the caller does not install its own reporter

use taskbox_sandbox::ProgressReporter;
use tracing::{info, warn};

#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn step_started(&self, step: &str) {
        info!("{}...", step);
    }

    fn step_completed(&self, step: &str) {
        info!("{}: done", step);
    }

    fn step_failed(&self, step: &str, error: &str) {
        warn!("{}: failed: {}", step, error);
    }
}
