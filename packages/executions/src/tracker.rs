// ABOUTME: State machine that owns one iteration's status.json
// ABOUTME: Writes are best-effort so a full disk never aborts a running workflow

use crate::types::{ExecutionStatus, IterationStatus};
use crate::{Result, StatusError};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use taskbox_core::write_json_atomic;
use tracing::{debug, warn};

/// Write `status` atomically. Never fails: errors are logged and swallowed.
pub fn persist_best_effort(path: &Path, status: &IterationStatus) {
    match write_json_atomic(path, status) {
        Ok(()) => debug!(
            "Status {} -> {} ({}%)",
            path.display(),
            status.status,
            status.progress
        ),
        Err(e) => warn!("Failed to write status {}: {}", path.display(), e),
    }
}

#[derive(Debug)]
pub struct IterationStatusManager {
    path: PathBuf,
    status: IterationStatus,
}

impl IterationStatusManager {
    /// Start tracking a new run and write the initial record immediately
    pub fn create_initial(path: impl Into<PathBuf>, task_id: u64, first_step: &str) -> Self {
        let manager = Self {
            path: path.into(),
            status: IterationStatus::initializing(task_id, first_step),
        };
        persist_best_effort(&manager.path, &manager.status);
        manager
    }

    pub fn load(path: &Path) -> Result<IterationStatus> {
        let content = fs::read_to_string(path).map_err(|source| StatusError::Load {
            path: path.display().to_string(),
            source,
        })?;

        let status: IterationStatus =
            serde_json::from_str(&content).map_err(|e| StatusError::Validation {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        if let Some(message) = status.check() {
            return Err(StatusError::Validation {
                path: path.display().to_string(),
                message,
            });
        }

        Ok(status)
    }

    pub fn status(&self) -> &IterationStatus {
        &self.status
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Progress is clamped to 0..=100 and never moves backwards within a run
    pub fn update(
        &mut self,
        status: ExecutionStatus,
        step: &str,
        progress: i64,
        error: Option<String>,
    ) {
        if self.status.status.is_terminal() {
            warn!(
                "Ignoring status update '{}' for task {}: run already {}",
                step, self.status.task_id, self.status.status
            );
            return;
        }

        let clamped = progress.clamp(0, 100) as u8;
        let now = Utc::now();

        self.status.status = status;
        self.status.current_step = step.to_string();
        self.status.progress = if status.is_terminal() {
            100
        } else {
            clamped.max(self.status.progress)
        };
        self.status.updated_at = now;
        if status.is_terminal() {
            self.status.completed_at = Some(now);
        }
        if error.is_some() {
            self.status.error = error;
        }

        persist_best_effort(&self.path, &self.status);
    }

    pub fn complete(&mut self, step: &str) {
        self.update(ExecutionStatus::Completed, step, 100, None);
    }

    pub fn fail(&mut self, step: &str, error: impl Into<String>) {
        self.update(ExecutionStatus::Failed, step, 100, Some(error.into()));
    }
}
