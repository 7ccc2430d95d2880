// ABOUTME: Task and iteration type definitions
// ABOUTME: Persisted metadata for a unit of work and its numbered execution attempts

use crate::validation::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    New,
    InProgress,
    Iterating,
    Completed,
    Failed,
    Stopped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::New => "new",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Iterating => "iterating",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Stopped => "stopped",
        }
    }

    /// Whether a workflow run is in flight for this status
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::InProgress | TaskStatus::Iterating)
    }

    /// Statuses from which `restart` is allowed
    pub fn is_restartable(&self) -> bool {
        matches!(
            self,
            TaskStatus::New | TaskStatus::Failed | TaskStatus::Stopped
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work tracked under `.tasks/<id>/description.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub agent: String,
    pub workflow: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_branch: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, String>,
    // Set together through `set_workspace`, cleared together through `clear_workspace`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    branch_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    worktree_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default)]
    pub iteration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        id: u64,
        title: impl Into<String>,
        description: impl Into<String>,
        agent: impl Into<String>,
        workflow: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: title.into(),
            description: description.into(),
            status: TaskStatus::New,
            agent: agent.into(),
            workflow: workflow.into(),
            source_branch: None,
            inputs: BTreeMap::new(),
            branch_name: None,
            worktree_path: None,
            container_id: None,
            iteration: 0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn branch_name(&self) -> Option<&str> {
        self.branch_name.as_deref()
    }

    pub fn worktree_path(&self) -> Option<&Path> {
        self.worktree_path.as_deref()
    }

    pub fn has_workspace(&self) -> bool {
        self.branch_name.is_some()
    }

    pub fn set_workspace(&mut self, branch_name: impl Into<String>, worktree_path: PathBuf) {
        self.branch_name = Some(branch_name.into());
        self.worktree_path = Some(worktree_path);
        self.touch();
    }

    pub fn clear_workspace(&mut self) {
        self.branch_name = None;
        self.worktree_path = None;
        self.touch();
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        if status != TaskStatus::Failed {
            self.error = None;
        }
        self.touch();
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Check invariants of a record loaded from disk
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id == 0 {
            return Err(CoreError::InvalidTask("task id must be positive".to_string()));
        }
        if self.branch_name.is_some() != self.worktree_path.is_some() {
            return Err(CoreError::InvalidTask(format!(
                "task {} has a branch without a worktree or a worktree without a branch",
                self.id
            )));
        }
        Ok(())
    }
}

/// One execution attempt of a task's workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Iteration {
    pub number: u32,
    pub instructions: String,
    pub output_directory: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl Iteration {
    pub fn new(number: u32, instructions: impl Into<String>, output_directory: PathBuf) -> Self {
        Self {
            number,
            instructions: instructions.into(),
            output_directory,
            created_at: Utc::now(),
        }
    }
}
