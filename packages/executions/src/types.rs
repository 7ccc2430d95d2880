// ABOUTME: Iteration status record and execution state definitions
// ABOUTME: Serialized as camelCase status.json inside each iteration directory

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Initializing,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Initializing => "initializing",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationStatus {
    pub task_id: u64,
    pub status: ExecutionStatus,
    pub current_step: String,
    pub progress: u8,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IterationStatus {
    pub fn initializing(task_id: u64, first_step: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            status: ExecutionStatus::Initializing,
            current_step: first_step.into(),
            progress: 0,
            started_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
        }
    }

    /// Describe the first broken invariant, if any
    pub fn check(&self) -> Option<String> {
        if self.progress > 100 {
            return Some(format!("progress {} exceeds 100", self.progress));
        }
        if self.status.is_terminal() && self.progress != 100 {
            return Some(format!(
                "{} status requires progress 100, found {}",
                self.status, self.progress
            ));
        }
        if self.updated_at < self.started_at {
            return Some("updatedAt precedes startedAt".to_string());
        }
        None
    }
}
