// ABOUTME: Iteration status tracking for workflow runs
// ABOUTME: Persists a monotonic status record per iteration so runs can be observed from outside

pub mod tracker;
pub mod types;

pub use tracker::{persist_best_effort, IterationStatusManager};
pub use types::{ExecutionStatus, IterationStatus};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StatusError {
    #[error("Failed to load status {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid status record {path}: {message}")]
    Validation { path: String, message: String },
}

pub type Result<T> = std::result::Result<T, StatusError>;
