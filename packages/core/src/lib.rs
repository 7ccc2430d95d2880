// ABOUTME: Core types, project layout, and utilities for Taskbox
// ABOUTME: Foundational package providing the task model shared across all Taskbox packages

pub mod constants;
pub mod environment;
pub mod types;
pub mod utils;
pub mod validation;

// Re-export main types
pub use types::{Iteration, Task, TaskStatus};

// Re-export the explicit context object
pub use environment::Environment;

// Re-export utilities
pub use utils::{read_json, write_json_atomic};

// Re-export validation
pub use validation::{parse_task_id, CoreError};

pub type Result<T> = std::result::Result<T, CoreError>;
