// ABOUTME: Validation helpers and the core error type
// ABOUTME: Parses user-supplied task ids and checks task records before they are trusted

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid task id '{0}': expected a positive integer")]
    InvalidTaskId(String),

    #[error("Invalid task record: {0}")]
    InvalidTask(String),

    #[error("No git repository found from {0}")]
    ProjectNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parse a task id given on the command line
pub fn parse_task_id(raw: &str) -> Result<u64, CoreError> {
    match raw.trim().parse::<u64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(CoreError::InvalidTaskId(raw.to_string())),
    }
}

/// Truncate a string to a maximum number of characters, appending an ellipsis
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", kept)
}
