// ABOUTME: On-disk layout constants and defaults
// ABOUTME: Centralized names for the .tasks tree, per-task files, and container paths

/// Directory under the project root holding every task
pub const TASKS_DIR: &str = ".tasks";

/// Task metadata file inside a task directory
pub const DESCRIPTION_FILE: &str = "description.json";

/// Git worktree directory inside a task directory
pub const WORKSPACE_DIR: &str = "workspace";

/// Directory holding numbered iterations inside a task directory
pub const ITERATIONS_DIR: &str = "iterations";

/// Iteration metadata file
pub const ITERATION_FILE: &str = "iteration.json";

/// Persisted progress record for a running iteration
pub const STATUS_FILE: &str = "status.json";

/// Container output captured before teardown
pub const CONTAINER_LOG_FILE: &str = "container.log";

/// Project configuration file at the project root
pub const PROJECT_CONFIG_FILE: &str = "taskbox.json";

/// Mount point of the task worktree inside the sandbox
pub const CONTAINER_WORKSPACE: &str = "/workspace";

/// Mount point of the iteration output directory inside the sandbox
pub const CONTAINER_OUTPUT: &str = "/output";

/// Default prefix for deterministic container names
pub const DEFAULT_CONTAINER_PREFIX: &str = "taskbox";

/// Default image used for sandboxes when the project does not set one
pub const DEFAULT_IMAGE: &str = "node:lts";

/// Default agent tool
pub const DEFAULT_AGENT: &str = "claude";

/// Default workflow
pub const DEFAULT_WORKFLOW: &str = "swe";

/// Maximum number of parent directories to search when discovering the project root
pub const MAX_PARENT_SEARCH_DEPTH: usize = 10;
