// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Taskbox

// Logging
pub const RUST_LOG: &str = "RUST_LOG";

// Container backend selection
pub const TASKBOX_BACKEND: &str = "TASKBOX_BACKEND";
pub const TASKBOX_PODMAN_SOCKET: &str = "TASKBOX_PODMAN_SOCKET";
pub const DOCKER_HOST: &str = "DOCKER_HOST";
pub const XDG_RUNTIME_DIR: &str = "XDG_RUNTIME_DIR";

// Sandbox defaults (override taskbox.json)
pub const TASKBOX_IMAGE: &str = "TASKBOX_IMAGE";
pub const TASKBOX_CONTAINER_PREFIX: &str = "TASKBOX_CONTAINER_PREFIX";

// Agent defaults
pub const TASKBOX_AGENT: &str = "TASKBOX_AGENT";

// System Environment Variables
pub const HOME: &str = "HOME";
pub const SHELL: &str = "SHELL";
