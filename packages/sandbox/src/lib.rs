// ABOUTME: Container sandboxes for Taskbox tasks over Docker or Podman
// ABOUTME: Backend adapter, backend selection, UID/GID reconciliation and the lifecycle controller

pub mod backend;
pub mod engine;
pub mod lifecycle;
pub mod scripts;
pub mod user_mapping;

pub use backend::{
    container_name, looks_like_docker, select_backend, Backend, BackendRegistry,
    ContainerBackend, ContainerExecutor, ContainerSpec, EngineVersion,
};
pub use engine::{podman_socket_path, EngineBackend};
pub use lifecycle::{
    merge_env, ProgressReporter, SandboxController, SandboxHandle, SandboxRequest, TeardownReport,
};
pub use user_mapping::{HostIds, UserMapping};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("No container backend available: start Docker or Podman and try again")]
    NoBackend,

    #[error("{backend} is not available: {message}")]
    Unavailable { backend: Backend, message: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Exec error: {0}")]
    Exec(String),

    #[error("Image {0} has no /bin/sh; taskbox needs a shell in the sandbox image")]
    UnsupportedImage(String),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Workspace {0} does not exist; create the task worktree first")]
    MissingWorkspace(String),

    #[error("Failed to prepare sandbox files: {0}")]
    Prepare(String),

    #[error("Sandbox {container} did not become ready: {message}")]
    NotReady { container: String, message: String },

    #[error("Agent error: {0}")]
    Agent(#[from] taskbox_agents::AgentError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
