// ABOUTME: Agent tool capability and the registry of CLI coding agents
// ABOUTME: Agents are defined in config/agents.json and invoked inside the sandbox via exec

pub mod cli_agent;
pub mod registry;
pub mod tool;

pub use cli_agent::CliAgent;
pub use registry::{AgentDefinition, AgentRegistry, CredentialMount, McpSettings};
pub use tool::{
    AgentTool, CommandExecutor, ExecOutput, GeneratedFile, McpServer, MountSpec, SandboxAgent,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Failed to load agents config: {0}")]
    LoadError(String),

    #[error("Agent not found: {0}")]
    NotFound(String),

    #[error("Invalid agent configuration: {0}")]
    InvalidConfig(String),

    #[error("Agent {0} is not attached to a running sandbox")]
    NotAttached(String),

    #[error("Failed to execute agent {agent}: {message}")]
    Execution { agent: String, message: String },

    #[error("Agent {agent} exited with code {exit_code}: {stderr}")]
    Invocation {
        agent: String,
        exit_code: i64,
        stderr: String,
    },
}

pub type Result<T> = std::result::Result<T, AgentError>;
