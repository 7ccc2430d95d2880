// ABOUTME: Agent capability traits at two conformance levels plus the exec seam they run through
// ABOUTME: AgentTool only invokes; SandboxAgent also describes what its container needs

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Anything that can turn a prompt into a response
#[async_trait]
pub trait AgentTool: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, prompt: &str) -> Result<String>;
}

/// An agent that knows how to live inside a task sandbox
pub trait SandboxAgent: AgentTool {
    /// Host paths (credentials, caches) to bind into the container
    fn container_mounts(&self) -> Vec<MountSpec>;

    /// Environment the agent needs, as ordered `KEY`/`VALUE` pairs
    fn environment_variables(&self) -> Vec<(String, String)>;

    /// Register MCP servers the agent should connect to
    fn configure_mcp(&mut self, servers: Vec<McpServer>) -> Result<()>;

    /// MCP configuration to materialize in the container, once servers are configured
    fn mcp_config_file(&self) -> Option<GeneratedFile> {
        None
    }

    /// Executable the sandbox must provide for `invoke` to work
    fn executable(&self) -> String {
        self.name().to_string()
    }

    /// Shell snippet that installs the agent CLI when the image lacks it
    fn install_script(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountSpec {
    pub host_path: PathBuf,
    pub container_path: String,
    #[serde(default)]
    pub read_only: bool,
}

impl MountSpec {
    pub fn new(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// `host:container[:ro]` bind string understood by Docker and Podman
    pub fn to_bind(&self) -> String {
        let mut bind = format!("{}:{}", self.host_path.display(), self.container_path);
        if self.read_only {
            bind.push_str(":ro");
        }
        bind
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServer {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// File contents the sandbox writes on the host and mounts at `container_path`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub file_name: String,
    pub container_path: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs a command somewhere an agent CLI is installed, normally a task container
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: Vec<String>, workdir: &str) -> Result<ExecOutput>;
}
