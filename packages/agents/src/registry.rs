// ABOUTME: Agent registry for loading CLI coding agent definitions
// ABOUTME: Definitions are embedded from config/agents.json at compile time

use crate::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialMount {
    /// Host path; a leading `~` expands to the host home directory
    pub host_path: String,
    pub container_path: String,
    #[serde(default)]
    pub read_only: bool,
}

impl CredentialMount {
    pub fn resolve(&self, home: Option<&Path>) -> Option<PathBuf> {
        match self.host_path.strip_prefix("~/") {
            Some(rest) => home.map(|home| home.join(rest)),
            None if self.host_path == "~" => home.map(Path::to_path_buf),
            None => Some(PathBuf::from(&self.host_path)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpSettings {
    pub config_path: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub command: String,
    /// Argument template; `{prompt}` is replaced with the rendered prompt
    pub args: Vec<String>,
    #[serde(default)]
    pub install: Option<String>,
    #[serde(default)]
    pub credential_mounts: Vec<CredentialMount>,
    #[serde(default)]
    pub env_passthrough: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub mcp: Option<McpSettings>,
}

impl AgentDefinition {
    fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(AgentError::InvalidConfig(format!(
                "agent '{}' has no command",
                self.id
            )));
        }
        if !self.args.iter().any(|arg| arg.contains("{prompt}")) {
            return Err(AgentError::InvalidConfig(format!(
                "agent '{}' never passes {{prompt}}",
                self.id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct AgentsConfig {
    #[allow(dead_code)]
    version: String,
    agents: Vec<AgentDefinition>,
}

pub struct AgentRegistry {
    agents: HashMap<String, AgentDefinition>,
}

impl AgentRegistry {
    /// Create a new AgentRegistry from the embedded definitions
    pub fn new() -> Result<Self> {
        Self::from_json(include_str!("../config/agents.json"))
    }

    pub fn from_json(config_json: &str) -> Result<Self> {
        let config: AgentsConfig = serde_json::from_str(config_json)
            .map_err(|e| AgentError::LoadError(e.to_string()))?;

        let mut agents = HashMap::new();
        for agent in config.agents {
            agent.validate()?;
            agents.insert(agent.id.clone(), agent);
        }

        Ok(Self { agents })
    }

    pub fn get(&self, id: &str) -> Option<&AgentDefinition> {
        self.agents.get(id)
    }

    /// All agents, sorted by id
    pub fn list(&self) -> Vec<&AgentDefinition> {
        let mut agents: Vec<_> = self.agents.values().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    pub fn exists(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    pub fn validate_agent_id(&self, agent_id: &str) -> Result<()> {
        if self.exists(agent_id) {
            Ok(())
        } else {
            Err(AgentError::NotFound(agent_id.to_string()))
        }
    }
}
