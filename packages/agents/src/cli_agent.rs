// ABOUTME: SandboxAgent implementation driving an agent CLI through a CommandExecutor
// ABOUTME: One implementation serves every registry entry; behaviour comes from its definition

use crate::registry::AgentDefinition;
use crate::tool::{AgentTool, CommandExecutor, GeneratedFile, McpServer, MountSpec, SandboxAgent};
use crate::{AgentError, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use taskbox_core::constants::CONTAINER_WORKSPACE;
use tracing::{debug, info};

const PROMPT_PLACEHOLDER: &str = "{prompt}";
const MCP_CONFIG_PLACEHOLDER: &str = "{mcpConfig}";

pub struct CliAgent {
    definition: AgentDefinition,
    home: Option<PathBuf>,
    passthrough: Vec<(String, String)>,
    mcp_servers: Vec<McpServer>,
    executor: Option<Arc<dyn CommandExecutor>>,
}

impl CliAgent {
    /// Build an agent using the current user's home and environment
    pub fn from_host(definition: AgentDefinition) -> Self {
        let home = env::var_os("HOME").map(PathBuf::from);
        Self::with_host(definition, home, |key| env::var(key).ok())
    }

    pub fn with_host<F>(definition: AgentDefinition, home: Option<PathBuf>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let passthrough = definition
            .env_passthrough
            .iter()
            .filter_map(|key| lookup(key).map(|value| (key.clone(), value)))
            .collect();

        Self {
            definition,
            home,
            passthrough,
            mcp_servers: Vec::new(),
            executor: None,
        }
    }

    /// Attach the executor of a running sandbox so `invoke` has somewhere to run
    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn definition(&self) -> &AgentDefinition {
        &self.definition
    }

    /// Full argv for one invocation
    pub fn command_line(&self, prompt: &str) -> Vec<String> {
        let mut argv = vec![self.definition.command.clone()];
        argv.extend(
            self.definition
                .args
                .iter()
                .map(|arg| arg.replace(PROMPT_PLACEHOLDER, prompt)),
        );

        if let (Some(mcp), false) = (&self.definition.mcp, self.mcp_servers.is_empty()) {
            argv.extend(
                mcp.args
                    .iter()
                    .map(|arg| arg.replace(MCP_CONFIG_PLACEHOLDER, &mcp.config_path)),
            );
        }

        argv
    }
}

#[async_trait]
impl AgentTool for CliAgent {
    fn name(&self) -> &str {
        &self.definition.id
    }

    async fn invoke(&self, prompt: &str) -> Result<String> {
        let executor = self
            .executor
            .as_ref()
            .ok_or_else(|| AgentError::NotAttached(self.definition.id.clone()))?;

        info!(
            "Invoking agent {} ({} prompt chars)",
            self.definition.id,
            prompt.chars().count()
        );
        let output = executor
            .run(self.command_line(prompt), CONTAINER_WORKSPACE)
            .await?;

        if !output.success() {
            let stderr = if output.stderr.trim().is_empty() {
                output.stdout.trim().to_string()
            } else {
                output.stderr.trim().to_string()
            };
            return Err(AgentError::Invocation {
                agent: self.definition.id.clone(),
                exit_code: output.exit_code,
                stderr,
            });
        }

        debug!(
            "Agent {} returned {} bytes",
            self.definition.id,
            output.stdout.len()
        );
        Ok(output.stdout)
    }
}

impl SandboxAgent for CliAgent {
    fn container_mounts(&self) -> Vec<MountSpec> {
        self.definition
            .credential_mounts
            .iter()
            .filter_map(|mount| {
                let host_path = mount.resolve(self.home.as_deref())?;
                if !host_path.exists() {
                    debug!(
                        "Skipping {} mount {}: not present on host",
                        self.definition.id,
                        host_path.display()
                    );
                    return None;
                }
                Some(MountSpec {
                    host_path,
                    container_path: mount.container_path.clone(),
                    read_only: mount.read_only,
                })
            })
            .collect()
    }

    fn environment_variables(&self) -> Vec<(String, String)> {
        let mut vars: Vec<(String, String)> = self
            .definition
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        vars.extend(self.passthrough.iter().cloned());
        vars
    }

    fn configure_mcp(&mut self, servers: Vec<McpServer>) -> Result<()> {
        if self.definition.mcp.is_none() && !servers.is_empty() {
            return Err(AgentError::InvalidConfig(format!(
                "agent '{}' does not support MCP servers",
                self.definition.id
            )));
        }
        self.mcp_servers = servers;
        Ok(())
    }

    fn mcp_config_file(&self) -> Option<GeneratedFile> {
        let mcp = self.definition.mcp.as_ref()?;
        if self.mcp_servers.is_empty() {
            return None;
        }

        let mut servers = Map::new();
        for server in &self.mcp_servers {
            servers.insert(
                server.name.clone(),
                json!({
                    "command": server.command,
                    "args": server.args,
                    "env": server.env,
                }),
            );
        }
        let content = serde_json::to_string_pretty(&json!({ "mcpServers": Value::Object(servers) }))
            .unwrap_or_else(|_| "{}".to_string());

        Some(GeneratedFile {
            file_name: format!("{}-mcp.json", self.definition.id),
            container_path: mcp.config_path.clone(),
            content,
        })
    }

    fn executable(&self) -> String {
        self.definition.command.clone()
    }

    fn install_script(&self) -> Option<String> {
        self.definition.install.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AgentRegistry;
    use crate::tool::ExecOutput;
    use mockall::mock;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    mock! {
        Executor {}

        #[async_trait::async_trait]
        impl CommandExecutor for Executor {
            async fn run(&self, command: Vec<String>, workdir: &str) -> Result<ExecOutput>;
        }
    }

    fn definition(id: &str) -> AgentDefinition {
        AgentRegistry::new().unwrap().get(id).unwrap().clone()
    }

    #[test]
    fn test_command_line_substitutes_prompt() {
        let agent = CliAgent::with_host(definition("codex"), None, |_| None);
        assert_eq!(
            agent.command_line("fix the bug"),
            vec!["codex", "exec", "--full-auto", "--skip-git-repo-check", "fix the bug"]
        );
    }

    #[tokio::test]
    async fn test_invoke_runs_in_workspace() {
        let mut executor = MockExecutor::new();
        executor
            .expect_run()
            .withf(|command, workdir| command[0] == "claude" && workdir == "/workspace")
            .times(1)
            .returning(|_, _| {
                Ok(ExecOutput {
                    exit_code: 0,
                    stdout: "done".to_string(),
                    stderr: String::new(),
                })
            });

        let agent = CliAgent::with_host(definition("claude"), None, |_| None)
            .with_executor(Arc::new(executor));
        assert_eq!(agent.invoke("hello").await.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_invocation_error() {
        let mut executor = MockExecutor::new();
        executor.expect_run().returning(|_, _| {
            Ok(ExecOutput {
                exit_code: 2,
                stdout: String::new(),
                stderr: "rate limited\n".to_string(),
            })
        });

        let agent = CliAgent::with_host(definition("gemini"), None, |_| None)
            .with_executor(Arc::new(executor));
        match agent.invoke("hello").await {
            Err(AgentError::Invocation {
                exit_code, stderr, ..
            }) => {
                assert_eq!(exit_code, 2);
                assert_eq!(stderr, "rate limited");
            }
            other => panic!("expected invocation error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_invoke_without_executor_fails() {
        let agent = CliAgent::with_host(definition("qwen"), None, |_| None);
        assert!(matches!(
            agent.invoke("hello").await,
            Err(AgentError::NotAttached(_))
        ));
    }

    #[test]
    fn test_mounts_only_include_existing_host_paths() {
        let home = TempDir::new().unwrap();
        std::fs::create_dir(home.path().join(".claude")).unwrap();

        let agent = CliAgent::with_host(
            definition("claude"),
            Some(home.path().to_path_buf()),
            |_| None,
        );
        let mounts = agent.container_mounts();

        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].host_path, home.path().join(".claude"));
        assert_eq!(mounts[0].container_path, "/home/agent/.claude");
    }

    #[test]
    fn test_environment_includes_defaults_and_passthrough() {
        let agent = CliAgent::with_host(definition("claude"), None, |key| {
            (key == "ANTHROPIC_API_KEY").then(|| "sk-test".to_string())
        });
        assert_eq!(
            agent.environment_variables(),
            vec![
                ("DISABLE_AUTOUPDATER".to_string(), "1".to_string()),
                ("ANTHROPIC_API_KEY".to_string(), "sk-test".to_string()),
            ]
        );
    }

    #[test]
    fn test_configure_mcp_adds_config_and_arguments() {
        let mut agent = CliAgent::with_host(definition("claude"), None, |_| None);
        assert!(agent.mcp_config_file().is_none());

        agent
            .configure_mcp(vec![McpServer {
                name: "tasks".to_string(),
                command: "taskbox-mcp".to_string(),
                args: vec![],
                env: BTreeMap::new(),
            }])
            .unwrap();

        let file = agent.mcp_config_file().unwrap();
        assert_eq!(file.container_path, "/home/agent/.taskbox/mcp.json");
        let parsed: Value = serde_json::from_str(&file.content).unwrap();
        assert_eq!(parsed["mcpServers"]["tasks"]["command"], "taskbox-mcp");

        let argv = agent.command_line("p");
        assert!(argv.ends_with(&[
            "--mcp-config".to_string(),
            "/home/agent/.taskbox/mcp.json".to_string()
        ]));
    }

    #[test]
    fn test_configure_mcp_rejected_without_support() {
        let mut agent = CliAgent::with_host(definition("codex"), None, |_| None);
        let result = agent.configure_mcp(vec![McpServer {
            name: "x".to_string(),
            command: "x".to_string(),
            args: vec![],
            env: BTreeMap::new(),
        }]);
        assert!(matches!(result, Err(AgentError::InvalidConfig(_))));
    }
}
