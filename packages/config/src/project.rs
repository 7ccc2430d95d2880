// ABOUTME: Project-level configuration stored in taskbox.json at the repository root
// ABOUTME: Supplies sandbox defaults and custom environment variables merged into containers

use crate::constants::{TASKBOX_AGENT, TASKBOX_CONTAINER_PREFIX, TASKBOX_IMAGE};
use crate::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use taskbox_core::constants::{
    DEFAULT_AGENT, DEFAULT_CONTAINER_PREFIX, DEFAULT_IMAGE, DEFAULT_WORKFLOW, PROJECT_CONFIG_FILE,
};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    /// `KEY=VALUE` pairs, or bare `KEY` to forward the host value
    #[serde(default)]
    pub envs: Vec<String>,
    /// Dotenv file, relative to the project root unless absolute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envs_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_workflow: Option<String>,
    /// MCP servers handed to agents that support them, keyed by server name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ProjectConfig {
    /// Load `taskbox.json` from the project root; a missing file yields defaults
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(PROJECT_CONFIG_FILE);
        if !path.exists() {
            debug!("No {} found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn image(&self) -> String {
        env::var(TASKBOX_IMAGE)
            .ok()
            .or_else(|| self.image.clone())
            .unwrap_or_else(|| DEFAULT_IMAGE.to_string())
    }

    pub fn container_prefix(&self) -> String {
        env::var(TASKBOX_CONTAINER_PREFIX)
            .ok()
            .or_else(|| self.container_prefix.clone())
            .unwrap_or_else(|| DEFAULT_CONTAINER_PREFIX.to_string())
    }

    pub fn default_agent(&self) -> String {
        env::var(TASKBOX_AGENT)
            .ok()
            .or_else(|| self.default_agent.clone())
            .unwrap_or_else(|| DEFAULT_AGENT.to_string())
    }

    pub fn default_workflow(&self) -> String {
        self.default_workflow
            .clone()
            .unwrap_or_else(|| DEFAULT_WORKFLOW.to_string())
    }

    /// Resolve the custom container environment using the host process environment
    pub fn custom_env(&self, project_root: &Path) -> Result<Vec<(String, String)>> {
        self.custom_env_with(project_root, |key| env::var(key).ok())
    }

    /// Resolve the custom container environment.
    ///
    /// `envsFile` entries come first and explicit `envs` entries after them, so an
    /// explicit entry overrides the file on key collision.
    pub fn custom_env_with<F>(&self, project_root: &Path, lookup: F) -> Result<Vec<(String, String)>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut resolved: Vec<(String, String)> = Vec::new();

        if let Some(envs_file) = &self.envs_file {
            let path = if envs_file.is_absolute() {
                envs_file.clone()
            } else {
                project_root.join(envs_file)
            };

            let iter = dotenvy::from_path_iter(&path).map_err(|e| ConfigError::EnvsFile {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

            for item in iter {
                let (key, value) = item.map_err(|e| ConfigError::EnvsFile {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
                upsert(&mut resolved, key, value);
            }
        }

        for entry in &self.envs {
            match parse_env_entry(entry)? {
                (key, Some(value)) => upsert(&mut resolved, key, value),
                (key, None) => match lookup(&key) {
                    Some(value) => upsert(&mut resolved, key, value),
                    None => debug!("Skipping env {}: not set on the host", key),
                },
            }
        }

        Ok(resolved)
    }
}

/// Split `KEY=VALUE` (value may contain `=`) or bare `KEY`
pub fn parse_env_entry(entry: &str) -> Result<(String, Option<String>)> {
    let entry = entry.trim();
    let (key, value) = match entry.split_once('=') {
        Some((key, value)) => (key.trim(), Some(value.to_string())),
        None => (entry, None),
    };

    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return Err(ConfigError::InvalidEnvEntry(entry.to_string()));
    }

    Ok((key.to_string(), value))
}

fn upsert(resolved: &mut Vec<(String, String)>, key: String, value: String) {
    match resolved.iter_mut().find(|(existing, _)| *existing == key) {
        Some(slot) => slot.1 = value,
        None => resolved.push((key, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let config = ProjectConfig::load(temp.path()).unwrap();
        assert_eq!(config, ProjectConfig::default());
        assert_eq!(config.default_workflow(), "swe");
    }

    #[test]
    fn test_load_camel_case_config() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("taskbox.json"),
            r#"{ "envs": ["FOO=1"], "envsFile": ".env.sandbox", "image": "rust:1", "containerPrefix": "tb" }"#,
        )
        .unwrap();

        let config = ProjectConfig::load(temp.path()).unwrap();
        assert_eq!(config.envs, vec!["FOO=1".to_string()]);
        assert_eq!(config.envs_file, Some(PathBuf::from(".env.sandbox")));
        assert_eq!(config.image.as_deref(), Some("rust:1"));
        assert_eq!(config.container_prefix.as_deref(), Some("tb"));
        assert!(config.mcp_servers.is_empty());
    }

    #[test]
    fn test_load_mcp_servers() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("taskbox.json"),
            r#"{ "mcpServers": { "docs": { "command": "docs-mcp", "args": ["--stdio"] } } }"#,
        )
        .unwrap();

        let config = ProjectConfig::load(temp.path()).unwrap();
        let docs = &config.mcp_servers["docs"];
        assert_eq!(docs.command, "docs-mcp");
        assert_eq!(docs.args, vec!["--stdio".to_string()]);
        assert!(docs.env.is_empty());
    }

    #[test]
    fn test_malformed_config_is_parse_error() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("taskbox.json"), "{ not json").unwrap();
        assert!(matches!(
            ProjectConfig::load(temp.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[rstest]
    #[case("FOO=bar", "FOO", Some("bar"))]
    #[case("URL=a=b", "URL", Some("a=b"))]
    #[case("EMPTY=", "EMPTY", Some(""))]
    #[case("TOKEN", "TOKEN", None)]
    fn test_parse_env_entry(
        #[case] entry: &str,
        #[case] key: &str,
        #[case] value: Option<&str>,
    ) {
        let (parsed_key, parsed_value) = parse_env_entry(entry).unwrap();
        assert_eq!(parsed_key, key);
        assert_eq!(parsed_value.as_deref(), value);
    }

    #[rstest]
    #[case("")]
    #[case("=value")]
    #[case("BAD KEY=1")]
    fn test_parse_env_entry_rejects_invalid(#[case] entry: &str) {
        assert!(parse_env_entry(entry).is_err());
    }

    #[test]
    fn test_explicit_envs_override_envs_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(".env.sandbox"), "FOO=from-file\nBAR=kept\n").unwrap();

        let config = ProjectConfig {
            envs: vec!["FOO=explicit".to_string(), "HOST_ONLY".to_string(), "UNSET".to_string()],
            envs_file: Some(PathBuf::from(".env.sandbox")),
            ..Default::default()
        };

        let resolved = config
            .custom_env_with(temp.path(), |key| {
                (key == "HOST_ONLY").then(|| "from-host".to_string())
            })
            .unwrap();

        assert_eq!(
            resolved,
            vec![
                ("FOO".to_string(), "explicit".to_string()),
                ("BAR".to_string(), "kept".to_string()),
                ("HOST_ONLY".to_string(), "from-host".to_string()),
            ]
        );
    }

    #[test]
    fn test_missing_envs_file_is_error() {
        let temp = TempDir::new().unwrap();
        let config = ProjectConfig {
            envs_file: Some(PathBuf::from("missing.env")),
            ..Default::default()
        };
        assert!(matches!(
            config.custom_env_with(temp.path(), |_| None),
            Err(ConfigError::EnvsFile { .. })
        ));
    }
}
