// ABOUTME: Project configuration and environment variable management for Taskbox
// ABOUTME: Loads taskbox.json and resolves custom container environment from envs and envsFile

pub mod constants;
pub mod project;

pub use project::{parse_env_entry, McpServerConfig, ProjectConfig};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to load envs file {path}: {message}")]
    EnvsFile { path: String, message: String },

    #[error("Invalid environment entry '{0}': expected KEY or KEY=VALUE")]
    InvalidEnvEntry(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
