// ABOUTME: Interactive shell into a task's running sandbox or, failing that, its worktree
// ABOUTME: The container case goes through the selected backend's own CLI with `exec -it`

use crate::Result;
use std::path::PathBuf;
use std::process::Stdio;
use taskbox_core::constants::CONTAINER_WORKSPACE;
use taskbox_sandbox::Backend;
use tokio::process::Command;
use tracing::info;

const FALLBACK_SHELL: &str = "/bin/sh";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellTarget {
    Container { backend: Backend, container: String },
    Worktree(PathBuf),
}

impl ShellTarget {
    /// Command that opens the session; `user_shell` is used for the worktree case
    pub fn command(&self, user_shell: Option<String>) -> Command {
        match self {
            ShellTarget::Container { backend, container } => {
                let mut command = Command::new(backend.command());
                command.args([
                    "exec",
                    "-it",
                    "-w",
                    CONTAINER_WORKSPACE,
                    container.as_str(),
                    FALLBACK_SHELL,
                ]);
                command
            }
            ShellTarget::Worktree(path) => {
                let shell = user_shell
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| FALLBACK_SHELL.to_string());
                let mut command = Command::new(shell);
                command.current_dir(path);
                command
            }
        }
    }

    /// Run the session attached to the current terminal and return its exit code
    pub async fn open(&self, user_shell: Option<String>) -> Result<i32> {
        info!("Opening shell: {:?}", self);
        let status = self
            .command(user_shell)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await?;
        Ok(status.code().unwrap_or(1))
    }
}
