// ABOUTME: Workspace management for Taskbox tasks: one git worktree and branch per task
// ABOUTME: Creation fails loudly on bad refs while teardown is best-effort and reports warnings

pub mod worktree;

pub use worktree::{changed_files, GitWorktrees, Worktrees};

#[cfg(test)]
pub use worktree::MockWorktrees;

use serde::Serialize;
use std::path::PathBuf;
use taskbox_core::constants::TASKS_DIR;
use taskbox_core::Environment;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum GitError {
    #[error("Failed to open git repository {0}")]
    Open(String),

    #[error("Repository has no commits; create an initial commit before starting a task")]
    NoCommits,

    #[error("Branch or commit '{0}' not found")]
    RefNotFound(String),

    #[error("Worktree operation failed: {0}")]
    Worktree(String),

    #[error("Branch operation failed: {0}")]
    Branch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
}

pub type Result<T> = std::result::Result<T, GitError>;

/// Outcome of a best-effort workspace teardown
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub worktree_removed: bool,
    pub branch_deleted: bool,
    pub warnings: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Branch a task works on unless one is given explicitly
pub fn default_branch_name(task_id: u64) -> String {
    format!("taskbox/task-{}", task_id)
}

/// Owns the `.tasks/<id>` layout and the worktree/branch pair of each task
pub struct WorkspaceManager<W: Worktrees = GitWorktrees> {
    env: Environment,
    worktrees: W,
}

impl WorkspaceManager<GitWorktrees> {
    pub fn open(env: Environment) -> Self {
        let worktrees = GitWorktrees::new(env.project_root());
        Self { env, worktrees }
    }
}

impl<W: Worktrees> WorkspaceManager<W> {
    pub fn with_worktrees(env: Environment, worktrees: W) -> Self {
        Self { env, worktrees }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn task_directory(&self, task_id: u64) -> PathBuf {
        self.env.task_dir(task_id)
    }

    pub fn iteration_directory(&self, task_id: u64, iteration: u32) -> PathBuf {
        self.env.iteration_dir(task_id, iteration)
    }

    pub fn worktree_path(&self, task_id: u64) -> PathBuf {
        self.env.workspace_dir(task_id)
    }

    fn worktree_name(task_id: u64) -> String {
        format!("task-{}", task_id)
    }

    /// Check out `target_branch` (created from `source_branch`, HEAD by default) under
    /// `.tasks/<id>/workspace`
    pub fn create_worktree(
        &self,
        task_id: u64,
        source_branch: Option<&str>,
        target_branch: &str,
    ) -> Result<PathBuf> {
        let path = self.worktree_path(task_id);
        self.worktrees.add_worktree(
            &Self::worktree_name(task_id),
            &path,
            source_branch.map(str::to_string),
            target_branch,
        )?;
        Ok(path)
    }

    /// Remove the task's worktree and branch. Both are attempted regardless of each
    /// other's outcome; failures end up in the report, never as an error.
    pub fn remove_worktree_and_branch(&self, task_id: u64, branch: Option<&str>) -> CleanupReport {
        let mut report = CleanupReport::default();
        let path = self.worktree_path(task_id);

        match self
            .worktrees
            .remove_worktree(&Self::worktree_name(task_id), &path)
        {
            Ok(()) => report.worktree_removed = true,
            Err(e) => {
                warn!("Failed to remove worktree for task {}: {}", task_id, e);
                report
                    .warnings
                    .push(format!("worktree {}: {}", path.display(), e));
            }
        }

        match branch {
            Some(branch) => match self.worktrees.delete_branch(branch) {
                Ok(()) => report.branch_deleted = true,
                Err(e) => {
                    warn!("Failed to delete branch {} for task {}: {}", branch, task_id, e);
                    report.warnings.push(format!("branch {}: {}", branch, e));
                }
            },
            None => report.branch_deleted = true,
        }

        if report.is_clean() {
            info!("Removed workspace for task {}", task_id);
        }
        report
    }
}

impl WorkspaceManager<GitWorktrees> {
    /// Make sure task directories never show up as untracked files in the main checkout
    pub fn ensure_tasks_excluded(&self) -> Result<()> {
        self.worktrees.ensure_excluded(&format!("{}/", TASKS_DIR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn env() -> Environment {
        Environment::new("/repo")
    }

    #[test]
    fn test_layout_paths() {
        let manager = WorkspaceManager::with_worktrees(env(), MockWorktrees::new());
        assert_eq!(manager.task_directory(7), Path::new("/repo/.tasks/7"));
        assert_eq!(
            manager.iteration_directory(7, 2),
            Path::new("/repo/.tasks/7/iterations/2")
        );
        assert_eq!(manager.worktree_path(7), Path::new("/repo/.tasks/7/workspace"));
        assert_eq!(default_branch_name(7), "taskbox/task-7");
    }

    #[test]
    fn test_create_worktree_passes_source_and_target() {
        let mut mock = MockWorktrees::new();
        mock.expect_add_worktree()
            .withf(|name, path, source, branch| {
                name == "task-3"
                    && path == Path::new("/repo/.tasks/3/workspace")
                    && source.as_deref() == Some("main")
                    && branch == "feature/x"
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let manager = WorkspaceManager::with_worktrees(env(), mock);
        let path = manager.create_worktree(3, Some("main"), "feature/x").unwrap();
        assert_eq!(path, Path::new("/repo/.tasks/3/workspace"));
    }

    #[test]
    fn test_branch_deleted_even_when_worktree_removal_fails() {
        let mut mock = MockWorktrees::new();
        mock.expect_remove_worktree()
            .times(1)
            .returning(|_, _| Err(GitError::Worktree("permission denied".to_string())));
        mock.expect_delete_branch()
            .withf(|branch| branch == "taskbox/task-9")
            .times(1)
            .returning(|_| Ok(()));

        let manager = WorkspaceManager::with_worktrees(env(), mock);
        let report = manager.remove_worktree_and_branch(9, Some("taskbox/task-9"));

        assert!(!report.worktree_removed);
        assert!(report.branch_deleted);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("permission denied"));
    }

    #[test]
    fn test_cleanup_without_branch_only_touches_worktree() {
        let mut mock = MockWorktrees::new();
        mock.expect_remove_worktree().times(1).returning(|_, _| Ok(()));
        mock.expect_delete_branch().never();

        let manager = WorkspaceManager::with_worktrees(env(), mock);
        let report = manager.remove_worktree_and_branch(4, None);
        assert!(report.is_clean());
        assert!(report.worktree_removed);
    }
}
