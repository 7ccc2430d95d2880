// ABOUTME: Low-level git worktree and branch operations backed by libgit2
// ABOUTME: The Worktrees trait isolates repository side effects from cleanup ordering logic

use crate::{GitError, Result};
use git2::{
    BranchType, ErrorCode, Repository, StatusOptions, WorktreeAddOptions, WorktreePruneOptions,
};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Repository operations needed to give each task its own checkout
#[cfg_attr(test, mockall::automock)]
pub trait Worktrees: Send + Sync {
    /// Create `branch` from `source` (HEAD when `None`) and check it out at `path`
    fn add_worktree(&self, name: &str, path: &Path, source: Option<String>, branch: &str)
        -> Result<()>;

    /// Remove the checkout at `path` and prune the worktree metadata registered as `name`
    fn remove_worktree(&self, name: &str, path: &Path) -> Result<()>;

    /// Delete a local branch; deleting a missing branch is not an error
    fn delete_branch(&self, branch: &str) -> Result<()>;
}

/// `Worktrees` implementation operating on the repository at the project root
pub struct GitWorktrees {
    repo_path: PathBuf,
}

impl GitWorktrees {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    fn open(&self) -> Result<Repository> {
        Repository::open(&self.repo_path).map_err(|e| {
            GitError::Open(format!("{}: {}", self.repo_path.display(), e.message()))
        })
    }

    /// Keep task directories out of `git status` in the main checkout
    pub fn ensure_excluded(&self, pattern: &str) -> Result<()> {
        let repo = self.open()?;
        let exclude_path = repo.path().join("info").join("exclude");

        let existing = fs::read_to_string(&exclude_path).unwrap_or_default();
        if existing.lines().any(|line| line.trim() == pattern) {
            return Ok(());
        }

        if let Some(parent) = exclude_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&exclude_path)?;
        if !existing.is_empty() && !existing.ends_with('\n') {
            writeln!(file)?;
        }
        writeln!(file, "{}", pattern)?;
        debug!("Added {} to {}", pattern, exclude_path.display());
        Ok(())
    }

    fn prune_worktree(&self, name: &str) -> std::result::Result<(), String> {
        let repo = self.open().map_err(|e| e.to_string())?;
        let result = match repo.find_worktree(name) {
            Ok(worktree) => {
                let mut prune = WorktreePruneOptions::new();
                prune.valid(true).locked(true).working_tree(true);
                worktree
                    .prune(Some(&mut prune))
                    .map(|_| debug!("Pruned worktree metadata for {}", name))
                    .map_err(|e| format!("failed to prune {}: {}", name, e.message()))
            }
            Err(e) if e.code() == ErrorCode::NotFound => {
                debug!("Worktree {} already pruned", name);
                Ok(())
            }
            Err(e) => {
                warn!("Could not look up worktree {}: {}", name, e);
                Err(format!("failed to look up {}: {}", name, e.message()))
            }
        };
        result
    }
}

impl Worktrees for GitWorktrees {
    fn add_worktree(
        &self,
        name: &str,
        path: &Path,
        source: Option<String>,
        branch: &str,
    ) -> Result<()> {
        let repo = self.open()?;

        // A worktree shares history with the main checkout, so there has to be some
        match repo.head() {
            Ok(_) => {}
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                return Err(GitError::NoCommits);
            }
            Err(e) => return Err(GitError::Git(e)),
        }

        let source_ref = source.unwrap_or_else(|| "HEAD".to_string());
        let commit = repo
            .revparse_single(&source_ref)
            .and_then(|object| object.peel_to_commit())
            .map_err(|_| GitError::RefNotFound(source_ref.clone()))?;

        let (branch_ref, created) = match repo.find_branch(branch, BranchType::Local) {
            Ok(existing) => {
                debug!("Reusing existing branch {}", branch);
                (existing, false)
            }
            Err(e) if e.code() == ErrorCode::NotFound => {
                let new_branch = repo
                    .branch(branch, &commit, false)
                    .map_err(|e| GitError::Branch(format!("{}: {}", branch, e.message())))?;
                (new_branch, true)
            }
            Err(e) => return Err(GitError::Git(e)),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let reference = branch_ref.into_reference();
        let mut options = WorktreeAddOptions::new();
        options.reference(Some(&reference));

        if let Err(e) = repo.worktree(name, path, Some(&options)) {
            // Leave nothing behind that could make the task look runnable
            if created {
                if let Ok(mut orphan) = repo.find_branch(branch, BranchType::Local) {
                    let _ = orphan.delete();
                }
            }
            return Err(GitError::Worktree(format!(
                "failed to add worktree at {}: {}",
                path.display(),
                e.message()
            )));
        }

        info!(
            "Created worktree {} on branch {} from {}",
            path.display(),
            branch,
            source_ref
        );
        Ok(())
    }

    fn remove_worktree(&self, name: &str, path: &Path) -> Result<()> {
        let mut failures = Vec::new();
        if path.exists() {
            if let Err(e) = fs::remove_dir_all(path) {
                warn!("Failed to delete {}: {}", path.display(), e);
                failures.push(format!("failed to delete {}: {}", path.display(), e));
            }
        }

        // Stale metadata keeps the branch checked out, so prune even after a failed delete
        if let Err(e) = self.prune_worktree(name) {
            failures.push(e);
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(GitError::Worktree(failures.join("; ")))
        }
    }

    fn delete_branch(&self, branch: &str) -> Result<()> {
        let repo = self.open()?;
        let result = match repo.find_branch(branch, BranchType::Local) {
            Ok(mut found) => found
                .delete()
                .map_err(|e| GitError::Branch(format!("{}: {}", branch, e.message()))),
            Err(e) if e.code() == ErrorCode::NotFound => {
                debug!("Branch {} already deleted", branch);
                Ok(())
            }
            Err(e) => Err(GitError::Git(e)),
        };
        result
    }
}

/// Paths with uncommitted changes (including untracked files) inside a checkout
pub fn changed_files(checkout: &Path) -> Result<Vec<String>> {
    let repo = Repository::open(checkout)
        .map_err(|e| GitError::Open(format!("{}: {}", checkout.display(), e.message())))?;

    let mut options = StatusOptions::new();
    options.include_untracked(true).recurse_untracked_dirs(true);

    let statuses = repo.statuses(Some(&mut options))?;
    Ok(statuses
        .iter()
        .filter_map(|entry| entry.path().map(|p| p.to_string()))
        .collect())
}
