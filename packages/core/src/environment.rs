// ABOUTME: Explicit execution context threaded into every component constructor
// ABOUTME: Holds the project root, verbosity and output mode, and derives the task directory layout

use crate::constants::{
    DESCRIPTION_FILE, ITERATIONS_DIR, ITERATION_FILE, MAX_PARENT_SEARCH_DEPTH, STATUS_FILE,
    TASKS_DIR, WORKSPACE_DIR,
};
use crate::validation::CoreError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Process-wide settings, passed explicitly instead of living in globals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    project_root: PathBuf,
    verbose: bool,
    json: bool,
}

impl Environment {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            verbose: false,
            json: false,
        }
    }

    /// Find the project root by walking up from `start` until a `.git` entry shows up
    pub fn discover(start: &Path) -> Result<Self, CoreError> {
        let mut search_dir = start.to_path_buf();
        for _ in 0..MAX_PARENT_SEARCH_DEPTH {
            if search_dir.join(".git").exists() {
                debug!("Discovered project root at {}", search_dir.display());
                return Ok(Self::new(search_dir));
            }
            if !search_dir.pop() {
                break;
            }
        }

        Err(CoreError::ProjectNotFound(start.display().to_string()))
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn json(&self) -> bool {
        self.json
    }

    /// `<project>/.tasks`
    pub fn tasks_root(&self) -> PathBuf {
        self.project_root.join(TASKS_DIR)
    }

    /// `<project>/.tasks/<id>`
    pub fn task_dir(&self, task_id: u64) -> PathBuf {
        self.tasks_root().join(task_id.to_string())
    }

    pub fn description_file(&self, task_id: u64) -> PathBuf {
        self.task_dir(task_id).join(DESCRIPTION_FILE)
    }

    pub fn workspace_dir(&self, task_id: u64) -> PathBuf {
        self.task_dir(task_id).join(WORKSPACE_DIR)
    }

    pub fn iterations_dir(&self, task_id: u64) -> PathBuf {
        self.task_dir(task_id).join(ITERATIONS_DIR)
    }

    /// `<project>/.tasks/<id>/iterations/<n>`
    pub fn iteration_dir(&self, task_id: u64, iteration: u32) -> PathBuf {
        self.iterations_dir(task_id).join(iteration.to_string())
    }

    pub fn iteration_file(&self, task_id: u64, iteration: u32) -> PathBuf {
        self.iteration_dir(task_id, iteration).join(ITERATION_FILE)
    }

    pub fn status_file(&self, task_id: u64, iteration: u32) -> PathBuf {
        self.iteration_dir(task_id, iteration).join(STATUS_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_is_deterministic() {
        let env = Environment::new("/repo");

        assert_eq!(env.task_dir(7), PathBuf::from("/repo/.tasks/7"));
        assert_eq!(
            env.description_file(7),
            PathBuf::from("/repo/.tasks/7/description.json")
        );
        assert_eq!(
            env.workspace_dir(7),
            PathBuf::from("/repo/.tasks/7/workspace")
        );
        assert_eq!(
            env.status_file(7, 2),
            PathBuf::from("/repo/.tasks/7/iterations/2/status.json")
        );
    }

    #[test]
    fn test_discover_walks_up_to_git_root() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join(".git")).unwrap();
        let nested = temp.path().join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();

        let env = Environment::discover(&nested).unwrap();
        assert_eq!(env.project_root(), temp.path());
    }

    #[test]
    fn test_discover_without_repository_fails() {
        let temp = TempDir::new().unwrap();
        let result = Environment::discover(temp.path());
        assert!(matches!(result, Err(CoreError::ProjectNotFound(_))));
    }

    #[test]
    fn test_flags() {
        let env = Environment::new("/repo").with_verbose(true).with_json(true);
        assert!(env.verbose());
        assert!(env.json());
    }
}
