// ABOUTME: File-backed task store under <project>/.tasks
// ABOUTME: One description.json per task plus an iteration.json per numbered iteration

use crate::{Result, TaskError};
use std::fs;
use std::io::ErrorKind;
use taskbox_core::{read_json, write_json_atomic, CoreError, Environment, Iteration, Task};
use tracing::{debug, warn};

pub struct TaskStore {
    env: Environment,
}

impl TaskStore {
    pub fn new(env: Environment) -> Self {
        Self { env }
    }

    fn task_ids(&self) -> Result<Vec<u64>> {
        let root = self.env.tasks_root();
        let entries = match fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids: Vec<u64> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .filter(|id| *id > 0)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// One past the highest id present on disk
    pub fn next_id(&self) -> Result<u64> {
        Ok(self.task_ids()?.last().map_or(1, |id| id + 1))
    }

    pub fn exists(&self, task_id: u64) -> bool {
        self.env.description_file(task_id).exists()
    }

    /// Persist a new task; an existing id is rejected
    pub fn insert(&self, task: &Task) -> Result<()> {
        if self.exists(task.id) {
            return Err(TaskError::Validation(format!(
                "task {} already exists",
                task.id
            )));
        }
        self.save(task)
    }

    pub fn save(&self, task: &Task) -> Result<()> {
        task.validate()
            .map_err(|e| TaskError::Validation(e.to_string()))?;
        write_json_atomic(&self.env.description_file(task.id), task)?;
        debug!("Saved task {} ({})", task.id, task.status);
        Ok(())
    }

    pub fn load(&self, task_id: u64) -> Result<Task> {
        let path = self.env.description_file(task_id);
        let task: Task = read_json(&path).map_err(|e| match e {
            CoreError::Io(io) if io.kind() == ErrorKind::NotFound => TaskError::NotFound(task_id),
            CoreError::Io(io) => TaskError::Io(io),
            other => TaskError::Validation(format!("{}: {}", path.display(), other)),
        })?;

        if task.id != task_id {
            return Err(TaskError::Validation(format!(
                "{} holds task {}",
                path.display(),
                task.id
            )));
        }
        task.validate()
            .map_err(|e| TaskError::Validation(format!("{}: {}", path.display(), e)))?;
        Ok(task)
    }

    /// Every readable task ordered by id; broken records are skipped with a warning
    pub fn list(&self) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();
        for id in self.task_ids()? {
            match self.load(id) {
                Ok(task) => tasks.push(task),
                Err(TaskError::NotFound(_)) => {}
                Err(e) => warn!("Skipping task {}: {}", id, e),
            }
        }
        Ok(tasks)
    }

    pub fn remove(&self, task_id: u64) -> Result<()> {
        let dir = self.env.task_dir(task_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save_iteration(&self, task_id: u64, iteration: &Iteration) -> Result<()> {
        write_json_atomic(&self.env.iteration_file(task_id, iteration.number), iteration)?;
        Ok(())
    }

    pub fn load_iteration(&self, task_id: u64, number: u32) -> Result<Iteration> {
        let path = self.env.iteration_file(task_id, number);
        read_json(&path).map_err(|e| match e {
            CoreError::Io(io) => TaskError::Io(io),
            other => TaskError::Validation(format!("{}: {}", path.display(), other)),
        })
    }

    /// Recorded iterations in ascending order
    pub fn iterations(&self, task_id: u64) -> Result<Vec<Iteration>> {
        let entries = match fs::read_dir(self.env.iterations_dir(task_id)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut numbers: Vec<u32> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect();
        numbers.sort_unstable();

        let mut iterations = Vec::new();
        for number in numbers {
            match self.load_iteration(task_id, number) {
                Ok(iteration) => iterations.push(iteration),
                Err(e) => warn!("Skipping iteration {} of task {}: {}", number, task_id, e),
            }
        }
        Ok(iterations)
    }
}
