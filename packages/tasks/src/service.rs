// ABOUTME: Task lifecycle service: create, run, stop, restart, iterate, delete and inspection
// ABOUTME: Each operation loads the task record, drives the components in order and saves it back

use crate::reporter::LogReporter;
use crate::shell::ShellTarget;
use crate::store::TaskStore;
use crate::{Result, TaskError};
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use taskbox_agents::{AgentError, AgentRegistry, CliAgent, McpServer, SandboxAgent};
use taskbox_config::constants::{SHELL, TASKBOX_BACKEND};
use taskbox_config::ProjectConfig;
use taskbox_core::constants::CONTAINER_LOG_FILE;
use taskbox_core::validation::truncate;
use taskbox_core::{Environment, Iteration, Task, TaskStatus};
use taskbox_executions::{IterationStatus, IterationStatusManager, StatusError};
use taskbox_git_utils::{changed_files, default_branch_name, CleanupReport, WorkspaceManager};
use taskbox_sandbox::{
    container_name, select_backend, Backend, BackendRegistry, ContainerBackend,
    ContainerExecutor, HostIds, ProgressReporter, SandboxController, SandboxRequest,
    TeardownReport,
};
use taskbox_workflows::{RunResult, ShellStepExecutor, Workflow, WorkflowRunner};
use tracing::{debug, info, warn};

const TITLE_MAX_CHARS: usize = 60;
const PROVISION_STEP: &str = "Provision sandbox";

#[derive(Debug, Clone, Default)]
pub struct CreateTaskOptions {
    pub title: Option<String>,
    pub description: String,
    pub agent: Option<String>,
    pub workflow: Option<String>,
    pub source_branch: Option<String>,
    pub branch: Option<String>,
    pub task_id: Option<u64>,
    pub inputs: BTreeMap<String, String>,
    pub no_run: bool,
}

/// What `stop` tears down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovalScope {
    pub container: bool,
    pub worktree: bool,
}

impl RemovalScope {
    pub const CONTAINER: RemovalScope = RemovalScope {
        container: true,
        worktree: false,
    };
    pub const ALL: RemovalScope = RemovalScope {
        container: true,
        worktree: true,
    };
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<TeardownReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<CleanupReport>,
    pub warnings: Vec<String>,
}

impl StopReport {
    /// Every warning from the container and workspace steps
    pub fn all_warnings(&self) -> Vec<String> {
        let mut warnings = self.warnings.clone();
        if let Some(container) = &self.container {
            warnings.extend(container.warnings.iter().cloned());
        }
        if let Some(workspace) = &self.workspace {
            warnings.extend(workspace.warnings.iter().cloned());
        }
        warnings
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRun {
    pub task: Task,
    pub result: RunResult,
    pub teardown: TeardownReport,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDetails {
    pub task: Task,
    pub iterations: Vec<Iteration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_status: Option<IterationStatus>,
    /// Set when the latest status file exists but is not a valid record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_error: Option<String>,
    pub changed_files: Vec<String>,
}

pub struct TaskService {
    env: Environment,
    config: ProjectConfig,
    store: TaskStore,
    workspace: WorkspaceManager,
    agents: AgentRegistry,
    backends: BackendRegistry,
    preferred_backend: Option<Backend>,
    host_ids: Option<HostIds>,
    ready_timeout: Option<(Duration, Duration)>,
    reporter: Arc<dyn ProgressReporter>,
}

impl TaskService {
    /// Service for the project at `env`, with engine backends and `TASKBOX_BACKEND`
    /// taken from the host
    pub fn open(env: Environment) -> Result<Self> {
        let config = ProjectConfig::load(env.project_root())?;
        let preferred = match std::env::var(TASKBOX_BACKEND) {
            Ok(value) if !value.trim().is_empty() => {
                Some(value.trim().parse::<Backend>().map_err(TaskError::Validation)?)
            }
            _ => None,
        };
        Ok(Self::with_parts(env, config, BackendRegistry::detect())?
            .with_preferred_backend(preferred))
    }

    pub fn with_parts(
        env: Environment,
        config: ProjectConfig,
        backends: BackendRegistry,
    ) -> Result<Self> {
        Ok(Self {
            store: TaskStore::new(env.clone()),
            workspace: WorkspaceManager::open(env.clone()),
            agents: AgentRegistry::new()?,
            env,
            config,
            backends,
            preferred_backend: None,
            host_ids: None,
            ready_timeout: None,
            reporter: Arc::new(LogReporter),
        })
    }

    pub fn with_preferred_backend(mut self, backend: Option<Backend>) -> Self {
        self.preferred_backend = backend;
        self
    }

    pub fn with_host_ids(mut self, host_ids: HostIds) -> Self {
        self.host_ids = Some(host_ids);
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration, poll: Duration) -> Self {
        self.ready_timeout = Some((timeout, poll));
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    fn controller(&self, backend: Arc<dyn ContainerBackend>) -> SandboxController {
        let mut controller = SandboxController::new(self.env.clone(), backend);
        if let Some(host_ids) = self.host_ids {
            controller = controller.with_host_ids(host_ids);
        }
        if let Some((timeout, poll)) = self.ready_timeout {
            controller = controller.with_ready_timeout(timeout, poll);
        }
        controller
    }

    async fn backend(&self) -> Result<Arc<dyn ContainerBackend>> {
        Ok(select_backend(&self.backends, self.preferred_backend).await?)
    }

    /// Container name or id to address for the task's current iteration
    fn container_ref(&self, task: &Task) -> String {
        task.container_id.clone().unwrap_or_else(|| {
            container_name(
                &self.config.container_prefix(),
                task.id,
                task.iteration.max(1),
            )
        })
    }

    /// Record a task and create its worktree; runs the first iteration unless `no_run`
    pub async fn create(&self, options: CreateTaskOptions) -> Result<Task> {
        let description = options.description.trim().to_string();
        if description.is_empty() {
            return Err(TaskError::Validation(
                "task description must not be empty".to_string(),
            ));
        }

        let id = match options.task_id {
            Some(0) => {
                return Err(TaskError::Validation(
                    "task id must be a positive integer".to_string(),
                ))
            }
            Some(id) => id,
            None => self.store.next_id()?,
        };

        let agent = options
            .agent
            .unwrap_or_else(|| self.config.default_agent());
        self.agents.validate_agent_id(&agent)?;

        let workflow = options
            .workflow
            .unwrap_or_else(|| self.config.default_workflow());
        let definition = Workflow::resolve(&workflow, self.env.project_root())?;

        let title = options
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| {
                truncate(description.lines().next().unwrap_or_default(), TITLE_MAX_CHARS)
            });

        let mut task = Task::new(id, title, description, agent, workflow);
        task.source_branch = options.source_branch;
        task.inputs = options.inputs;
        definition
            .resolve_inputs(&self.workflow_inputs(&task, &task.description))
            .map_err(|e| TaskError::Validation(e.to_string()))?;
        self.store.insert(&task)?;
        info!("Created task {}: {}", task.id, task.title);

        let branch = options
            .branch
            .unwrap_or_else(|| default_branch_name(id));
        let created = self.workspace.ensure_tasks_excluded().and_then(|_| {
            self.workspace
                .create_worktree(id, task.source_branch.as_deref(), &branch)
        });
        match created {
            Ok(path) => task.set_workspace(branch, path),
            Err(e) => {
                task.mark_failed(e.to_string());
                self.store.save(&task)?;
                return Err(e.into());
            }
        }
        self.store.save(&task)?;

        if options.no_run {
            return Ok(task);
        }
        Ok(self.run(id).await?.task)
    }

    /// Provision the sandbox, run the workflow for the current iteration, then tear down
    pub async fn run(&self, task_id: u64) -> Result<TaskRun> {
        let mut task = self.store.load(task_id)?;
        if task.status.is_active() {
            return Err(TaskError::InvalidState {
                id: task_id,
                status: task.status,
                operation: "run",
            });
        }

        if let Err(e) = self.ensure_workspace(&mut task) {
            task.mark_failed(e.to_string());
            self.store.save(&task)?;
            return Err(e);
        }
        let iteration = self.current_iteration(&mut task)?;
        task.set_status(if iteration.number > 1 {
            TaskStatus::Iterating
        } else {
            TaskStatus::InProgress
        });
        task.container_id = None;
        self.store.save(&task)?;

        match self.execute(&mut task, &iteration).await {
            Ok((result, teardown)) => {
                let current = self.store.load(task_id)?;
                if current.status == TaskStatus::Stopped {
                    info!("Task {} was stopped during the run", task_id);
                    task = current;
                } else if result.overall_success {
                    task.set_status(TaskStatus::Completed);
                } else {
                    task.mark_failed(
                        result
                            .failure_summary()
                            .unwrap_or_else(|| "workflow failed".to_string()),
                    );
                }
                if teardown.removed {
                    task.container_id = None;
                }
                self.store.save(&task)?;
                info!("Task {} finished: {}", task_id, task.status);
                Ok(TaskRun {
                    task,
                    result,
                    teardown,
                })
            }
            Err(e) => {
                task.mark_failed(e.to_string());
                self.store.save(&task)?;
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        task: &mut Task,
        iteration: &Iteration,
    ) -> Result<(RunResult, TeardownReport)> {
        let workflow = Workflow::resolve(&task.workflow, self.env.project_root())?;
        let inputs = self.workflow_inputs(task, &iteration.instructions);

        let definition = self
            .agents
            .get(&task.agent)
            .ok_or_else(|| AgentError::NotFound(task.agent.clone()))?
            .clone();
        let mut agent = CliAgent::from_host(definition);
        self.configure_mcp(&mut agent);

        let custom_env = self.config.custom_env(self.env.project_root())?;
        let request = SandboxRequest {
            task_id: task.id,
            iteration: iteration.number,
            image: self.config.image(),
            container_prefix: self.config.container_prefix(),
            custom_env,
            workflow_yaml: Some(workflow.to_yaml()?),
            inputs: inputs.clone(),
        };

        let status_path = self.env.status_file(task.id, iteration.number);
        let mut status =
            IterationStatusManager::create_initial(&status_path, task.id, PROVISION_STEP);

        let backend = match self.backend().await {
            Ok(backend) => backend,
            Err(e) => {
                status.fail(PROVISION_STEP, e.to_string());
                return Err(e);
            }
        };
        let controller = self.controller(backend.clone());
        let handle = match controller
            .create_and_start(&request, &agent, Some(self.reporter.as_ref()))
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                status.fail(PROVISION_STEP, e.to_string());
                return Err(e.into());
            }
        };

        task.container_id = Some(handle.container_id.clone());
        self.store.save(task)?;

        let executor = Arc::new(ContainerExecutor::new(
            backend.clone(),
            handle.container_id.clone(),
        ));
        let agent = agent.with_executor(executor.clone());
        let mut runner = WorkflowRunner::new(Arc::new(agent))
            .with_commands(Arc::new(ShellStepExecutor::new(executor)))
            .with_output_dir(&iteration.output_directory)
            .with_status(status);
        let result = runner.run(&workflow, &inputs).await;

        self.save_container_log(
            backend.as_ref(),
            &handle.container_id,
            &iteration.output_directory,
        )
        .await;
        let teardown = controller
            .stop_and_remove(&handle.container_id, Some(self.reporter.as_ref()))
            .await;

        Ok((result, teardown))
    }

    /// Caller inputs plus `task`, `title` and `instructions` (empty on the first iteration)
    fn workflow_inputs(&self, task: &Task, instructions: &str) -> BTreeMap<String, String> {
        let mut inputs = task.inputs.clone();
        inputs.insert("task".to_string(), task.description.clone());
        inputs.insert("title".to_string(), task.title.clone());
        let instructions = if instructions != task.description {
            instructions.to_string()
        } else {
            String::new()
        };
        inputs.insert("instructions".to_string(), instructions);
        inputs
    }

    fn configure_mcp(&self, agent: &mut CliAgent) {
        if self.config.mcp_servers.is_empty() {
            return;
        }
        let servers = self
            .config
            .mcp_servers
            .iter()
            .map(|(name, server)| McpServer {
                name: name.clone(),
                command: server.command.clone(),
                args: server.args.clone(),
                env: server.env.clone(),
            })
            .collect();
        if let Err(e) = agent.configure_mcp(servers) {
            warn!("Ignoring configured MCP servers: {}", e);
        }
    }

    async fn save_container_log(
        &self,
        backend: &dyn ContainerBackend,
        container: &str,
        dir: &Path,
    ) {
        match backend.logs(container).await {
            Ok(logs) => {
                let path = dir.join(CONTAINER_LOG_FILE);
                if let Err(e) = fs::write(&path, logs) {
                    warn!("Failed to save {}: {}", path.display(), e);
                }
            }
            Err(e) => warn!("Failed to read logs of {}: {}", container, e),
        }
    }

    /// Recreate the worktree when it is missing, keeping the recorded branch
    fn ensure_workspace(&self, task: &mut Task) -> Result<()> {
        let path = self.workspace.worktree_path(task.id);
        if task.has_workspace() && path.is_dir() {
            return Ok(());
        }

        let branch = task
            .branch_name()
            .map(str::to_string)
            .unwrap_or_else(|| default_branch_name(task.id));
        info!("Creating worktree for task {} on {}", task.id, branch);
        self.workspace.ensure_tasks_excluded()?;
        let created = self
            .workspace
            .create_worktree(task.id, task.source_branch.as_deref(), &branch)?;
        task.set_workspace(branch, created);
        Ok(())
    }

    fn current_iteration(&self, task: &mut Task) -> Result<Iteration> {
        if task.iteration > 0 {
            match self.store.load_iteration(task.id, task.iteration) {
                Ok(iteration) => return Ok(iteration),
                Err(e) => warn!(
                    "Recreating iteration {} of task {}: {}",
                    task.iteration, task.id, e
                ),
            }
        }

        let number = task.iteration.max(1);
        let iteration = Iteration::new(
            number,
            task.description.clone(),
            self.env.iteration_dir(task.id, number),
        );
        self.store.save_iteration(task.id, &iteration)?;
        task.iteration = number;
        Ok(iteration)
    }

    /// Best-effort teardown; nothing here fails the caller
    async fn teardown(&self, task: &Task, scope: RemovalScope) -> StopReport {
        let mut report = StopReport::default();

        if scope.container && (task.iteration > 0 || task.container_id.is_some()) {
            match self.backend().await {
                Ok(backend) => {
                    let target = self.container_ref(task);
                    let controller = self.controller(backend);
                    report.container = Some(
                        controller
                            .stop_and_remove(&target, Some(self.reporter.as_ref()))
                            .await,
                    );
                }
                Err(e) => {
                    warn!("Skipping container teardown for task {}: {}", task.id, e);
                    report.warnings.push(format!("container: {}", e));
                }
            }
        }

        if scope.worktree {
            report.workspace = Some(
                self.workspace
                    .remove_worktree_and_branch(task.id, task.branch_name()),
            );
        }

        report
    }

    /// Tear down the requested resources and mark a live task stopped
    pub async fn stop(&self, task_id: u64, scope: RemovalScope) -> Result<StopReport> {
        let mut task = self.store.load(task_id)?;
        let report = self.teardown(&task, scope).await;

        if report.container.as_ref().is_some_and(|c| c.removed) {
            task.container_id = None;
        }
        // Keep the record while anything is left so a later delete retries it
        if report
            .workspace
            .as_ref()
            .is_some_and(|w| w.worktree_removed && w.branch_deleted)
        {
            task.clear_workspace();
        }
        if task.status.is_active() || task.status == TaskStatus::New {
            task.set_status(TaskStatus::Stopped);
        }
        self.store.save(&task)?;

        info!("Stopped task {}", task_id);
        Ok(report)
    }

    pub async fn restart(&self, task_id: u64) -> Result<TaskRun> {
        let task = self.store.load(task_id)?;
        if !task.status.is_restartable() {
            return Err(TaskError::InvalidState {
                id: task_id,
                status: task.status,
                operation: "restart",
            });
        }

        let leftovers = self.teardown(&task, RemovalScope::CONTAINER).await;
        for warning in leftovers.all_warnings() {
            debug!("Restart cleanup of task {}: {}", task_id, warning);
        }
        self.run(task_id).await
    }

    /// Start a new iteration with follow-up instructions and run it
    pub async fn iterate(&self, task_id: u64, instructions: &str) -> Result<TaskRun> {
        let instructions = instructions.trim();
        if instructions.is_empty() {
            return Err(TaskError::Validation(
                "iteration instructions must not be empty".to_string(),
            ));
        }

        let mut task = self.store.load(task_id)?;
        if task.status.is_active() {
            return Err(TaskError::InvalidState {
                id: task_id,
                status: task.status,
                operation: "iterate",
            });
        }

        let number = task.iteration + 1;
        let iteration = Iteration::new(
            number,
            instructions,
            self.env.iteration_dir(task_id, number),
        );
        self.store.save_iteration(task_id, &iteration)?;
        task.iteration = number;
        task.container_id = None;
        self.store.save(&task)?;
        info!("Task {} iteration {}", task_id, number);

        self.run(task_id).await
    }

    /// Remove everything the task owns, then its directory
    pub async fn delete(&self, task_id: u64) -> Result<StopReport> {
        let task = self.store.load(task_id)?;
        let report = self.teardown(&task, RemovalScope::ALL).await;
        self.store.remove(task_id)?;
        info!("Deleted task {}", task_id);
        Ok(report)
    }

    pub async fn shell_target(&self, task_id: u64) -> Result<ShellTarget> {
        let task = self.store.load(task_id)?;

        if task.iteration > 0 {
            match self.backend().await {
                Ok(backend) => {
                    let container = self.container_ref(&task);
                    if backend.is_running(&container).await.unwrap_or(false) {
                        return Ok(ShellTarget::Container {
                            backend: backend.kind(),
                            container,
                        });
                    }
                }
                Err(e) => debug!("No backend for shell: {}", e),
            }
        }

        let path = self.workspace.worktree_path(task_id);
        if !path.is_dir() {
            return Err(TaskError::Validation(format!(
                "task {} has no running container and no worktree",
                task_id
            )));
        }
        Ok(ShellTarget::Worktree(path))
    }

    /// Open an interactive shell for the task and return its exit code
    pub async fn shell(&self, task_id: u64) -> Result<i32> {
        let target = self.shell_target(task_id).await?;
        target.open(std::env::var(SHELL).ok()).await
    }

    pub fn list(&self) -> Result<Vec<Task>> {
        self.store.list()
    }

    pub fn inspect(&self, task_id: u64) -> Result<TaskDetails> {
        let task = self.store.load(task_id)?;
        let iterations = self.store.iterations(task_id)?;

        let mut latest_status = None;
        let mut status_error = None;
        if task.iteration > 0 {
            match IterationStatusManager::load(&self.env.status_file(task_id, task.iteration)) {
                Ok(status) => latest_status = Some(status),
                Err(StatusError::Load { .. }) => {}
                Err(e @ StatusError::Validation { .. }) => status_error = Some(e.to_string()),
            }
        }

        let worktree = self.workspace.worktree_path(task_id);
        let changed = if worktree.is_dir() {
            changed_files(&worktree).unwrap_or_else(|e| {
                warn!("Could not list changes of task {}: {}", task_id, e);
                Vec::new()
            })
        } else {
            Vec::new()
        };

        Ok(TaskDetails {
            task,
            iterations,
            latest_status,
            status_error,
            changed_files: changed,
        })
    }

    async fn running_container(&self, task: &Task) -> Option<(Arc<dyn ContainerBackend>, String)> {
        if task.iteration == 0 {
            return None;
        }
        let backend = match self.backend().await {
            Ok(backend) => backend,
            Err(e) => {
                debug!("No backend for logs: {}", e);
                return None;
            }
        };
        let container = self.container_ref(task);
        if backend.is_running(&container).await.unwrap_or(false) {
            Some((backend, container))
        } else {
            None
        }
    }

    fn saved_log(&self, task: &Task) -> Result<String> {
        let path = self
            .env
            .iteration_dir(task.id, task.iteration.max(1))
            .join(CONTAINER_LOG_FILE);
        match fs::read_to_string(&path) {
            Ok(logs) => Ok(logs),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(TaskError::NoLogs(task.id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Logs of the running container, or the log saved when the last run tore down
    pub async fn logs(&self, task_id: u64) -> Result<String> {
        let task = self.store.load(task_id)?;
        match self.running_container(&task).await {
            Some((backend, container)) => Ok(backend.logs(&container).await?),
            None => self.saved_log(&task),
        }
    }

    /// Live log stream while the container runs; the saved log otherwise
    pub async fn follow_logs(&self, task_id: u64) -> Result<BoxStream<'static, Result<String>>> {
        let task = self.store.load(task_id)?;
        match self.running_container(&task).await {
            Some((backend, container)) => Ok(backend
                .follow_logs(&container)
                .map(|chunk| chunk.map_err(TaskError::from))
                .boxed()),
            None => {
                let logs = self.saved_log(&task)?;
                Ok(stream::iter(vec![Ok(logs)]).boxed())
            }
        }
    }
}
