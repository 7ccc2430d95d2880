// ABOUTME: Sandbox lifecycle controller: provisions and tears down one container per task iteration
// ABOUTME: Every step is reported; a failed create never starts and a failed start leaves nothing behind

use crate::backend::{container_name, Backend, ContainerBackend, ContainerSpec};
use crate::scripts::{
    entrypoint_script, CONTAINER_SUPPORT_DIR, ENTRYPOINT_FILE, INPUTS_FILE, NPM_PREFIX,
    READY_MARKER, SANDBOX_PATH, WORKFLOW_FILE,
};
use crate::user_mapping::{self, HostIds, AGENT_HOME};
use crate::{BackendError, Result, SandboxError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskbox_agents::{MountSpec, SandboxAgent};
use taskbox_core::constants::{CONTAINER_OUTPUT, CONTAINER_WORKSPACE};
use taskbox_core::Environment;
use tracing::{debug, info, warn};

/// Receives step-level progress from provisioning and teardown
pub trait ProgressReporter: Send + Sync {
    fn step_started(&self, step: &str);
    fn step_completed(&self, step: &str);
    fn step_failed(&self, step: &str, error: &str);
}

struct Steps<'a> {
    reporter: Option<&'a dyn ProgressReporter>,
}

impl<'a> Steps<'a> {
    fn start(&self, step: &str) {
        debug!("Sandbox step: {}", step);
        if let Some(reporter) = self.reporter {
            reporter.step_started(step);
        }
    }

    fn finish<T, E: Display>(
        &self,
        step: &str,
        result: std::result::Result<T, E>,
    ) -> std::result::Result<T, E> {
        if let Some(reporter) = self.reporter {
            match &result {
                Ok(_) => reporter.step_completed(step),
                Err(e) => reporter.step_failed(step, &e.to_string()),
            }
        }
        result
    }
}

pub const STEP_RESOLVE_PATHS: &str = "Resolve task paths";
pub const STEP_AGENT: &str = "Collect agent requirements";
pub const STEP_ENV: &str = "Merge environment";
pub const STEP_FILES: &str = "Prepare sandbox files";
pub const STEP_STALE: &str = "Remove stale container";
pub const STEP_CREATE: &str = "Create container";
pub const STEP_START: &str = "Start container";
pub const STEP_STOP: &str = "Stop container";
pub const STEP_REMOVE: &str = "Remove container";

#[derive(Debug, Clone, Default)]
pub struct SandboxRequest {
    pub task_id: u64,
    pub iteration: u32,
    pub image: String,
    pub container_prefix: String,
    /// Project-level environment; wins over agent defaults on key collision
    pub custom_env: Vec<(String, String)>,
    pub workflow_yaml: Option<String>,
    pub inputs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxHandle {
    pub backend: Backend,
    pub container_name: String,
    pub container_id: String,
    pub mounts: Vec<MountSpec>,
    #[serde(skip)]
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeardownReport {
    pub stopped: bool,
    pub removed: bool,
    pub warnings: Vec<String>,
}

/// Merge environment layers in order; a later layer wins on key collision while the
/// key keeps its first position
pub fn merge_env(layers: &[&[(String, String)]]) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = Vec::new();
    for layer in layers {
        for (key, value) in layer.iter() {
            match merged.iter_mut().find(|(existing, _)| existing == key) {
                Some(slot) => slot.1 = value.clone(),
                None => merged.push((key.clone(), value.clone())),
            }
        }
    }
    merged
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

fn write_file(path: &Path, content: &str, executable: bool) -> Result<()> {
    fs::write(path, content)
        .map_err(|e| SandboxError::Prepare(format!("{}: {}", path.display(), e)))?;
    if executable {
        make_executable(path)?;
    }
    Ok(())
}

pub struct SandboxController {
    env: Environment,
    backend: Arc<dyn ContainerBackend>,
    host_ids: HostIds,
    ready_timeout: Duration,
    ready_poll: Duration,
}

impl SandboxController {
    pub fn new(env: Environment, backend: Arc<dyn ContainerBackend>) -> Self {
        Self {
            env,
            backend,
            host_ids: HostIds::current(),
            ready_timeout: Duration::from_secs(600),
            ready_poll: Duration::from_secs(1),
        }
    }

    pub fn with_host_ids(mut self, host_ids: HostIds) -> Self {
        self.host_ids = host_ids;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration, poll: Duration) -> Self {
        self.ready_timeout = timeout;
        self.ready_poll = poll;
        self
    }

    pub fn backend(&self) -> Arc<dyn ContainerBackend> {
        self.backend.clone()
    }

    /// Provision and start the sandbox for one task iteration.
    ///
    /// Any container left over under the same deterministic name is removed first,
    /// so calling this twice ends with exactly one container.
    pub async fn create_and_start(
        &self,
        request: &SandboxRequest,
        agent: &dyn SandboxAgent,
        reporter: Option<&dyn ProgressReporter>,
    ) -> Result<SandboxHandle> {
        let steps = Steps { reporter };
        let name = container_name(&request.container_prefix, request.task_id, request.iteration);

        steps.start(STEP_RESOLVE_PATHS);
        let workspace = self.env.workspace_dir(request.task_id);
        let iteration_dir = self.env.iteration_dir(request.task_id, request.iteration);
        let home_dir = iteration_dir.join("home");
        let resolved = if workspace.is_dir() {
            fs::create_dir_all(&home_dir).map_err(SandboxError::from)
        } else {
            Err(SandboxError::MissingWorkspace(
                workspace.display().to_string(),
            ))
        };
        steps.finish(STEP_RESOLVE_PATHS, resolved)?;

        steps.start(STEP_AGENT);
        let agent_mounts = agent.container_mounts();
        let agent_env = agent.environment_variables();
        let mcp_file = agent.mcp_config_file();
        steps.finish::<_, SandboxError>(STEP_AGENT, Ok(()))?;

        steps.start(STEP_ENV);
        let base_env = vec![
            ("HOME".to_string(), AGENT_HOME.to_string()),
            ("PATH".to_string(), SANDBOX_PATH.to_string()),
            ("NPM_CONFIG_PREFIX".to_string(), NPM_PREFIX.to_string()),
            ("TASKBOX_TASK_ID".to_string(), request.task_id.to_string()),
            ("TASKBOX_ITERATION".to_string(), request.iteration.to_string()),
        ];
        let env = merge_env(&[&base_env, &agent_env, &request.custom_env]);
        steps.finish::<_, SandboxError>(STEP_ENV, Ok(()))?;

        steps.start(STEP_FILES);
        let prepared = self
            .prepare_files(request, agent, &iteration_dir, mcp_file.as_ref())
            .await;
        let (mut mounts, user) = steps.finish(STEP_FILES, prepared)?;
        mounts.splice(
            0..0,
            [
                MountSpec::new(&workspace, CONTAINER_WORKSPACE),
                MountSpec::new(&iteration_dir, CONTAINER_OUTPUT),
                MountSpec::new(&home_dir, AGENT_HOME),
            ],
        );
        mounts.extend(agent_mounts);

        steps.start(STEP_STALE);
        let stale = self.backend.remove_by_name(&name).await;
        if let Ok(true) = stale {
            info!("Removed stale container {}", name);
        }
        steps.finish(STEP_STALE, stale)?;

        let spec = ContainerSpec {
            name: name.clone(),
            image: request.image.clone(),
            entrypoint: Some(vec![
                "/bin/sh".to_string(),
                format!("{}/{}", CONTAINER_SUPPORT_DIR, ENTRYPOINT_FILE),
            ]),
            command: None,
            env: env.clone(),
            mounts: mounts.clone(),
            working_dir: Some(CONTAINER_WORKSPACE.to_string()),
            user: Some(user),
            labels: BTreeMap::from([
                ("taskbox.task".to_string(), request.task_id.to_string()),
                ("taskbox.iteration".to_string(), request.iteration.to_string()),
            ]),
        };

        steps.start(STEP_CREATE);
        let created = self.backend.create(&spec).await;
        let container_id = steps.finish(STEP_CREATE, created)?;

        steps.start(STEP_START);
        let started = self.start_and_wait(&container_id).await;
        if started.is_err() {
            if let Err(e) = self.backend.remove(&container_id).await {
                warn!("Failed to remove container {} after failed start: {}", container_id, e);
            }
        }
        steps.finish(STEP_START, started)?;

        info!("Sandbox {} running for task {}", name, request.task_id);
        Ok(SandboxHandle {
            backend: self.backend.kind(),
            container_name: name,
            container_id,
            mounts,
            env,
        })
    }

    /// Write generated files and reconcile UID/GID, returning the extra mounts and user
    async fn prepare_files(
        &self,
        request: &SandboxRequest,
        agent: &dyn SandboxAgent,
        iteration_dir: &Path,
        mcp_file: Option<&taskbox_agents::GeneratedFile>,
    ) -> Result<(Vec<MountSpec>, String)> {
        let support = |file: &str| format!("{}/{}", CONTAINER_SUPPORT_DIR, file);
        let mut mounts = Vec::new();

        let entrypoint = iteration_dir.join(ENTRYPOINT_FILE);
        let install = agent.install_script();
        write_file(
            &entrypoint,
            &entrypoint_script(&agent.executable(), install.as_deref()),
            true,
        )?;
        mounts.push(MountSpec::new(&entrypoint, support(ENTRYPOINT_FILE)).read_only());

        if let Some(workflow_yaml) = &request.workflow_yaml {
            let path = iteration_dir.join(WORKFLOW_FILE);
            write_file(&path, workflow_yaml, false)?;
            mounts.push(MountSpec::new(&path, support(WORKFLOW_FILE)).read_only());
        }

        let inputs = serde_json::to_string_pretty(&request.inputs)
            .map_err(|e| SandboxError::Prepare(e.to_string()))?;
        let inputs_path = iteration_dir.join(INPUTS_FILE);
        write_file(&inputs_path, &inputs, false)?;
        mounts.push(MountSpec::new(&inputs_path, support(INPUTS_FILE)).read_only());

        if let Some(file) = mcp_file {
            let path = iteration_dir.join(&file.file_name);
            write_file(&path, &file.content, false)?;
            mounts.push(MountSpec::new(&path, file.container_path.clone()).read_only());
        }

        let mapping = user_mapping::reconcile(
            self.backend.as_ref(),
            &request.image,
            iteration_dir,
            self.host_ids,
        )
        .await?;
        mounts.extend(mapping.mounts);

        Ok((mounts, mapping.user))
    }

    async fn start_and_wait(&self, container_id: &str) -> Result<()> {
        self.backend.start(container_id).await?;

        let deadline = Instant::now() + self.ready_timeout;
        let probe = vec!["test".to_string(), "-f".to_string(), READY_MARKER.to_string()];
        loop {
            match self.backend.exec(container_id, probe.clone(), None).await {
                Ok(output) if output.success() => return Ok(()),
                Ok(_) => {}
                Err(e) => {
                    if !self.backend.is_running(container_id).await.unwrap_or(false) {
                        let logs = self.backend.logs(container_id).await.unwrap_or_default();
                        return Err(SandboxError::NotReady {
                            container: container_id.to_string(),
                            message: format!("container exited ({}): {}", e, logs.trim()),
                        });
                    }
                }
            }

            if Instant::now() >= deadline {
                return Err(SandboxError::NotReady {
                    container: container_id.to_string(),
                    message: format!("timed out after {:?}", self.ready_timeout),
                });
            }
            tokio::time::sleep(self.ready_poll).await;
        }
    }

    /// Stop then remove a container by id or name. Remove runs even when stop fails.
    pub async fn stop_and_remove(
        &self,
        container: &str,
        reporter: Option<&dyn ProgressReporter>,
    ) -> TeardownReport {
        let steps = Steps { reporter };
        let mut report = TeardownReport::default();

        steps.start(STEP_STOP);
        let stopped = match self.backend.stop(container).await {
            Err(BackendError::NotFound(_)) => Ok(()),
            other => other,
        };
        match steps.finish(STEP_STOP, stopped) {
            Ok(()) => report.stopped = true,
            Err(e) => {
                warn!("Failed to stop container {}: {}", container, e);
                report.warnings.push(format!("stop {}: {}", container, e));
            }
        }

        steps.start(STEP_REMOVE);
        match steps.finish(STEP_REMOVE, self.backend.remove(container).await) {
            Ok(()) => report.removed = true,
            Err(e) => {
                warn!("Failed to remove container {}: {}", container, e);
                report.warnings.push(format!("remove {}: {}", container, e));
            }
        }

        report
    }
}
