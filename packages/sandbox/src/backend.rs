// ABOUTME: Container backend trait, the closed set of supported engines, and backend selection
// ABOUTME: Docker is preferred only when it is a genuine Docker engine; Podman is the fallback

use crate::{BackendError, BackendResult};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use taskbox_agents::{AgentError, CommandExecutor, ExecOutput, MountSpec};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Docker,
    Podman,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::Docker, Backend::Podman];

    /// Name of the backend's command line client
    pub fn command(&self) -> &'static str {
        match self {
            Backend::Docker => "docker",
            Backend::Podman => "podman",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Docker => "docker",
            Backend::Podman => "podman",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "docker" => Ok(Backend::Docker),
            "podman" => Ok(Backend::Podman),
            other => Err(format!("unknown backend '{}': expected docker or podman", other)),
        }
    }
}

/// Everything needed to create one container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub entrypoint: Option<Vec<String>>,
    pub command: Option<Vec<String>>,
    pub env: Vec<(String, String)>,
    pub mounts: Vec<MountSpec>,
    pub working_dir: Option<String>,
    /// `uid:gid` the container processes run as
    pub user: Option<String>,
    pub labels: BTreeMap<String, String>,
}

/// The subset of an engine's version payload used to tell Docker from Podman
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineVersion {
    pub platform_name: Option<String>,
    pub components: Vec<String>,
    pub version: Option<String>,
}

/// Whether a version payload comes from a genuine Docker engine.
///
/// Podman's compatibility socket answers Docker API calls too, so an engine only
/// counts as Docker when the platform or a component named `Engine` says so and
/// nothing in the payload mentions Podman.
pub fn looks_like_docker(version: &EngineVersion) -> bool {
    let mentions_podman = version
        .platform_name
        .iter()
        .chain(version.components.iter())
        .any(|text| text.to_lowercase().contains("podman"));
    if mentions_podman {
        return false;
    }

    let platform_is_docker = version
        .platform_name
        .as_deref()
        .map(|name| name.to_lowercase().contains("docker"))
        .unwrap_or(false);
    let has_engine_component = version.components.iter().any(|name| name == "Engine");

    platform_is_docker || has_engine_component
}

/// Deterministic container name for one task iteration
pub fn container_name(prefix: &str, task_id: u64, iteration: u32) -> String {
    format!("{}-task-{}-{}", prefix, task_id, iteration)
}

#[async_trait]
pub trait ContainerBackend: Send + Sync {
    fn kind(&self) -> Backend;

    async fn is_available(&self) -> bool;

    async fn version(&self) -> BackendResult<EngineVersion>;

    /// Create (but do not start) a container, returning its id
    async fn create(&self, spec: &ContainerSpec) -> BackendResult<String>;

    async fn start(&self, id: &str) -> BackendResult<()>;

    /// Stop a container; stopping an already stopped container succeeds
    async fn stop(&self, id: &str) -> BackendResult<()>;

    /// Force-remove a container; removing a missing container succeeds
    async fn remove(&self, id: &str) -> BackendResult<()>;

    /// Force-remove by name, returning whether a container existed
    async fn remove_by_name(&self, name: &str) -> BackendResult<bool>;

    async fn is_running(&self, id: &str) -> BackendResult<bool>;

    async fn logs(&self, id: &str) -> BackendResult<String>;

    /// Lazily follow a container's output until its log stream ends
    fn follow_logs(&self, id: &str) -> BoxStream<'static, BackendResult<String>>;

    async fn exec(
        &self,
        id: &str,
        command: Vec<String>,
        workdir: Option<&str>,
    ) -> BackendResult<ExecOutput>;

    /// Run `/bin/sh -c script` in a disposable container and return its stdout
    async fn run_throwaway(&self, image: &str, script: &str) -> BackendResult<String>;
}

/// The probe/adapter instance for each backend variant
#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: HashMap<Backend, Arc<dyn ContainerBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend: Arc<dyn ContainerBackend>) {
        self.backends.insert(backend.kind(), backend);
    }

    pub fn get(&self, kind: Backend) -> Option<Arc<dyn ContainerBackend>> {
        self.backends.get(&kind).cloned()
    }

    /// Registry of engine adapters for every backend whose client could be constructed
    pub fn detect() -> Self {
        let mut registry = Self::new();
        for kind in Backend::ALL {
            match crate::engine::EngineBackend::connect(kind) {
                Ok(engine) => registry.register(Arc::new(engine)),
                Err(e) => debug!("Skipping {}: {}", kind, e),
            }
        }
        registry
    }
}

/// Pick the backend every later operation goes to.
///
/// With `preferred` set only that backend is probed. Otherwise Docker is tried
/// first and accepted only when it identifies as genuine Docker, then Podman.
pub async fn select_backend(
    registry: &BackendRegistry,
    preferred: Option<Backend>,
) -> BackendResult<Arc<dyn ContainerBackend>> {
    if let Some(kind) = preferred {
        let backend = registry.get(kind).ok_or(BackendError::NoBackend)?;
        if backend.is_available().await {
            info!("Using {} backend (requested)", kind);
            return Ok(backend);
        }
        return Err(BackendError::NoBackend);
    }

    if let Some(docker) = registry.get(Backend::Docker) {
        if docker.is_available().await {
            match docker.version().await {
                Ok(version) if looks_like_docker(&version) => {
                    info!("Using docker backend");
                    return Ok(docker);
                }
                Ok(version) => debug!(
                    "Docker endpoint is not a Docker engine (platform {:?}), trying podman",
                    version.platform_name
                ),
                Err(e) => warn!("Could not read docker version: {}", e),
            }
        }
    }

    if let Some(podman) = registry.get(Backend::Podman) {
        if podman.is_available().await {
            info!("Using podman backend");
            return Ok(podman);
        }
    }

    Err(BackendError::NoBackend)
}

/// Runs agent commands inside one container
pub struct ContainerExecutor {
    backend: Arc<dyn ContainerBackend>,
    container: String,
}

impl ContainerExecutor {
    pub fn new(backend: Arc<dyn ContainerBackend>, container: impl Into<String>) -> Self {
        Self {
            backend,
            container: container.into(),
        }
    }
}

#[async_trait]
impl CommandExecutor for ContainerExecutor {
    async fn run(&self, command: Vec<String>, workdir: &str) -> taskbox_agents::Result<ExecOutput> {
        let program = command.first().cloned().unwrap_or_default();
        self.backend
            .exec(&self.container, command, Some(workdir))
            .await
            .map_err(|e| AgentError::Execution {
                agent: program,
                message: e.to_string(),
            })
    }
}
