// ABOUTME: In-memory container backend and recorders shared by sandbox integration tests
// ABOUTME: Records every call so tests can assert ordering and which backend was touched

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use taskbox_agents::{AgentTool, ExecOutput, McpServer, MountSpec, SandboxAgent};
use taskbox_sandbox::{
    Backend, BackendError, BackendResult, ContainerBackend, ContainerSpec, EngineVersion,
    ProgressReporter,
};

pub const MINIMAL_ACCOUNTS: &str = "root:x:0:0:root:/root:/bin/sh\n---taskbox-group---\nroot:x:0:\n";

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    running: bool,
}

pub struct FakeBackend {
    kind: Backend,
    available: bool,
    version: EngineVersion,
    pub fail_create: bool,
    pub fail_start: bool,
    pub fail_stop: bool,
    pub unsupported_image: bool,
    accounts: String,
    calls: Mutex<Vec<String>>,
    containers: Mutex<BTreeMap<String, FakeContainer>>,
    specs: Mutex<Vec<ContainerSpec>>,
    next_id: AtomicU64,
}

impl FakeBackend {
    pub fn new(kind: Backend) -> Self {
        let platform = match kind {
            Backend::Docker => "Docker Engine - Community",
            Backend::Podman => "linux/amd64/fedora-40",
        };
        let component = match kind {
            Backend::Docker => "Engine",
            Backend::Podman => "Podman Engine",
        };
        Self {
            kind,
            available: true,
            version: EngineVersion {
                platform_name: Some(platform.to_string()),
                components: vec![component.to_string()],
                version: Some("1.0".to_string()),
            },
            fail_create: false,
            fail_start: false,
            fail_stop: false,
            unsupported_image: false,
            accounts: MINIMAL_ACCOUNTS.to_string(),
            calls: Mutex::new(Vec::new()),
            containers: Mutex::new(BTreeMap::new()),
            specs: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Docker CLI endpoint that is really Podman's compatibility socket
    pub fn impersonating_podman(mut self) -> Self {
        self.version = EngineVersion {
            platform_name: Some("linux/amd64/fedora-40".to_string()),
            components: vec!["Podman Engine".to_string()],
            version: Some("5.0".to_string()),
        };
        self
    }

    pub fn with_accounts(mut self, accounts: &str) -> Self {
        self.accounts = accounts.to_string();
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn container_names(&self) -> Vec<String> {
        self.containers.lock().unwrap().keys().cloned().collect()
    }

    pub fn last_spec(&self) -> Option<ContainerSpec> {
        self.specs.lock().unwrap().last().cloned()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn find_name(&self, id_or_name: &str) -> Option<String> {
        let containers = self.containers.lock().unwrap();
        if containers.contains_key(id_or_name) {
            return Some(id_or_name.to_string());
        }
        containers
            .iter()
            .find(|(_, c)| c.id == id_or_name)
            .map(|(name, _)| name.clone())
    }
}

#[async_trait]
impl ContainerBackend for FakeBackend {
    fn kind(&self) -> Backend {
        self.kind
    }

    async fn is_available(&self) -> bool {
        self.record("is_available".to_string());
        self.available
    }

    async fn version(&self) -> BackendResult<EngineVersion> {
        self.record("version".to_string());
        Ok(self.version.clone())
    }

    async fn create(&self, spec: &ContainerSpec) -> BackendResult<String> {
        self.record(format!("create:{}", spec.name));
        if self.fail_create {
            return Err(BackendError::Container("image pull failed".to_string()));
        }
        let mut containers = self.containers.lock().unwrap();
        if containers.contains_key(&spec.name) {
            return Err(BackendError::Container(format!(
                "name {} already in use",
                spec.name
            )));
        }
        let id = format!("id-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        containers.insert(
            spec.name.clone(),
            FakeContainer {
                id: id.clone(),
                running: false,
            },
        );
        self.specs.lock().unwrap().push(spec.clone());
        Ok(id)
    }

    async fn start(&self, id: &str) -> BackendResult<()> {
        self.record(format!("start:{}", id));
        if self.fail_start {
            return Err(BackendError::Container("port already allocated".to_string()));
        }
        let name = self
            .find_name(id)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        if let Some(container) = self.containers.lock().unwrap().get_mut(&name) {
            container.running = true;
        }
        Ok(())
    }

    async fn stop(&self, id: &str) -> BackendResult<()> {
        self.record(format!("stop:{}", id));
        if self.fail_stop {
            return Err(BackendError::Container("stop timed out".to_string()));
        }
        let name = self
            .find_name(id)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        if let Some(container) = self.containers.lock().unwrap().get_mut(&name) {
            container.running = false;
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> BackendResult<()> {
        self.record(format!("remove:{}", id));
        if let Some(name) = self.find_name(id) {
            self.containers.lock().unwrap().remove(&name);
        }
        Ok(())
    }

    async fn remove_by_name(&self, name: &str) -> BackendResult<bool> {
        self.record(format!("remove_by_name:{}", name));
        Ok(self.containers.lock().unwrap().remove(name).is_some())
    }

    async fn is_running(&self, id: &str) -> BackendResult<bool> {
        self.record(format!("is_running:{}", id));
        Ok(self
            .find_name(id)
            .and_then(|name| self.containers.lock().unwrap().get(&name).map(|c| c.running))
            .unwrap_or(false))
    }

    async fn logs(&self, id: &str) -> BackendResult<String> {
        self.record(format!("logs:{}", id));
        Ok("taskbox sandbox ready\n".to_string())
    }

    fn follow_logs(&self, id: &str) -> BoxStream<'static, BackendResult<String>> {
        self.record(format!("follow_logs:{}", id));
        stream::iter(vec![Ok("line 1\n".to_string()), Ok("line 2\n".to_string())]).boxed()
    }

    async fn exec(
        &self,
        id: &str,
        command: Vec<String>,
        workdir: Option<&str>,
    ) -> BackendResult<ExecOutput> {
        self.record(format!(
            "exec:{}:{}:{}",
            id,
            workdir.unwrap_or("-"),
            command.join(" ")
        ));
        Ok(ExecOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    async fn run_throwaway(&self, image: &str, _script: &str) -> BackendResult<String> {
        self.record(format!("throwaway:{}", image));
        if self.unsupported_image {
            return Err(BackendError::UnsupportedImage(image.to_string()));
        }
        Ok(self.accounts.clone())
    }
}

/// Agent with fixed environment and no mounts
pub struct StubAgent {
    pub env: Vec<(String, String)>,
}

impl StubAgent {
    pub fn with_env(pairs: &[(&str, &str)]) -> Self {
        Self {
            env: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl AgentTool for StubAgent {
    fn name(&self) -> &str {
        "stub"
    }

    async fn invoke(&self, prompt: &str) -> taskbox_agents::Result<String> {
        Ok(format!("echo: {}", prompt))
    }
}

impl SandboxAgent for StubAgent {
    fn container_mounts(&self) -> Vec<MountSpec> {
        Vec::new()
    }

    fn environment_variables(&self) -> Vec<(String, String)> {
        self.env.clone()
    }

    fn configure_mcp(&mut self, _servers: Vec<McpServer>) -> taskbox_agents::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressReporter for RecordingReporter {
    fn step_started(&self, step: &str) {
        self.events.lock().unwrap().push(format!("started:{}", step));
    }

    fn step_completed(&self, step: &str) {
        self.events.lock().unwrap().push(format!("completed:{}", step));
    }

    fn step_failed(&self, step: &str, _error: &str) {
        self.events.lock().unwrap().push(format!("failed:{}", step));
    }
}
