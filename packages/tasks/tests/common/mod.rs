// ABOUTME: Shared fixtures for task service tests: a scripted in-memory engine and git repos
// ABOUTME: The engine answers agent invocations with a canned reply so whole runs complete

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use git2::{Repository, Signature};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskbox_agents::ExecOutput;
use taskbox_config::ProjectConfig;
use taskbox_core::Environment;
use taskbox_sandbox::{
    Backend, BackendError, BackendRegistry, BackendResult, ContainerBackend, ContainerSpec,
    EngineVersion, HostIds,
};
use taskbox_tasks::TaskService;

pub const AGENT_REPLY: &str =
    "Done.\n```json\n{\"plan\": \"p\", \"changes\": \"c\", \"summary\": \"s\"}\n```\n";
const ACCOUNTS: &str = "root:x:0:0:root:/root:/bin/sh\n---taskbox-group---\nroot:x:0:\n";

/// Engine whose containers live in memory and whose agent always answers `AGENT_REPLY`
pub struct ScriptedEngine {
    calls: Mutex<Vec<String>>,
    running: Mutex<BTreeMap<String, (String, bool)>>,
    next_id: AtomicU64,
    pub agent_fails: AtomicBool,
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            running: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            agent_fails: AtomicBool::new(false),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Agent command lines, one per invocation
    pub fn agent_commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| call.strip_prefix("agent:").map(str::to_string))
            .collect()
    }

    pub fn container_count(&self) -> usize {
        self.running.lock().unwrap().len()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn find(&self, id_or_name: &str) -> Option<String> {
        let containers = self.running.lock().unwrap();
        if containers.contains_key(id_or_name) {
            return Some(id_or_name.to_string());
        }
        containers
            .iter()
            .find(|(_, (id, _))| id == id_or_name)
            .map(|(name, _)| name.clone())
    }
}

#[async_trait]
impl ContainerBackend for ScriptedEngine {
    fn kind(&self) -> Backend {
        Backend::Docker
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn version(&self) -> BackendResult<EngineVersion> {
        Ok(EngineVersion {
            platform_name: Some("Docker Engine - Community".to_string()),
            components: vec!["Engine".to_string()],
            version: Some("27.0".to_string()),
        })
    }

    async fn create(&self, spec: &ContainerSpec) -> BackendResult<String> {
        self.record(format!("create:{}", spec.name));
        let id = format!("c{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.running
            .lock()
            .unwrap()
            .insert(spec.name.clone(), (id.clone(), false));
        Ok(id)
    }

    async fn start(&self, id: &str) -> BackendResult<()> {
        self.record(format!("start:{}", id));
        let name = self
            .find(id)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        if let Some(entry) = self.running.lock().unwrap().get_mut(&name) {
            entry.1 = true;
        }
        Ok(())
    }

    async fn stop(&self, id: &str) -> BackendResult<()> {
        self.record(format!("stop:{}", id));
        let name = self
            .find(id)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        if let Some(entry) = self.running.lock().unwrap().get_mut(&name) {
            entry.1 = false;
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> BackendResult<()> {
        self.record(format!("remove:{}", id));
        if let Some(name) = self.find(id) {
            self.running.lock().unwrap().remove(&name);
        }
        Ok(())
    }

    async fn remove_by_name(&self, name: &str) -> BackendResult<bool> {
        Ok(self.running.lock().unwrap().remove(name).is_some())
    }

    async fn is_running(&self, id: &str) -> BackendResult<bool> {
        Ok(self
            .find(id)
            .and_then(|name| self.running.lock().unwrap().get(&name).map(|c| c.1))
            .unwrap_or(false))
    }

    async fn logs(&self, _id: &str) -> BackendResult<String> {
        Ok("taskbox sandbox ready\n".to_string())
    }

    fn follow_logs(&self, _id: &str) -> BoxStream<'static, BackendResult<String>> {
        stream::iter(vec![Ok("live\n".to_string())]).boxed()
    }

    async fn exec(
        &self,
        _id: &str,
        command: Vec<String>,
        _workdir: Option<&str>,
    ) -> BackendResult<ExecOutput> {
        if command.first().map(String::as_str) == Some("claude") {
            self.record(format!("agent:{}", command.join(" ")));
            if self.agent_fails.load(Ordering::SeqCst) {
                return Ok(ExecOutput {
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: "credit balance too low".to_string(),
                });
            }
            return Ok(ExecOutput {
                exit_code: 0,
                stdout: AGENT_REPLY.to_string(),
                stderr: String::new(),
            });
        }
        Ok(ExecOutput::default())
    }

    async fn run_throwaway(&self, _image: &str, _script: &str) -> BackendResult<String> {
        Ok(ACCOUNTS.to_string())
    }
}

pub fn init_repo(dir: &Path) -> Repository {
    let repo = Repository::init(dir).unwrap();
    fs::write(dir.join("README.md"), "hello").unwrap();

    let mut index = repo.index().unwrap();
    index.add_path(Path::new("README.md")).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    {
        let tree = repo.find_tree(tree_id).unwrap();
        let signature = Signature::now("Taskbox Test", "test@taskbox.dev").unwrap();
        repo.commit(Some("HEAD"), &signature, &signature, "initial", &tree, &[])
            .unwrap();
    }
    repo
}

pub fn service_with(root: &Path, registry: BackendRegistry) -> TaskService {
    TaskService::with_parts(Environment::new(root), ProjectConfig::default(), registry)
        .unwrap()
        .with_host_ids(HostIds {
            uid: 1000,
            gid: 1000,
        })
        .with_ready_timeout(Duration::from_millis(200), Duration::from_millis(5))
}

pub fn service(root: &Path, engine: Arc<ScriptedEngine>) -> TaskService {
    let mut registry = BackendRegistry::new();
    registry.register(engine);
    service_with(root, registry)
}
