// ABOUTME: Backend selection tests: genuine Docker first, Podman fallback, explicit preference
// ABOUTME: Also checks that once selected, only the chosen backend receives operations

mod common;

use common::{FakeBackend, StubAgent};
use pretty_assertions::assert_eq;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use taskbox_agents::CommandExecutor;
use taskbox_core::Environment;
use taskbox_sandbox::{
    select_backend, Backend, BackendError, BackendRegistry, ContainerExecutor, HostIds,
    SandboxController, SandboxRequest,
};
use tempfile::TempDir;

fn registry(docker: &Arc<FakeBackend>, podman: &Arc<FakeBackend>) -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry.register(docker.clone());
    registry.register(podman.clone());
    registry
}

#[tokio::test]
async fn test_genuine_docker_is_preferred() {
    let docker = Arc::new(FakeBackend::new(Backend::Docker));
    let podman = Arc::new(FakeBackend::new(Backend::Podman));

    let selected = select_backend(&registry(&docker, &podman), None)
        .await
        .unwrap();

    assert_eq!(selected.kind(), Backend::Docker);
    assert!(podman.calls().is_empty());
}

#[tokio::test]
async fn test_docker_endpoint_served_by_podman_falls_through() {
    let docker = Arc::new(FakeBackend::new(Backend::Docker).impersonating_podman());
    let podman = Arc::new(FakeBackend::new(Backend::Podman));

    let selected = select_backend(&registry(&docker, &podman), None)
        .await
        .unwrap();

    assert_eq!(selected.kind(), Backend::Podman);
    assert_eq!(docker.calls(), vec!["is_available", "version"]);
}

#[tokio::test]
async fn test_unavailable_docker_is_never_used_after_selection() {
    let temp = TempDir::new().unwrap();
    let env = Environment::new(temp.path());
    fs::create_dir_all(env.workspace_dir(3)).unwrap();

    let docker = Arc::new(FakeBackend::new(Backend::Docker).unavailable());
    let podman = Arc::new(FakeBackend::new(Backend::Podman));
    let selected = select_backend(&registry(&docker, &podman), None)
        .await
        .unwrap();
    assert_eq!(selected.kind(), Backend::Podman);

    let controller = SandboxController::new(env, selected)
        .with_host_ids(HostIds {
            uid: 1000,
            gid: 1000,
        })
        .with_ready_timeout(Duration::from_millis(50), Duration::from_millis(5));
    let request = SandboxRequest {
        task_id: 3,
        iteration: 1,
        image: "node:lts".to_string(),
        container_prefix: "taskbox".to_string(),
        ..Default::default()
    };
    let handle = controller
        .create_and_start(&request, &StubAgent::with_env(&[]), None)
        .await
        .unwrap();

    assert_eq!(handle.backend, Backend::Podman);
    assert_eq!(docker.calls(), vec!["is_available"]);
    assert!(podman
        .calls()
        .contains(&"create:taskbox-task-3-1".to_string()));
}

#[tokio::test]
async fn test_no_backend_available() {
    let docker = Arc::new(FakeBackend::new(Backend::Docker).unavailable());
    let podman = Arc::new(FakeBackend::new(Backend::Podman).unavailable());

    let result = select_backend(&registry(&docker, &podman), None).await;
    assert!(matches!(result, Err(BackendError::NoBackend)));
}

#[tokio::test]
async fn test_empty_registry_has_no_backend() {
    let result = select_backend(&BackendRegistry::new(), None).await;
    assert!(matches!(result, Err(BackendError::NoBackend)));
}

#[tokio::test]
async fn test_requested_backend_skips_docker_probe() {
    let docker = Arc::new(FakeBackend::new(Backend::Docker));
    let podman = Arc::new(FakeBackend::new(Backend::Podman));

    let selected = select_backend(&registry(&docker, &podman), Some(Backend::Podman))
        .await
        .unwrap();

    assert_eq!(selected.kind(), Backend::Podman);
    assert!(docker.calls().is_empty());
}

#[tokio::test]
async fn test_requested_backend_unavailable_is_an_error() {
    let docker = Arc::new(FakeBackend::new(Backend::Docker));
    let podman = Arc::new(FakeBackend::new(Backend::Podman).unavailable());

    let result = select_backend(&registry(&docker, &podman), Some(Backend::Podman)).await;
    assert!(matches!(result, Err(BackendError::NoBackend)));
    assert!(docker.calls().is_empty());
}

#[tokio::test]
async fn test_container_executor_runs_in_workdir() {
    let backend = Arc::new(FakeBackend::new(Backend::Docker));
    let executor = ContainerExecutor::new(backend.clone(), "taskbox-task-1-1");

    let output = executor
        .run(vec!["claude".to_string(), "-p".to_string(), "hi".to_string()], "/workspace")
        .await
        .unwrap();

    assert!(output.success());
    assert_eq!(
        backend.calls(),
        vec!["exec:taskbox-task-1-1:/workspace:claude -p hi"]
    );
}
