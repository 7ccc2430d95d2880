// ABOUTME: Sandbox lifecycle controller tests against an in-memory backend
// ABOUTME: Covers idempotent provisioning, env precedence, failure cleanup and teardown reporting

mod common;

use common::{FakeBackend, RecordingReporter, StubAgent};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use taskbox_core::Environment;
use taskbox_sandbox::{
    Backend, BackendError, HostIds, SandboxController, SandboxError, SandboxRequest,
};
use tempfile::TempDir;

const HOST: HostIds = HostIds {
    uid: 1000,
    gid: 1000,
};

fn project() -> (TempDir, Environment) {
    let temp = TempDir::new().unwrap();
    let env = Environment::new(temp.path());
    fs::create_dir_all(env.workspace_dir(1)).unwrap();
    (temp, env)
}

fn request() -> SandboxRequest {
    SandboxRequest {
        task_id: 1,
        iteration: 1,
        image: "node:lts".to_string(),
        container_prefix: "taskbox".to_string(),
        custom_env: Vec::new(),
        workflow_yaml: Some("name: swe\nsteps: []\n".to_string()),
        inputs: BTreeMap::from([("task".to_string(), "Fix login".to_string())]),
    }
}

fn controller(env: Environment, backend: Arc<FakeBackend>) -> SandboxController {
    SandboxController::new(env, backend)
        .with_host_ids(HOST)
        .with_ready_timeout(Duration::from_millis(50), Duration::from_millis(5))
}

#[tokio::test]
async fn test_create_and_start_is_idempotent() {
    let (_temp, env) = project();
    let backend = Arc::new(FakeBackend::new(Backend::Docker));
    let controller = controller(env, backend.clone());
    let agent = StubAgent::with_env(&[]);

    let first = controller
        .create_and_start(&request(), &agent, None)
        .await
        .unwrap();
    let second = controller
        .create_and_start(&request(), &agent, None)
        .await
        .unwrap();

    assert_eq!(first.container_name, "taskbox-task-1-1");
    assert_eq!(second.container_name, first.container_name);
    assert_ne!(second.container_id, first.container_id);
    assert_eq!(backend.container_names(), vec!["taskbox-task-1-1".to_string()]);
}

#[tokio::test]
async fn test_project_env_overrides_agent_defaults() {
    let (_temp, env) = project();
    let backend = Arc::new(FakeBackend::new(Backend::Docker));
    let controller = controller(env, backend.clone());
    let agent = StubAgent::with_env(&[("FOO", "1"), ("AGENT_ONLY", "yes")]);

    let mut request = request();
    request.custom_env = vec![("FOO".to_string(), "2".to_string())];

    let handle = controller
        .create_and_start(&request, &agent, None)
        .await
        .unwrap();

    let lookup = |key: &str| {
        handle
            .env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    };
    assert_eq!(lookup("FOO").as_deref(), Some("2"));
    assert_eq!(lookup("AGENT_ONLY").as_deref(), Some("yes"));
    assert_eq!(backend.last_spec().unwrap().env, handle.env);
}

#[tokio::test]
async fn test_failed_create_never_starts() {
    let (_temp, env) = project();
    let mut fake = FakeBackend::new(Backend::Docker);
    fake.fail_create = true;
    let backend = Arc::new(fake);
    let controller = controller(env, backend.clone());
    let reporter = RecordingReporter::default();

    let result = controller
        .create_and_start(&request(), &StubAgent::with_env(&[]), Some(&reporter))
        .await;

    assert!(matches!(
        result,
        Err(SandboxError::Backend(BackendError::Container(_)))
    ));
    assert!(!backend.calls().iter().any(|c| c.starts_with("start:")));
    let events = reporter.events();
    assert_eq!(events.last().unwrap(), "failed:Create container");
    assert!(!events.iter().any(|e| e.contains("Start container")));
}

#[tokio::test]
async fn test_failed_start_removes_created_container() {
    let (_temp, env) = project();
    let mut fake = FakeBackend::new(Backend::Podman);
    fake.fail_start = true;
    let backend = Arc::new(fake);
    let controller = controller(env, backend.clone());

    let result = controller
        .create_and_start(&request(), &StubAgent::with_env(&[]), None)
        .await;

    assert!(result.is_err());
    assert!(backend.container_names().is_empty());
    assert!(backend.calls().contains(&"remove:id-1".to_string()));
}

#[tokio::test]
async fn test_unsupported_image_is_an_error() {
    let (_temp, env) = project();
    let mut fake = FakeBackend::new(Backend::Docker);
    fake.unsupported_image = true;
    let backend = Arc::new(fake);
    let controller = controller(env, backend.clone());

    let result = controller
        .create_and_start(&request(), &StubAgent::with_env(&[]), None)
        .await;

    assert!(matches!(
        result,
        Err(SandboxError::Backend(BackendError::UnsupportedImage(_)))
    ));
    assert!(!backend.calls().iter().any(|c| c.starts_with("create:")));
}

#[tokio::test]
async fn test_missing_host_user_gets_overlays() {
    let (_temp, env) = project();
    let iteration_dir = env.iteration_dir(1, 1);
    let backend = Arc::new(FakeBackend::new(Backend::Docker));
    let controller = controller(env, backend.clone());

    let handle = controller
        .create_and_start(&request(), &StubAgent::with_env(&[]), None)
        .await
        .unwrap();

    let passwd = fs::read_to_string(iteration_dir.join("passwd")).unwrap();
    assert!(passwd.contains("agent:x:1000:1000:Taskbox agent:/home/agent:/bin/sh"));
    assert!(iteration_dir.join("group").exists());

    let etc_passwd = handle
        .mounts
        .iter()
        .find(|m| m.container_path == "/etc/passwd")
        .unwrap();
    assert!(etc_passwd.read_only);
    assert_eq!(backend.last_spec().unwrap().user.as_deref(), Some("1000:1000"));
}

#[tokio::test]
async fn test_existing_host_user_needs_no_overlay() {
    let (_temp, env) = project();
    let accounts = "root:x:0:0::/root:/bin/sh\nnode:x:1000:1000::/home/node:/bin/sh\n---taskbox-group---\nnode:x:1000:\n";
    let backend = Arc::new(FakeBackend::new(Backend::Docker).with_accounts(accounts));
    let controller = controller(env, backend);

    let handle = controller
        .create_and_start(&request(), &StubAgent::with_env(&[]), None)
        .await
        .unwrap();

    assert!(!handle
        .mounts
        .iter()
        .any(|m| m.container_path == "/etc/passwd" || m.container_path == "/etc/group"));
}

#[tokio::test]
async fn test_generated_files_and_standard_mounts() {
    let (_temp, env) = project();
    let iteration_dir = env.iteration_dir(1, 1);
    let workspace = env.workspace_dir(1);
    let backend = Arc::new(FakeBackend::new(Backend::Docker));
    let controller = controller(env, backend);

    let handle = controller
        .create_and_start(&request(), &StubAgent::with_env(&[]), None)
        .await
        .unwrap();

    assert!(iteration_dir.join("entrypoint.sh").exists());
    assert_eq!(
        fs::read_to_string(iteration_dir.join("workflow.yml")).unwrap(),
        "name: swe\nsteps: []\n"
    );
    let inputs: BTreeMap<String, String> =
        serde_json::from_str(&fs::read_to_string(iteration_dir.join("inputs.json")).unwrap())
            .unwrap();
    assert_eq!(inputs["task"], "Fix login");

    let target = |path: &str| handle.mounts.iter().find(|m| m.container_path == path).cloned();
    assert_eq!(target("/workspace").unwrap().host_path, workspace);
    assert_eq!(target("/output").unwrap().host_path, iteration_dir);
    assert!(target("/taskbox/entrypoint.sh").unwrap().read_only);
}

#[tokio::test]
async fn test_missing_workspace_fails_before_backend_calls() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(FakeBackend::new(Backend::Docker));
    let controller = controller(Environment::new(temp.path()), backend.clone());
    let reporter = RecordingReporter::default();

    let result = controller
        .create_and_start(&request(), &StubAgent::with_env(&[]), Some(&reporter))
        .await;

    assert!(matches!(result, Err(SandboxError::MissingWorkspace(_))));
    assert!(backend.calls().is_empty());
    assert_eq!(
        reporter.events(),
        vec![
            "started:Resolve task paths".to_string(),
            "failed:Resolve task paths".to_string()
        ]
    );
}

#[tokio::test]
async fn test_stop_failure_still_removes() {
    let (_temp, env) = project();
    let mut fake = FakeBackend::new(Backend::Docker);
    fake.fail_stop = true;
    let backend = Arc::new(fake);
    let controller = controller(env, backend.clone());
    let handle = controller
        .create_and_start(&request(), &StubAgent::with_env(&[]), None)
        .await
        .unwrap();

    let reporter = RecordingReporter::default();
    let report = controller
        .stop_and_remove(&handle.container_id, Some(&reporter))
        .await;

    assert!(!report.stopped);
    assert!(report.removed);
    assert_eq!(report.warnings.len(), 1);
    assert!(backend.container_names().is_empty());
    assert_eq!(
        reporter.events(),
        vec![
            "started:Stop container".to_string(),
            "failed:Stop container".to_string(),
            "started:Remove container".to_string(),
            "completed:Remove container".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_teardown_of_missing_container_is_clean() {
    let (_temp, env) = project();
    let backend = Arc::new(FakeBackend::new(Backend::Docker));
    let controller = controller(env, backend);

    let report = controller.stop_and_remove("taskbox-task-9-1", None).await;
    assert!(report.stopped);
    assert!(report.removed);
    assert!(report.warnings.is_empty());
}
