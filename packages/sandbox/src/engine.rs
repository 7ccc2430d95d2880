// ABOUTME: ContainerBackend implementation over the Docker engine API via bollard
// ABOUTME: Serves Docker directly and Podman through its Docker-compatible socket

use crate::backend::{Backend, ContainerBackend, ContainerSpec, EngineVersion};
use crate::{BackendError, BackendResult};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use taskbox_agents::ExecOutput;
use taskbox_config::constants::{TASKBOX_PODMAN_SOCKET, XDG_RUNTIME_DIR};
use tracing::{debug, error, info, warn};

const CONNECT_TIMEOUT_SECS: u64 = 120;
const STOP_TIMEOUT_SECS: i64 = 10;

/// Podman's Docker-compatible socket: explicit override, then rootless, then rootful
pub fn podman_socket_path<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup(TASKBOX_PODMAN_SOCKET).filter(|p| !p.is_empty()) {
        return PathBuf::from(path.trim_start_matches("unix://"));
    }
    if let Some(runtime_dir) = lookup(XDG_RUNTIME_DIR).filter(|p| !p.is_empty()) {
        return PathBuf::from(runtime_dir).join("podman").join("podman.sock");
    }
    PathBuf::from("/run/podman/podman.sock")
}

/// Whether an engine error says the image has no usable `/bin/sh`
pub(crate) fn is_missing_shell(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("/bin/sh")
        && (message.contains("no such file") || message.contains("executable file"))
}

fn log_text(output: LogOutput) -> Option<String> {
    match output {
        LogOutput::StdOut { message }
        | LogOutput::StdErr { message }
        | LogOutput::Console { message } => Some(String::from_utf8_lossy(&message).to_string()),
        LogOutput::StdIn { .. } => None,
    }
}

pub struct EngineBackend {
    kind: Backend,
    client: Docker,
    label_prefix: String,
}

impl EngineBackend {
    pub fn connect(kind: Backend) -> BackendResult<Self> {
        let client = match kind {
            Backend::Docker => Docker::connect_with_defaults(),
            Backend::Podman => {
                let socket = podman_socket_path(|key| env::var(key).ok());
                Docker::connect_with_unix(
                    &socket.to_string_lossy(),
                    CONNECT_TIMEOUT_SECS,
                    API_DEFAULT_VERSION,
                )
            }
        }
        .map_err(|e| BackendError::Connection(format!("{}: {}", kind, e)))?;

        Ok(Self::with_client(kind, client))
    }

    pub fn with_client(kind: Backend, client: Docker) -> Self {
        Self {
            kind,
            client,
            label_prefix: "taskbox".to_string(),
        }
    }

    fn to_bollard_config(&self, spec: &ContainerSpec) -> Config<String> {
        let mut labels: HashMap<String, String> = spec
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        labels.insert(format!("{}.managed", self.label_prefix), "true".to_string());

        let binds: Vec<String> = spec.mounts.iter().map(|m| m.to_bind()).collect();
        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        Config {
            image: Some(spec.image.clone()),
            entrypoint: spec.entrypoint.clone(),
            cmd: spec.command.clone(),
            env: Some(env),
            working_dir: spec.working_dir.clone(),
            user: spec.user.clone(),
            labels: Some(labels),
            host_config: Some(HostConfig {
                binds: Some(binds),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn ensure_image(&self, image: &str) -> BackendResult<()> {
        match self.client.inspect_image(image).await {
            Ok(_) => {
                debug!("Image {} already present", image);
                return Ok(());
            }
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(BackendError::Image(e.to_string())),
        }

        info!("Pulling image {}", image);
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(progress) => {
                    if let Some(error) = progress.error {
                        return Err(BackendError::Image(format!(
                            "Failed to pull image {}: {}",
                            image, error
                        )));
                    }
                    if let Some(status) = progress.status {
                        debug!("Pull {}: {}", image, status);
                    }
                }
                Err(e) => {
                    return Err(BackendError::Image(format!(
                        "Failed to pull image {}: {}",
                        image, e
                    )))
                }
            }
        }
        Ok(())
    }

    async fn collect_logs(&self, id: &str, stdout: bool, stderr: bool) -> BackendResult<String> {
        let options = LogsOptions::<String> {
            stdout,
            stderr,
            follow: false,
            ..Default::default()
        };

        let mut stream = self.client.logs(id, Some(options));
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => {
                    if let Some(part) = log_text(output) {
                        text.push_str(&part);
                    }
                }
                Err(BollardError::DockerResponseServerError {
                    status_code: 404, ..
                }) => return Err(BackendError::NotFound(id.to_string())),
                Err(e) => return Err(BackendError::Container(e.to_string())),
            }
        }
        Ok(text)
    }

    async fn wait_for_exit(&self, id: &str) -> BackendResult<i64> {
        let mut stream = self
            .client
            .wait_container(id, None::<WaitContainerOptions<String>>);

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(BackendError::Container(e.to_string())),
            None => Err(BackendError::Container(format!(
                "wait stream for {} closed unexpectedly",
                id
            ))),
        }
    }

    async fn throwaway(&self, id: &str, image: &str) -> BackendResult<String> {
        if let Err(e) = self
            .client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
        {
            let message = e.to_string();
            if is_missing_shell(&message) {
                return Err(BackendError::UnsupportedImage(image.to_string()));
            }
            return Err(BackendError::Container(message));
        }

        let exit_code = self.wait_for_exit(id).await?;
        let stdout = self.collect_logs(id, true, false).await?;
        if exit_code != 0 {
            let stderr = self.collect_logs(id, false, true).await.unwrap_or_default();
            if is_missing_shell(&stderr) {
                return Err(BackendError::UnsupportedImage(image.to_string()));
            }
            return Err(BackendError::Exec(format!(
                "throwaway container exited with {}: {}",
                exit_code,
                stderr.trim()
            )));
        }
        Ok(stdout)
    }
}

#[async_trait]
impl ContainerBackend for EngineBackend {
    fn kind(&self) -> Backend {
        self.kind
    }

    async fn is_available(&self) -> bool {
        match self.client.ping().await {
            Ok(_) => true,
            Err(e) => {
                debug!("{} not available: {}", self.kind, e);
                false
            }
        }
    }

    async fn version(&self) -> BackendResult<EngineVersion> {
        let version = self
            .client
            .version()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        Ok(EngineVersion {
            platform_name: version.platform.map(|p| p.name),
            components: version
                .components
                .unwrap_or_default()
                .into_iter()
                .map(|c| c.name)
                .collect(),
            version: version.version,
        })
    }

    async fn create(&self, spec: &ContainerSpec) -> BackendResult<String> {
        info!("Creating container {} from {}", spec.name, spec.image);
        self.ensure_image(&spec.image).await?;

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let container = self
            .client
            .create_container(Some(options), self.to_bollard_config(spec))
            .await
            .map_err(|e| BackendError::Container(e.to_string()))?;

        for warning in &container.warnings {
            warn!("Engine warning for {}: {}", spec.name, warning);
        }
        debug!("Created container {} ({})", spec.name, container.id);
        Ok(container.id)
    }

    async fn start(&self, id: &str) -> BackendResult<()> {
        info!("Starting container {}", id);
        self.client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| BackendError::Container(e.to_string()))
    }

    async fn stop(&self, id: &str) -> BackendResult<()> {
        info!("Stopping container {}", id);
        let options = StopContainerOptions {
            t: STOP_TIMEOUT_SECS,
        };
        match self.client.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!("Container {} already stopped", id);
                Ok(())
            }
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(BackendError::NotFound(id.to_string())),
            Err(e) => {
                error!("Failed to stop container {}: {}", id, e);
                Err(BackendError::Container(e.to_string()))
            }
        }
    }

    async fn remove(&self, id: &str) -> BackendResult<()> {
        self.remove_by_name(id).await.map(|_| ())
    }

    async fn remove_by_name(&self, name: &str) -> BackendResult<bool> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.client.remove_container(name, Some(options)).await {
            Ok(()) => {
                info!("Removed container {}", name);
                Ok(true)
            }
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Container {} already removed", name);
                Ok(false)
            }
            Err(e) => {
                error!("Failed to remove container {}: {}", name, e);
                Err(BackendError::Container(e.to_string()))
            }
        }
    }

    async fn is_running(&self, id: &str) -> BackendResult<bool> {
        match self
            .client
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => Ok(inspect
                .state
                .and_then(|state| state.running)
                .unwrap_or(false)),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(BackendError::Container(e.to_string())),
        }
    }

    async fn logs(&self, id: &str) -> BackendResult<String> {
        self.collect_logs(id, true, true).await
    }

    fn follow_logs(&self, id: &str) -> BoxStream<'static, BackendResult<String>> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            ..Default::default()
        };

        self.client
            .logs(id, Some(options))
            .filter_map(|chunk| async move {
                match chunk {
                    Ok(output) => log_text(output).map(Ok),
                    Err(e) => Some(Err(BackendError::Container(e.to_string()))),
                }
            })
            .boxed()
    }

    async fn exec(
        &self,
        id: &str,
        command: Vec<String>,
        workdir: Option<&str>,
    ) -> BackendResult<ExecOutput> {
        debug!("Exec in {}: {:?}", id, command.first());

        let options = CreateExecOptions {
            cmd: Some(command),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: workdir.map(str::to_string),
            ..Default::default()
        };

        let exec = self
            .client
            .create_exec(id, options)
            .await
            .map_err(|e| BackendError::Exec(e.to_string()))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        match self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| BackendError::Exec(e.to_string()))?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(message) = output.next().await {
                    match message {
                        Ok(LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message))
                        }
                        Ok(other) => {
                            if let Some(text) = log_text(other) {
                                stdout.push_str(&text);
                            }
                        }
                        Err(e) => return Err(BackendError::Exec(e.to_string())),
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(BackendError::Exec(
                    "exec was detached unexpectedly".to_string(),
                ))
            }
        }

        let inspect = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| BackendError::Exec(e.to_string()))?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(0),
            stdout,
            stderr,
        })
    }

    async fn run_throwaway(&self, image: &str, script: &str) -> BackendResult<String> {
        self.ensure_image(image).await?;

        let config = Config {
            image: Some(image.to_string()),
            entrypoint: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
            cmd: Some(vec![script.to_string()]),
            labels: Some(HashMap::from([(
                format!("{}.throwaway", self.label_prefix),
                "true".to_string(),
            )])),
            ..Default::default()
        };

        let container = self
            .client
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(|e| BackendError::Container(e.to_string()))?;

        let result = self.throwaway(&container.id, image).await;

        if let Err(e) = self.remove(&container.id).await {
            warn!("Failed to remove throwaway container {}: {}", container.id, e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_podman_socket_prefers_override() {
        let path = podman_socket_path(|key| match key {
            TASKBOX_PODMAN_SOCKET => Some("unix:///tmp/podman.sock".to_string()),
            XDG_RUNTIME_DIR => Some("/run/user/1000".to_string()),
            _ => None,
        });
        assert_eq!(path, PathBuf::from("/tmp/podman.sock"));
    }

    #[test]
    fn test_podman_socket_rootless_then_rootful() {
        let rootless = podman_socket_path(|key| {
            (key == XDG_RUNTIME_DIR).then(|| "/run/user/1000".to_string())
        });
        assert_eq!(rootless, PathBuf::from("/run/user/1000/podman/podman.sock"));

        let rootful = podman_socket_path(|_| None);
        assert_eq!(rootful, PathBuf::from("/run/podman/podman.sock"));
    }

    #[rstest]
    #[case("exec: \"/bin/sh\": stat /bin/sh: no such file or directory", true)]
    #[case("OCI runtime exec failed: /bin/sh: executable file not found in $PATH", true)]
    #[case("/bin/sh: line 1: cat: not found", false)]
    #[case("No such image: scratch:latest", false)]
    fn test_missing_shell_detection(#[case] message: &str, #[case] expected: bool) {
        assert_eq!(is_missing_shell(message), expected);
    }
}
