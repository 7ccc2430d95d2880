// ABOUTME: Generated entrypoint script for task sandboxes
// ABOUTME: Installs the agent CLI when missing, signals readiness, then keeps the container alive

pub const ENTRYPOINT_FILE: &str = "entrypoint.sh";
pub const WORKFLOW_FILE: &str = "workflow.yml";
pub const INPUTS_FILE: &str = "inputs.json";

/// Directory inside the container holding generated files
pub const CONTAINER_SUPPORT_DIR: &str = "/taskbox";
pub const READY_MARKER: &str = "/tmp/.taskbox-ready";

/// npm global prefix the unprivileged sandbox user can write to
pub const NPM_PREFIX: &str = "/home/agent/.npm-global";
pub const SANDBOX_PATH: &str =
    "/home/agent/.npm-global/bin:/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Entrypoint for a sandbox whose agent runs `command`
pub fn entrypoint_script(command: &str, install: Option<&str>) -> String {
    let mut script = String::from("#!/bin/sh\nset -e\n\n");
    script.push_str("mkdir -p \"$HOME\" \"$NPM_CONFIG_PREFIX\" 2>/dev/null || true\n\n");

    if let Some(install) = install {
        script.push_str(&format!(
            "if ! command -v {cmd} >/dev/null 2>&1; then\n  echo {msg}\n  {install}\nfi\n\n",
            cmd = shell_quote(command),
            msg = shell_quote(&format!("Installing {}", command)),
            install = install,
        ));
    }

    script.push_str(&format!("touch {}\n", READY_MARKER));
    script.push_str("echo 'taskbox sandbox ready'\n");
    script.push_str("exec tail -f /dev/null\n");
    script
}
