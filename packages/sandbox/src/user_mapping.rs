// ABOUTME: Reconciles the host user's UID/GID with the sandbox image's passwd and group files
// ABOUTME: Missing entries are added through read-only overlays so bind-mounted files keep host ownership

use crate::backend::ContainerBackend;
use crate::{Result, SandboxError};
use std::fs;
use std::path::Path;
use taskbox_agents::MountSpec;
use tracing::{debug, info};

pub const AGENT_USER: &str = "agent";
pub const AGENT_HOME: &str = "/home/agent";

const GROUP_MARKER: &str = "---taskbox-group---";
const PASSWD_OVERLAY: &str = "passwd";
const GROUP_OVERLAY: &str = "group";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostIds {
    pub uid: u32,
    pub gid: u32,
}

impl HostIds {
    pub fn current() -> Self {
        Self {
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
        }
    }

    pub fn user_spec(&self) -> String {
        format!("{}:{}", self.uid, self.gid)
    }
}

/// How the container should run so files it writes belong to the host user
#[derive(Debug, Clone, PartialEq)]
pub struct UserMapping {
    pub user: String,
    pub mounts: Vec<MountSpec>,
}

/// Id in the third field of a passwd or group line
fn entry_id(line: &str) -> Option<u32> {
    line.split(':').nth(2).and_then(|id| id.trim().parse().ok())
}

fn entry_name(line: &str) -> Option<&str> {
    line.split(':').next().filter(|name| !name.is_empty())
}

fn has_id(content: &str, id: u32) -> bool {
    content.lines().any(|line| entry_id(line) == Some(id))
}

/// A name for the added entry that does not clash with an existing one
fn free_name(content: &str, id: u32) -> String {
    let taken = |candidate: &str| content.lines().any(|line| entry_name(line) == Some(candidate));
    if !taken(AGENT_USER) {
        AGENT_USER.to_string()
    } else {
        format!("{}{}", AGENT_USER, id)
    }
}

fn append_line(content: &str, line: &str) -> String {
    let mut result = content.to_string();
    if !result.is_empty() && !result.ends_with('\n') {
        result.push('\n');
    }
    result.push_str(line);
    result.push('\n');
    result
}

/// passwd content with an agent entry for `ids`, or `None` when the uid already exists
pub fn synthesize_passwd(passwd: &str, ids: HostIds) -> Option<String> {
    if has_id(passwd, ids.uid) {
        return None;
    }
    let name = free_name(passwd, ids.uid);
    Some(append_line(
        passwd,
        &format!(
            "{}:x:{}:{}:Taskbox agent:{}:/bin/sh",
            name, ids.uid, ids.gid, AGENT_HOME
        ),
    ))
}

/// group content with an agent group for `ids`, or `None` when the gid already exists
pub fn synthesize_group(group: &str, ids: HostIds) -> Option<String> {
    if has_id(group, ids.gid) {
        return None;
    }
    let name = free_name(group, ids.gid);
    Some(append_line(group, &format!("{}:x:{}:", name, ids.gid)))
}

fn split_dump(output: &str) -> (String, String) {
    match output.split_once(GROUP_MARKER) {
        Some((passwd, group)) => (
            passwd.trim_end().to_string(),
            group.trim_start_matches('\n').trim_end().to_string(),
        ),
        None => (output.trim_end().to_string(), String::new()),
    }
}

/// Read the image's account files and write overlays into `overlay_dir` when needed.
///
/// Fails with `UnsupportedImage` when the image cannot run `/bin/sh`.
pub async fn reconcile(
    backend: &dyn ContainerBackend,
    image: &str,
    overlay_dir: &Path,
    ids: HostIds,
) -> Result<UserMapping> {
    let script = format!(
        "cat /etc/passwd 2>/dev/null; echo '{}'; cat /etc/group 2>/dev/null",
        GROUP_MARKER
    );
    let output = backend.run_throwaway(image, &script).await?;
    let (passwd, group) = split_dump(&output);

    let mut mounts = Vec::new();

    if let Some(content) = synthesize_passwd(&passwd, ids) {
        let path = overlay_dir.join(PASSWD_OVERLAY);
        fs::write(&path, content)
            .map_err(|e| SandboxError::Prepare(format!("{}: {}", path.display(), e)))?;
        info!("UID {} missing from {}, adding passwd overlay", ids.uid, image);
        mounts.push(MountSpec::new(path, "/etc/passwd").read_only());
    } else {
        debug!("UID {} already present in {}", ids.uid, image);
    }

    if let Some(content) = synthesize_group(&group, ids) {
        let path = overlay_dir.join(GROUP_OVERLAY);
        fs::write(&path, content)
            .map_err(|e| SandboxError::Prepare(format!("{}: {}", path.display(), e)))?;
        info!("GID {} missing from {}, adding group overlay", ids.gid, image);
        mounts.push(MountSpec::new(path, "/etc/group").read_only());
    }

    Ok(UserMapping {
        user: ids.user_spec(),
        mounts,
    })
}
