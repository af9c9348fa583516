//! `ssh` / `scp` invocations against the lab host.
//!
//! Credentials are a one-off password per job, so every invocation goes
//! through `sshpass -e` with host-key persistence disabled and public-key
//! auth switched off.

use std::path::Path;

use serde::Serialize;

use crate::core::config::RemoteConfig;
use crate::core::process::CommandSpec;

/// Environment variable `sshpass -e` reads the password from.
const SSHPASS_ENV: &str = "SSHPASS";

/// Host and credentials an image is delivered to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryTarget {
    pub host: String,
    pub user: String,
    #[serde(skip)]
    pub password: String,
}

impl DeliveryTarget {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    /// Build a target from optional request fields. All three must be given
    /// together; none at all means "fetch only".
    pub fn from_parts(
        host: Option<&str>,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<Option<Self>, String> {
        let host = host.map(str::trim).unwrap_or_default();
        let user = user.map(str::trim).unwrap_or_default();
        let password = password.unwrap_or_default();

        match (host.is_empty(), user.is_empty(), password.is_empty()) {
            (true, true, true) => Ok(None),
            (false, false, false) => Ok(Some(Self::new(host, user, password))),
            _ => Err("Host, user and password must be given together".to_string()),
        }
    }

    pub fn is_ipv6(&self) -> bool {
        is_ipv6_literal(&self.host)
    }
}

pub fn strip_brackets(address: &str) -> &str {
    let trimmed = address.trim();
    trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed)
}

pub fn is_ipv6_literal(address: &str) -> bool {
    strip_brackets(address).contains(':')
}

/// `user@host`, or `user@[host]` when `brackets` is set.
pub fn format_target(user: &str, address: &str, brackets: bool) -> String {
    let host = strip_brackets(address);
    if brackets {
        format!("{user}@[{host}]")
    } else {
        format!("{user}@{host}")
    }
}

/// True when `path` reaches the remote side intact without quoting.
///
/// scp hands the destination to the remote shell under the legacy protocol
/// and uses it verbatim under SFTP, so only paths that read the same both
/// ways are accepted as copy destinations.
pub fn is_plain_remote_path(path: &Path) -> bool {
    let raw = path.to_string_lossy();
    shell_words::quote(&raw) == raw
}

/// Builds `ssh`/`scp` command lines from the `[remote]` configuration.
#[derive(Debug, Clone)]
pub struct RemoteTransport {
    sshpass: String,
    ssh: String,
    scp: String,
    connect_timeout_secs: u32,
}

impl RemoteTransport {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            sshpass: config.sshpass.clone(),
            ssh: config.ssh.clone(),
            scp: config.scp.clone(),
            connect_timeout_secs: config.connect_timeout_secs,
        }
    }

    fn common_options(&self) -> Vec<String> {
        [
            "StrictHostKeyChecking=no".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "PreferredAuthentications=password".to_string(),
            "PubkeyAuthentication=no".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
        ]
        .into_iter()
        .flat_map(|opt| ["-o".to_string(), opt])
        .collect()
    }

    /// Run `command` through the remote shell.
    pub fn remote_command(&self, target: &DeliveryTarget, command: &str) -> CommandSpec {
        CommandSpec::new(&self.sshpass)
            .arg("-e")
            .arg(&self.ssh)
            .args(self.common_options())
            .arg(format_target(&target.user, &target.host, false))
            .arg(command)
            .env(SSHPASS_ENV, &target.password)
    }

    /// `mkdir -p` on the remote side, path quoted for the remote shell.
    pub fn make_dir(&self, target: &DeliveryTarget, remote_dir: &Path) -> CommandSpec {
        let quoted = shell_words::quote(&remote_dir.to_string_lossy()).into_owned();
        self.remote_command(target, &format!("mkdir -p {quoted}"))
    }

    /// Recursively copy the contents of `local_dir` into `remote_dir`.
    pub fn copy_tree(
        &self,
        target: &DeliveryTarget,
        local_dir: &Path,
        remote_dir: &Path,
    ) -> CommandSpec {
        let ipv6 = target.is_ipv6();
        let mut spec = CommandSpec::new(&self.sshpass)
            .arg("-e")
            .arg(&self.scp)
            .arg("-r");
        if ipv6 {
            spec = spec.arg("-6");
        }
        spec.args(self.common_options())
            .arg(format!("{}/.", local_dir.display()))
            .arg(format!(
                "{}:{}",
                format_target(&target.user, &target.host, ipv6),
                remote_dir.display()
            ))
            .env(SSHPASS_ENV, &target.password)
    }
}
