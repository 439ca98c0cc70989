//! OpenSSH-backed transport.
//!
//! Shells out to the local `ssh`/`scp` binaries rather than linking a
//! protocol library: key management, agent forwarding, and jump-host
//! config then behave exactly as the operator's `~/.ssh/config` says.
//! Every invocation runs non-interactive (`BatchMode=yes`) under a
//! caller-visible deadline.

use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::error::RemoteError;
use crate::executor::{HostSpec, RemoteExecutor};
use crate::script::{CommandStep, StepOutput};

/// Suffix for the staging path used by atomic uploads.
const UPLOAD_STAGE_SUFFIX: &str = ".warden-upload";

/// OpenSSH reserves exit status 255 for client-side failures (DNS,
/// refused connection, rejected key). Remote commands cannot produce it.
const SSH_CLIENT_FAILURE: i32 = 255;

/// Tunables for the OpenSSH transport.
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// `ConnectTimeout` passed to the SSH client.
    pub connect_timeout: Duration,
    /// Deadline for one remote command, enforced locally.
    pub command_timeout: Duration,
    /// When `false`, host keys are accepted blindly
    /// (`StrictHostKeyChecking=no`, throwaway known-hosts file). Fleet
    /// hosts are provisioned before their keys can be distributed, so
    /// this is the default.
    pub strict_host_keys: bool,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(300),
            strict_host_keys: false,
        }
    }
}

/// [`RemoteExecutor`] that spawns the system `ssh` and `scp` binaries.
#[derive(Debug, Clone, Default)]
pub struct SshExecutor {
    options: SshOptions,
}

impl SshExecutor {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    /// `-o` flags shared by `ssh` and `scp` invocations.
    fn common_args(&self, host: &HostSpec) -> Vec<String> {
        let mut args = vec![
            "-o".to_owned(),
            "BatchMode=yes".to_owned(),
            "-o".to_owned(),
            format!("ConnectTimeout={}", self.options.connect_timeout.as_secs()),
        ];
        if !self.options.strict_host_keys {
            args.push("-o".to_owned());
            args.push("StrictHostKeyChecking=no".to_owned());
            args.push("-o".to_owned());
            args.push("UserKnownHostsFile=/dev/null".to_owned());
            args.push("-o".to_owned());
            args.push("LogLevel=ERROR".to_owned());
        }
        if let Some(identity) = &host.identity_file {
            args.push("-i".to_owned());
            args.push(identity.display().to_string());
        }
        args
    }

    async fn spawn(
        &self,
        program: &str,
        args: &[String],
        host: &HostSpec,
    ) -> Result<StepOutput, RemoteError> {
        trace!(program, ?args, host = %host.name, "spawning transport process");
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        let timeout = self.options.command_timeout;
        let output = tokio::time::timeout(timeout, child).await.map_err(|_| {
            RemoteError::Timeout {
                host: host.name.clone(),
                timeout_secs: timeout.as_secs(),
            }
        })??;

        let step = StepOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
        };
        if step.code == Some(SSH_CLIENT_FAILURE) {
            return Err(RemoteError::Unreachable {
                host: host.name.clone(),
                detail: step.stderr.trim().to_owned(),
            });
        }
        Ok(step)
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run_step(
        &self,
        host: &HostSpec,
        step: &CommandStep,
    ) -> Result<StepOutput, RemoteError> {
        debug!(host = %host.name, step = %step.label, "running remote step");
        let mut args = self.common_args(host);
        args.push("-p".to_owned());
        args.push(host.port.to_string());
        args.push(host.ssh_target());
        args.push(step.command.clone());
        self.spawn("ssh", &args, host).await
    }

    async fn upload(
        &self,
        host: &HostSpec,
        remote_path: &str,
        content: &str,
    ) -> Result<(), RemoteError> {
        debug!(host = %host.name, remote_path, bytes = content.len(), "uploading file");

        let mut staged = tempfile::NamedTempFile::new()?;
        staged.write_all(content.as_bytes())?;
        staged.flush()?;

        let stage_path = format!("{remote_path}{UPLOAD_STAGE_SUFFIX}");
        let mut args = self.common_args(host);
        args.push("-P".to_owned());
        args.push(host.port.to_string());
        args.push(staged.path().display().to_string());
        args.push(format!("{}:{stage_path}", host.ssh_target()));

        let copied = self.spawn("scp", &args, host).await?;
        if !copied.success() {
            return Err(RemoteError::UploadFailed {
                host: host.name.clone(),
                remote_path: remote_path.to_owned(),
                detail: copied.stderr.trim().to_owned(),
            });
        }

        // Rename into place so readers never observe a half-written file.
        let rename = CommandStep::new(
            "upload-rename",
            format!("mv -f {stage_path} {remote_path}"),
        );
        let renamed = self.run_step(host, &rename).await?;
        if renamed.success() {
            Ok(())
        } else {
            Err(RemoteError::UploadFailed {
                host: host.name.clone(),
                remote_path: remote_path.to_owned(),
                detail: renamed.stderr.trim().to_owned(),
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn common_args_default_disables_host_key_checks() {
        let executor = SshExecutor::default();
        let host = HostSpec::new("edge-1", "203.0.113.9");
        let args = executor.common_args(&host).join(" ");
        assert!(args.contains("BatchMode=yes"));
        assert!(args.contains("StrictHostKeyChecking=no"));
        assert!(args.contains("ConnectTimeout=10"));
    }

    #[test]
    fn common_args_strict_mode_keeps_known_hosts() {
        let executor = SshExecutor::new(SshOptions {
            strict_host_keys: true,
            ..SshOptions::default()
        });
        let host = HostSpec::new("edge-1", "203.0.113.9");
        let args = executor.common_args(&host).join(" ");
        assert!(!args.contains("StrictHostKeyChecking"));
        assert!(!args.contains("UserKnownHostsFile"));
    }

    #[test]
    fn identity_file_is_passed_through() {
        let executor = SshExecutor::default();
        let host = HostSpec::new("edge-1", "203.0.113.9").identity_file("/tmp/key");
        let args = executor.common_args(&host);
        let at = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[at + 1], "/tmp/key");
    }
}
