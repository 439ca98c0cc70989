//! The [`RemoteExecutor`] trait — the single seam between orchestration
//! logic and the wire. Production code talks to hosts through
//! [`SshExecutor`](crate::ssh::SshExecutor); tests swap in
//! [`ScriptedExecutor`](crate::testing::ScriptedExecutor).

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::script::{CommandStep, Script, StepOutput};

/// Connection coordinates for one managed host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSpec {
    /// Human-readable label used in logs and error messages.
    pub name: String,
    /// Hostname or IP address the transport dials.
    pub address: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default = "default_ssh_user")]
    pub user: String,
    /// Private key path; `None` falls back to the SSH agent / defaults.
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_user() -> String {
    "root".to_owned()
}

impl HostSpec {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port: 22,
            user: "root".to_owned(),
            identity_file: None,
        }
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    #[must_use]
    pub fn identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// `user@address`, the target both `ssh` and `scp` expect.
    pub fn ssh_target(&self) -> String {
        format!("{}@{}", self.user, self.address)
    }
}

/// Abstract command transport to a managed host.
///
/// Implementations provide the two primitives [`run_step`](Self::run_step)
/// and [`upload`](Self::upload); script execution with expectation
/// enforcement is layered on top and shared by every transport.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Execute one step and return its raw output. No expectation is
    /// enforced here; callers that want enforcement go through
    /// [`run`](Self::run).
    async fn run_step(&self, host: &HostSpec, step: &CommandStep)
    -> Result<StepOutput, RemoteError>;

    /// Write `content` to `remote_path` on the host, replacing any
    /// existing file atomically (stage-then-rename).
    async fn upload(
        &self,
        host: &HostSpec,
        remote_path: &str,
        content: &str,
    ) -> Result<(), RemoteError>;

    /// Execute a whole script in order, enforcing each step's [`Expect`]
    /// predicate and aborting on the first violation.
    ///
    /// [`Expect`]: crate::script::Expect
    async fn run(&self, host: &HostSpec, script: &Script) -> Result<Vec<StepOutput>, RemoteError> {
        let mut outputs = Vec::with_capacity(script.len());
        for step in script.steps() {
            let output = self.run_step(host, step).await?;
            output.enforce(&host.name, step)?;
            outputs.push(output);
        }
        Ok(outputs)
    }

    /// Run a single ad-hoc command without any expectation, returning the
    /// raw output for the caller to interpret. Health probes live here.
    async fn probe(
        &self,
        host: &HostSpec,
        label: &str,
        command: &str,
    ) -> Result<StepOutput, RemoteError> {
        self.run_step(host, &CommandStep::new(label, command).best_effort())
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn host_spec_defaults() {
        let host = HostSpec::new("edge-1", "203.0.113.9");
        assert_eq!(host.port, 22);
        assert_eq!(host.ssh_target(), "root@203.0.113.9");
    }

    #[test]
    fn host_spec_builder_overrides() {
        let host = HostSpec::new("edge-1", "203.0.113.9")
            .port(2222)
            .user("deploy")
            .identity_file("/etc/warden/id_ed25519");
        assert_eq!(host.port, 2222);
        assert_eq!(host.ssh_target(), "deploy@203.0.113.9");
        assert!(host.identity_file.is_some());
    }
}
