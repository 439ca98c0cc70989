//! Component installers.
//!
//! Each installer is a small state machine over one remote host:
//! check preconditions, write config, act on containers, verify, then
//! record flags. Verification is a single bounded wait plus one
//! concrete signal, never a polling loop; a failed verification is
//! reported and left for the orchestrator to retry at the component
//! level. Installers re-check their own preconditions and enabled
//! flags at execution time because dispatch order is only approximate.

mod bouncer;
mod crowdsec;
mod log_integration;
mod traefik_logging;
mod traffic_logger;

pub use bouncer::{apply_bouncer, create_application_bouncer};
pub use crowdsec::{install_crowdsec, remove_crowdsec};
pub use log_integration::{integrate_logs, rebuild_acquis};
pub use traefik_logging::{enable_access_logs, enable_header_capture};
pub use traffic_logger::{install_traffic_logger, remove_traffic_logger};

use std::sync::Arc;
use std::time::Duration;

use warden_remote::{HostSpec, RemoteExecutor, StepOutput};

use crate::error::ComponentError;
use crate::model::Server;
use crate::settings::StackSettings;
use crate::store::FleetStore;

/// Everything an installed component can be.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Component {
    /// The CrowdSec agent container plus bouncer wiring on the proxy.
    Crowdsec,
    /// Proxy access-log directives (file, JSON format, buffering).
    AccessLogs,
    /// Header capture directives on the proxy access log.
    HeaderCapture,
    /// Feeding the proxy access log into the agent.
    LogIntegration,
    /// The forward-auth sidecar container.
    TrafficLogger,
    /// Per-application bouncer middleware labels.
    Bouncer,
    /// Per-application firewall rule files on the agent.
    Rules,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InstallPhase {
    NotInstalled,
    Installing,
    Verifying,
    Installed,
    Failed,
}

/// Structured outcome of one installer run, step by step. Warnings are
/// non-fatal deviations (an optional collection that failed to
/// install, a restart that did not happen) the operator should see.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InstallReport {
    pub component: Component,
    pub phase: InstallPhase,
    pub steps: Vec<String>,
    pub warnings: Vec<String>,
}

impl InstallReport {
    pub fn begin(component: Component) -> Self {
        Self {
            component,
            phase: InstallPhase::Installing,
            steps: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn step(&mut self, text: impl Into<String>) {
        let text = text.into();
        tracing::debug!(component = %self.component, step = %text, "install step");
        self.steps.push(text);
    }

    pub fn warn(&mut self, text: impl Into<String>) {
        let text = text.into();
        tracing::warn!(component = %self.component, warning = %text, "install warning");
        self.warnings.push(text);
    }

    pub fn verifying(&mut self) {
        self.phase = InstallPhase::Verifying;
    }

    pub fn installed(mut self) -> Self {
        self.phase = InstallPhase::Installed;
        self
    }
}

/// Shared dependencies handed to every installer.
#[derive(Clone)]
pub struct InstallContext {
    pub executor: Arc<dyn RemoteExecutor>,
    pub store: Arc<FleetStore>,
    pub settings: Arc<StackSettings>,
}

impl InstallContext {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        store: Arc<FleetStore>,
        settings: Arc<StackSettings>,
    ) -> Self {
        Self {
            executor,
            store,
            settings,
        }
    }

    /// Looks the server up or fails the component's precondition.
    pub fn server(&self, name: &str, component: Component) -> Result<Arc<Server>, ComponentError> {
        self.store.server(name).ok_or_else(|| {
            ComponentError::precondition(component.to_string(), format!("unknown server `{name}`"))
        })
    }

    /// Fixed post-action wait before the follow-up verification probe.
    pub async fn settle(&self, seconds: u64) {
        tokio::time::sleep(Duration::from_secs(seconds)).await;
    }
}

// ── Shared command helpers ──

/// `docker ps` status line for a named container; empty when absent.
pub(crate) fn container_status_cmd(name: &str) -> String {
    format!("docker ps --filter name={name} --format '{{{{.Status}}}}'")
}

pub(crate) fn proxy_reload_cmd(proxy_container: &str) -> String {
    format!("docker exec {proxy_container} kill -SIGHUP 1")
}

pub(crate) fn cscli(container: &str, args: &str) -> String {
    format!("docker exec {container} cscli {args}")
}

/// Runs the status probe and checks for a running container. Fails
/// verification naming `step` when the container is not up.
pub(crate) async fn verify_container_up(
    executor: &dyn RemoteExecutor,
    host: &HostSpec,
    container: &str,
    component: Component,
    step: &str,
) -> Result<StepOutput, ComponentError> {
    let output = executor
        .probe(host, step, &container_status_cmd(container))
        .await?;
    if output.stdout.contains("Up") {
        Ok(output)
    } else {
        Err(ComponentError::verification(
            component.to_string(),
            step,
            format!(
                "container `{container}` is not running: {}",
                output.stdout_trimmed()
            ),
        ))
    }
}
