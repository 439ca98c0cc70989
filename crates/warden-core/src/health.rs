//! Health probing and full-stack validation.
//!
//! Two distinct read paths share this module. [`HealthValidator::status`]
//! answers "is the agent alive right now" for dashboard reads, three
//! independent booleans behind a short TTL cache so a busy status page
//! does not hammer hosts over SSH. [`HealthValidator::validate_server`]
//! is the heavier reconciliation pass: it re-probes every component whose
//! feature flag claims to be installed and persists a structured
//! [`ValidationDetails`] record on the server. Probe failures are
//! recorded, never propagated, so one dead component cannot hide the
//! state of the others.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::{Duration, Instant};
use warden_remote::{RemoteExecutor, Script};

use crate::error::ComponentError;
use crate::install::container_status_cmd;
use crate::model::{ComponentCheck, SecurityUpdate, Server, ValidationDetails};
use crate::settings::StackSettings;
use crate::store::FleetStore;

/// Point-in-time agent health, as probed over SSH.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrowdsecHealth {
    pub container_running: bool,
    pub lapi_responding: bool,
    pub bouncer_configured: bool,
    /// Agent version as reported by the in-container CLI, when the
    /// local API answered.
    pub version: Option<String>,
    pub error: Option<String>,
}

impl CrowdsecHealth {
    fn unhealthy() -> Self {
        Self {
            container_running: false,
            lapi_responding: false,
            bouncer_configured: false,
            version: None,
            error: None,
        }
    }

    pub fn healthy(&self) -> bool {
        self.container_running && self.lapi_responding && self.bouncer_configured
    }
}

/// What [`HealthValidator::repair`] did about an unhealthy agent.
#[derive(Debug, Clone, Serialize)]
pub struct RepairOutcome {
    pub actions: Vec<String>,
    pub warnings: Vec<String>,
    /// Health re-probed after the fix attempts.
    pub health: CrowdsecHealth,
}

pub struct HealthValidator {
    executor: Arc<dyn RemoteExecutor>,
    store: Arc<FleetStore>,
    settings: Arc<StackSettings>,
    cache: DashMap<String, (Instant, CrowdsecHealth)>,
}

impl HealthValidator {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        store: Arc<FleetStore>,
        settings: Arc<StackSettings>,
    ) -> Self {
        Self {
            executor,
            store,
            settings,
            cache: DashMap::new(),
        }
    }

    fn server(&self, name: &str) -> Result<Arc<Server>, ComponentError> {
        self.store.server(name).ok_or_else(|| {
            ComponentError::precondition("health", format!("unknown server `{name}`"))
        })
    }

    /// Agent health for one server. Served from cache unless the entry
    /// is older than the TTL or `force` is set.
    pub async fn status(
        &self,
        server_name: &str,
        force: bool,
    ) -> Result<CrowdsecHealth, ComponentError> {
        let server = self.server(server_name)?;
        let ttl = Duration::from_secs(self.settings.health_cache_ttl_secs);
        if !force {
            if let Some(entry) = self.cache.get(server_name) {
                if entry.0.elapsed() < ttl {
                    return Ok(entry.1.clone());
                }
            }
        }

        let health = self.probe(&server).await;
        self.cache
            .insert(server_name.to_owned(), (Instant::now(), health.clone()));
        Ok(health)
    }

    /// Runs the three probes. An unreachable host yields an all-false
    /// record carrying the transport error, not an `Err`, so status
    /// surfaces keep rendering.
    async fn probe(&self, server: &Server) -> CrowdsecHealth {
        let mut health = CrowdsecHealth::unhealthy();
        let host = &server.host;
        let container = &self.settings.container_name;

        let status = match self
            .executor
            .probe(host, "container-status", &container_status_cmd(container))
            .await
        {
            Ok(output) => output,
            Err(err) => {
                health.error = Some(err.to_string());
                return health;
            }
        };
        health.container_running = status.stdout.contains("Up");
        if !health.container_running {
            return health;
        }

        match self
            .executor
            .probe(
                host,
                "lapi-version",
                &format!("docker exec {container} cscli version --output json"),
            )
            .await
        {
            Ok(output) if output.success() => {
                health.lapi_responding = true;
                health.version = serde_json::from_str::<serde_json::Value>(&output.stdout)
                    .ok()
                    .and_then(|v| v.get("version").and_then(|v| v.as_str()).map(str::to_owned))
                    .or_else(|| Some("unknown".to_owned()));
            }
            Ok(output) => {
                health.error = Some(format!("LAPI not responding: {}", output.stderr.trim()));
            }
            Err(err) => {
                health.error = Some(format!("LAPI not responding: {err}"));
            }
        }

        if let Ok(output) = self
            .executor
            .probe(
                host,
                "bouncer-list",
                &format!("docker exec {container} cscli bouncers list -o json"),
            )
            .await
        {
            if output.success() {
                health.bouncer_configured =
                    serde_json::from_str::<serde_json::Value>(&output.stdout)
                        .ok()
                        .and_then(|v| v.as_array().map(|a| !a.is_empty()))
                        .unwrap_or(false);
            }
        }

        health
    }

    /// Narrow auto-fix pass for an unhealthy agent: a stopped container
    /// gets a restart-or-recreate, a missing bouncer only gets flagged
    /// (minting a new key would strand every application label that
    /// embeds the old one).
    pub async fn repair(&self, server_name: &str) -> Result<RepairOutcome, ComponentError> {
        let server = self.server(server_name)?;
        let health = self.status(server_name, true).await?;
        let mut actions = Vec::new();
        let mut warnings = Vec::new();

        if health.healthy() {
            return Ok(RepairOutcome {
                actions,
                warnings,
                health,
            });
        }

        if !health.container_running {
            let service = &self.settings.container_name;
            let restart = Script::new().step(
                "container-restart",
                format!(
                    "cd {base} && (docker compose restart {service} || docker compose up -d {service})",
                    base = self.settings.base_path
                ),
            );
            self.executor.run(&server.host, &restart).await?;
            actions.push("restarted agent container".to_owned());
        }
        if !health.bouncer_configured {
            warnings.push(
                "bouncer is not registered; recreating the key requires re-wiring application labels"
                    .to_owned(),
            );
        }

        let health = self.status(server_name, true).await?;
        Ok(RepairOutcome {
            actions,
            warnings,
            health,
        })
    }

    /// Full-stack validation pass. Components whose feature flag is off
    /// fail their check without any remote I/O; the aggregate result is
    /// persisted on the server record.
    pub async fn validate_server(
        &self,
        server_name: &str,
    ) -> Result<ValidationDetails, ComponentError> {
        let server = self.server(server_name)?;

        let crowdsec = if server.security.crowdsec_available {
            self.check_crowdsec(&server).await
        } else {
            ComponentCheck::fail("agent not marked available")
        };
        let traefik_logging = if server.security.traefik_logging_enabled {
            self.check_access_log(&server).await
        } else {
            ComponentCheck::fail("access logging not enabled")
        };
        let traffic_logger = if server.security.traffic_logger_installed {
            self.check_traffic_logger(&server).await
        } else {
            ComponentCheck::fail("sidecar not installed")
        };

        let details = ValidationDetails {
            crowdsec,
            traefik_logging,
            traffic_logger,
            validated_at: Utc::now(),
        };
        self.store.update_security(
            server_name,
            SecurityUpdate::default()
                .installation_validated(details.all_passed())
                .last_validation_at(details.validated_at)
                .validation_details(details.clone()),
        )?;
        Ok(details)
    }

    async fn check_crowdsec(&self, server: &Server) -> ComponentCheck {
        match self
            .executor
            .probe(
                &server.host,
                "validate-agent",
                &container_status_cmd(&self.settings.container_name),
            )
            .await
        {
            Ok(output) if output.stdout.contains("Up") => {
                ComponentCheck::pass(output.stdout_trimmed())
            }
            Ok(_) => ComponentCheck::fail("agent container is not running"),
            Err(err) => ComponentCheck::fail(err.to_string()),
        }
    }

    async fn check_access_log(&self, server: &Server) -> ComponentCheck {
        let log = self.settings.access_log_host_path();
        let cmd = format!("test -f {log} && tail -1 {log} | jq empty 2>/dev/null");
        match self
            .executor
            .probe(&server.host, "validate-access-log", &cmd)
            .await
        {
            Ok(output) if output.success() => {
                ComponentCheck::pass("access log present, JSON format")
            }
            Ok(_) => ComponentCheck::fail("access log missing or not JSON"),
            Err(err) => ComponentCheck::fail(err.to_string()),
        }
    }

    async fn check_traffic_logger(&self, server: &Server) -> ComponentCheck {
        let cmd = format!(
            "curl -s http://localhost:{}/health",
            self.settings.logger_port
        );
        match self
            .executor
            .probe(&server.host, "validate-sidecar", &cmd)
            .await
        {
            Ok(output) if output.stdout.contains("OK") || output.stdout.contains("healthy") => {
                ComponentCheck::pass("health endpoint responding")
            }
            Ok(output) => ComponentCheck::fail(format!(
                "health endpoint not responding: {}",
                output.stdout_trimmed()
            )),
            Err(err) => ComponentCheck::fail(err.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use warden_remote::testing::ScriptedExecutor;
    use warden_remote::{HostSpec, StepOutput};

    fn store_with_server() -> Arc<FleetStore> {
        let store = FleetStore::new();
        store.upsert_server(Server::new("web-1", HostSpec::new("web-1", "203.0.113.7")));
        Arc::new(store)
    }

    fn validator(store: Arc<FleetStore>, executor: Arc<ScriptedExecutor>) -> HealthValidator {
        HealthValidator::new(executor, store, Arc::new(StackSettings::default()))
    }

    fn healthy_executor() -> ScriptedExecutor {
        ScriptedExecutor::new()
            .respond(
                "docker ps --filter name=crowdsec",
                StepOutput::ok("Up 2 hours"),
            )
            .respond(
                "cscli version --output json",
                StepOutput::ok(r#"{"version":"v1.6.4"}"#),
            )
            .respond(
                "cscli bouncers list -o json",
                StepOutput::ok(r#"[{"name":"warden-traefik-web-1"}]"#),
            )
    }

    #[tokio::test]
    async fn all_probes_passing_is_healthy() {
        let validator = validator(store_with_server(), Arc::new(healthy_executor()));
        let health = validator.status("web-1", false).await.unwrap();
        assert!(health.healthy());
        assert_eq!(health.version.as_deref(), Some("v1.6.4"));
        assert!(health.error.is_none());
    }

    #[tokio::test]
    async fn stopped_container_short_circuits_the_other_probes() {
        let executor = Arc::new(
            ScriptedExecutor::new()
                .respond("docker ps --filter name=crowdsec", StepOutput::ok("")),
        );
        let validator = validator(store_with_server(), Arc::clone(&executor));
        let health = validator.status("web-1", false).await.unwrap();
        assert!(!health.container_running);
        assert!(!health.healthy());
        assert_eq!(executor.count_matching("cscli"), 0);
    }

    #[tokio::test]
    async fn lapi_failure_is_recorded_not_raised() {
        let executor = ScriptedExecutor::new()
            .respond(
                "docker ps --filter name=crowdsec",
                StepOutput::ok("Up 2 hours"),
            )
            .respond(
                "cscli version --output json",
                StepOutput {
                    stdout: String::new(),
                    stderr: "connection refused".to_owned(),
                    code: Some(1),
                },
            )
            .respond("cscli bouncers list -o json", StepOutput::ok("[]"));
        let validator = validator(store_with_server(), Arc::new(executor));
        let health = validator.status("web-1", false).await.unwrap();
        assert!(health.container_running);
        assert!(!health.lapi_responding);
        assert!(health.error.as_deref().unwrap().contains("LAPI not responding"));
    }

    #[tokio::test]
    async fn unreachable_host_yields_all_false_with_error() {
        let executor = ScriptedExecutor::new()
            .respond_unreachable("docker ps --filter name=crowdsec", "connection timed out");
        let validator = validator(store_with_server(), Arc::new(executor));
        let health = validator.status("web-1", false).await.unwrap();
        assert!(!health.healthy());
        assert!(health.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn cache_serves_reads_until_the_ttl_lapses() {
        let executor = Arc::new(healthy_executor());
        let validator = validator(store_with_server(), Arc::clone(&executor));

        validator.status("web-1", false).await.unwrap();
        validator.status("web-1", false).await.unwrap();
        assert_eq!(executor.count_matching("docker ps"), 1);

        tokio::time::advance(Duration::from_secs(121)).await;
        validator.status("web-1", false).await.unwrap();
        assert_eq!(executor.count_matching("docker ps"), 2);
    }

    #[tokio::test]
    async fn forced_status_bypasses_the_cache() {
        let executor = Arc::new(healthy_executor());
        let validator = validator(store_with_server(), Arc::clone(&executor));
        validator.status("web-1", false).await.unwrap();
        validator.status("web-1", true).await.unwrap();
        assert_eq!(executor.count_matching("docker ps"), 2);
    }

    #[tokio::test]
    async fn repair_restarts_a_stopped_container_and_flags_missing_bouncers() {
        let executor = Arc::new(
            ScriptedExecutor::new()
                .respond_seq(
                    "docker ps --filter name=crowdsec",
                    vec![StepOutput::ok(""), StepOutput::ok("Up 1 second")],
                )
                .respond(
                    "cscli version --output json",
                    StepOutput::ok(r#"{"version":"v1.6.4"}"#),
                )
                .respond("cscli bouncers list -o json", StepOutput::ok("[]")),
        );
        let validator = validator(store_with_server(), Arc::clone(&executor));

        let outcome = validator.repair("web-1").await.unwrap();
        assert_eq!(outcome.actions, vec!["restarted agent container"]);
        assert_eq!(executor.count_matching("docker compose restart crowdsec"), 1);
        assert!(outcome.warnings.iter().any(|w| w.contains("manual") || w.contains("re-wiring")));
        assert!(outcome.health.container_running);
        assert!(!outcome.health.bouncer_configured);
    }

    #[tokio::test]
    async fn validation_skips_probes_for_unset_flags() {
        let executor = Arc::new(ScriptedExecutor::new());
        let store = store_with_server();
        let validator = validator(Arc::clone(&store), Arc::clone(&executor));

        let details = validator.validate_server("web-1").await.unwrap();
        assert!(!details.all_passed());
        assert_eq!(
            details.failed_components(),
            vec!["crowdsec", "traefik-logging", "traffic-logger"]
        );
        assert!(executor.commands().is_empty());
        assert!(!store.server("web-1").unwrap().security.installation_validated);
    }

    #[tokio::test]
    async fn validation_persists_a_fully_passing_record() {
        let store = store_with_server();
        store
            .update_security(
                "web-1",
                SecurityUpdate::default()
                    .crowdsec_installed(true)
                    .crowdsec_available(true)
                    .traefik_logging_enabled(true)
                    .traffic_logger_installed(true),
            )
            .unwrap();
        let executor = ScriptedExecutor::new()
            .respond(
                "docker ps --filter name=crowdsec",
                StepOutput::ok("Up 4 hours"),
            )
            .respond("tail -1", StepOutput::ok(""))
            .respond(
                "curl -s http://localhost:3001/health",
                StepOutput::ok(r#"{"status":"healthy"}"#),
            );
        let validator = validator(Arc::clone(&store), Arc::new(executor));

        let details = validator.validate_server("web-1").await.unwrap();
        assert!(details.all_passed());

        let server = store.server("web-1").unwrap();
        assert!(server.security.installation_validated);
        assert!(server.security.last_validation_at.is_some());
        assert!(server.security.validation_details.as_ref().unwrap().all_passed());
    }

    #[tokio::test]
    async fn one_failing_component_is_isolated_in_the_record() {
        let store = store_with_server();
        store
            .update_security(
                "web-1",
                SecurityUpdate::default()
                    .crowdsec_installed(true)
                    .crowdsec_available(true)
                    .traefik_logging_enabled(true)
                    .traffic_logger_installed(true),
            )
            .unwrap();
        let executor = ScriptedExecutor::new()
            .respond(
                "docker ps --filter name=crowdsec",
                StepOutput::ok("Up 4 hours"),
            )
            .respond("tail -1", StepOutput::ok(""))
            .respond(
                "curl -s http://localhost:3001/health",
                StepOutput {
                    stdout: String::new(),
                    stderr: "connection refused".to_owned(),
                    code: Some(7),
                },
            );
        let validator = validator(Arc::clone(&store), Arc::new(executor));

        let details = validator.validate_server("web-1").await.unwrap();
        assert!(!details.all_passed());
        assert_eq!(details.failed_components(), vec!["traffic-logger"]);
        assert!(!store.server("web-1").unwrap().security.installation_validated);
    }
}
