//! Stack orchestration.
//!
//! One orchestrator per process owns the job queue and the services
//! that do the actual work: installers, health validation, the rule
//! engine and the alert sweep. Full installs are dispatched as a
//! staggered schedule rather than a chained pipeline; every installer
//! re-checks its own preconditions at execution time, and a validation
//! job at the tail queues targeted reinstalls for whatever is still
//! missing, up to a bounded number of attempts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::alerts::AlertSyncService;
use crate::error::ComponentError;
use crate::health::HealthValidator;
use crate::install::{self, Component, InstallContext, InstallReport};
use crate::model::{Application, FirewallConfig};
use crate::queue::{self, Job, JobQueue, JobReceiver};
use crate::rules::RuleEngine;

// ── Install schedule ──

// Offsets in seconds for a full stack install. Each stage gets a head
// start over the one that depends on it: the agent needs to be up
// before logs are wired in, and validation runs once everything has
// had time to settle.
const STAGE_CROWDSEC: u64 = 10;
const STAGE_ACCESS_LOGS: u64 = 40;
const STAGE_HEADER_CAPTURE: u64 = 55;
const STAGE_LOG_INTEGRATION: u64 = 70;
const STAGE_TRAFFIC_LOGGER: u64 = 130;
const STAGE_VALIDATE: u64 = 370;

// Retry delays when validation finds a component down.
const RETRY_CROWDSEC: u64 = 120;
const RETRY_ACCESS_LOGS: u64 = 60;
const RETRY_TRAFFIC_LOGGER: u64 = 180;
const RETRY_REVALIDATE: u64 = 240;

/// Grace period between a firewall toggle and the redeploy that makes
/// the new labels live.
const REDEPLOY_DELAY_SECS: u64 = 5;

/// Seam for pushing recompiled labels live. Container deployment is
/// owned by the control plane; the engine only signals that an
/// application's labels changed.
#[async_trait]
pub trait RedeployTrigger: Send + Sync {
    async fn redeploy(&self, application: &Application) -> Result<(), ComponentError>;
}

/// Default trigger when no control plane is wired in: log and move on.
/// Labels then apply on the application's next regular deploy.
#[derive(Debug, Default)]
pub struct NoopRedeploy;

#[async_trait]
impl RedeployTrigger for NoopRedeploy {
    async fn redeploy(&self, application: &Application) -> Result<(), ComponentError> {
        tracing::debug!(
            application = %application.uuid,
            "no redeploy trigger wired; labels apply on next deploy"
        );
        Ok(())
    }
}

/// Owns the job queue and runs jobs against the fleet.
pub struct StackOrchestrator {
    ctx: InstallContext,
    health: HealthValidator,
    rules: RuleEngine,
    alerts: AlertSyncService,
    queue: JobQueue,
    receiver: Mutex<JobReceiver>,
    redeploy: Arc<dyn RedeployTrigger>,
}

impl StackOrchestrator {
    pub fn new(ctx: InstallContext) -> Self {
        Self::with_redeploy(ctx, Arc::new(NoopRedeploy))
    }

    pub fn with_redeploy(ctx: InstallContext, redeploy: Arc<dyn RedeployTrigger>) -> Self {
        let (queue, receiver) = queue::channel();
        let health = HealthValidator::new(
            Arc::clone(&ctx.executor),
            Arc::clone(&ctx.store),
            Arc::clone(&ctx.settings),
        );
        let rules = RuleEngine::new(ctx.clone());
        let alerts = AlertSyncService::new(
            Arc::clone(&ctx.executor),
            Arc::clone(&ctx.store),
            Arc::clone(&ctx.settings),
        );
        Self {
            ctx,
            health,
            rules,
            alerts,
            queue,
            receiver: Mutex::new(receiver),
            redeploy,
        }
    }

    /// Handle for dispatching jobs from outside the run loop.
    pub fn queue(&self) -> JobQueue {
        self.queue.clone()
    }

    pub fn health(&self) -> &HealthValidator {
        &self.health
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    pub fn alerts(&self) -> &AlertSyncService {
        &self.alerts
    }

    /// Queues a full stack install for one server on the staggered
    /// schedule. Returns immediately; the run loop does the work.
    pub fn install_stack(&self, server: &str) {
        let stages = [
            (
                STAGE_CROWDSEC,
                Job::InstallCrowdsec {
                    server: server.to_owned(),
                },
            ),
            (
                STAGE_ACCESS_LOGS,
                Job::EnableAccessLogs {
                    server: server.to_owned(),
                },
            ),
            (
                STAGE_HEADER_CAPTURE,
                Job::EnableHeaderCapture {
                    server: server.to_owned(),
                },
            ),
            (
                STAGE_LOG_INTEGRATION,
                Job::IntegrateLogs {
                    server: server.to_owned(),
                },
            ),
            (
                STAGE_TRAFFIC_LOGGER,
                Job::InstallTrafficLogger {
                    server: server.to_owned(),
                },
            ),
            (
                STAGE_VALIDATE,
                Job::ValidateStack {
                    server: server.to_owned(),
                    attempt: 1,
                },
            ),
        ];
        for (offset, job) in stages {
            self.queue.dispatch_after(Duration::from_secs(offset), job);
        }
        tracing::info!(server, "stack install scheduled");
    }

    /// Tears the stack down on one server, sidecar first so the proxy
    /// chain never points at a dead middleware.
    pub async fn remove_stack(&self, server: &str) -> Result<Vec<InstallReport>, ComponentError> {
        let sidecar = install::remove_traffic_logger(&self.ctx, server).await?;
        let agent = install::remove_crowdsec(&self.ctx, server).await?;
        Ok(vec![sidecar, agent])
    }

    /// Turns the firewall on for one application: persist the config,
    /// queue whatever stack pieces are still missing on its server,
    /// then queue rule deployment and standing IP bans. A redeploy is
    /// scheduled after a short grace period so the new labels go live.
    pub async fn enable_firewall(
        &self,
        application: &Uuid,
        mut config: FirewallConfig,
    ) -> Result<(), ComponentError> {
        let app = self.ctx.store.application(application).ok_or_else(|| {
            ComponentError::precondition(
                Component::Rules.to_string(),
                format!("unknown application `{application}`"),
            )
        })?;
        let server = self.ctx.server(&app.server, Component::Rules)?;
        if !server.security.crowdsec_installed || !server.security.crowdsec_available {
            return Err(ComponentError::precondition(
                Component::Rules.to_string(),
                format!(
                    "server `{}` has no running agent; install the stack first",
                    server.name
                ),
            ));
        }

        config.enabled = true;
        let app = self.ctx.store.update_firewall(application, Some(config))?;

        if !server.security.traefik_logging_enabled {
            self.queue.dispatch(Job::EnableAccessLogs {
                server: server.name.clone(),
            });
        }
        if !server.security.traffic_logger_installed {
            self.queue.dispatch(Job::InstallTrafficLogger {
                server: server.name.clone(),
            });
        }
        self.queue.dispatch(Job::DeployRules {
            application: *application,
        });
        self.queue.dispatch(Job::ApplyIpBans {
            application: *application,
        });
        self.schedule_redeploy(app);
        tracing::info!(application = %application, "firewall enabled");
        Ok(())
    }

    /// Turns the firewall off. The config is kept (disabled) so rule
    /// definitions survive a later re-enable; agent-side artifacts and
    /// standing decisions are queued for removal.
    pub async fn disable_firewall(&self, application: &Uuid) -> Result<(), ComponentError> {
        let app = self.ctx.store.application(application).ok_or_else(|| {
            ComponentError::precondition(
                Component::Rules.to_string(),
                format!("unknown application `{application}`"),
            )
        })?;
        let Some(config) = app.firewall.clone() else {
            tracing::debug!(application = %application, "no firewall config; nothing to disable");
            return Ok(());
        };

        let disabled = FirewallConfig {
            enabled: false,
            ..config
        };
        let app = self.ctx.store.update_firewall(application, Some(disabled))?;

        self.queue.dispatch(Job::RemoveRules {
            application: *application,
        });
        self.queue.dispatch(Job::RemoveIpBans {
            application: *application,
        });
        self.schedule_redeploy(app);
        tracing::info!(application = %application, "firewall disabled");
        Ok(())
    }

    /// Daemon loop: runs jobs until the queue side is dropped.
    pub async fn run(&self) {
        let mut receiver = self.receiver.lock().await;
        while let Some(job) = receiver.recv().await {
            self.handle(job).await;
            receiver.mark_done();
        }
    }

    /// Drains the queue, waiting out jobs that are scheduled but not
    /// yet due, then returns. One-shot entry point for CLI commands.
    pub async fn run_until_idle(&self) {
        let mut receiver = self.receiver.lock().await;
        while !receiver.is_idle() {
            let Some(job) = receiver.recv().await else {
                break;
            };
            self.handle(job).await;
            receiver.mark_done();
        }
    }

    async fn handle(&self, job: Job) {
        let label = job.to_string();
        let timeout = Duration::from_secs(self.ctx.settings.job_timeout_secs);
        match tokio::time::timeout(timeout, self.run_job(job)).await {
            Ok(Ok(())) => tracing::info!(job = %label, "job finished"),
            Ok(Err(err)) => tracing::error!(
                job = %label,
                error = %err,
                retryable = err.is_retryable(),
                "job failed"
            ),
            Err(_) => tracing::error!(
                job = %label,
                timeout_secs = timeout.as_secs(),
                "job timed out"
            ),
        }
    }

    async fn run_job(&self, job: Job) -> Result<(), ComponentError> {
        match job {
            Job::InstallCrowdsec { server } => {
                install::install_crowdsec(&self.ctx, &server).await?;
            }
            Job::EnableAccessLogs { server } => {
                install::enable_access_logs(&self.ctx, &server).await?;
            }
            Job::EnableHeaderCapture { server } => {
                install::enable_header_capture(&self.ctx, &server).await?;
            }
            Job::IntegrateLogs { server } => {
                install::integrate_logs(&self.ctx, &server).await?;
            }
            Job::InstallTrafficLogger { server } => {
                install::install_traffic_logger(&self.ctx, &server).await?;
            }
            Job::ValidateStack { server, attempt } => {
                self.validate(&server, attempt).await?;
            }
            Job::ApplyBouncer { application } => {
                install::apply_bouncer(&self.ctx, &application).await?;
            }
            Job::DeployRules { application } => {
                self.rules.deploy(&application).await?;
            }
            Job::RemoveRules { application } => {
                self.rules.remove_rules(&application).await?;
            }
            Job::ApplyIpBans { application } => {
                self.rules.apply_ip_bans(&application).await?;
            }
            Job::RemoveIpBans { application } => {
                self.rules.remove_ip_bans(&application).await?;
            }
            Job::SyncAlerts => {
                let summary = self.alerts.sync_all().await;
                tracing::info!(
                    servers = summary.servers,
                    fetched = summary.fetched,
                    recorded = summary.recorded,
                    "alert sweep finished"
                );
            }
        }
        Ok(())
    }

    /// Runs the three-component gate and persists the result. On
    /// failure below the attempt cap, queues a targeted reinstall per
    /// failed component plus a follow-up validation.
    async fn validate(&self, server: &str, attempt: u32) -> Result<(), ComponentError> {
        let details = self.health.validate_server(server).await?;
        if details.all_passed() {
            tracing::info!(server, attempt, "stack validated");
            return Ok(());
        }

        let failed = details.failed_components();
        if attempt >= self.ctx.settings.max_install_attempts {
            return Err(ComponentError::verification(
                "stack",
                "validate",
                format!(
                    "components still failing after {attempt} attempts: {}",
                    failed.join(", ")
                ),
            ));
        }

        for component in &failed {
            let (delay, job) = match *component {
                "crowdsec" => (
                    RETRY_CROWDSEC,
                    Job::InstallCrowdsec {
                        server: server.to_owned(),
                    },
                ),
                "traefik-logging" => (
                    RETRY_ACCESS_LOGS,
                    Job::EnableAccessLogs {
                        server: server.to_owned(),
                    },
                ),
                _ => (
                    RETRY_TRAFFIC_LOGGER,
                    Job::InstallTrafficLogger {
                        server: server.to_owned(),
                    },
                ),
            };
            self.queue.dispatch_after(Duration::from_secs(delay), job);
        }
        self.queue.dispatch_after(
            Duration::from_secs(RETRY_REVALIDATE),
            Job::ValidateStack {
                server: server.to_owned(),
                attempt: attempt + 1,
            },
        );
        tracing::warn!(
            server,
            attempt,
            failed = failed.join(", "),
            "validation found gaps; reinstalls scheduled"
        );
        Ok(())
    }

    /// Labels only take effect when the application's containers are
    /// recreated with them, so the trigger fires off-loop after a
    /// short delay.
    fn schedule_redeploy(&self, application: Arc<Application>) {
        let trigger = Arc::clone(&self.redeploy);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(REDEPLOY_DELAY_SECS)).await;
            if let Err(err) = trigger.redeploy(&application).await {
                tracing::warn!(
                    application = %application.uuid,
                    error = %err,
                    "redeploy trigger failed; labels apply on next deploy"
                );
            }
        });
    }
}
