//! Delayed job dispatch.
//!
//! Stack installation is choreographed by wall-clock offsets rather than
//! a workflow engine: each unit of work is pushed onto an unbounded
//! channel, optionally after a timer, and a single worker drains it.
//! The queue tracks in-flight work (scheduled, queued, or executing) so
//! a one-shot caller can drain until the whole timed chain has settled,
//! including retries a job enqueues while running.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tokio::time::Duration;
use uuid::Uuid;

/// One schedulable unit of work. Server-scoped jobs carry the server
/// name, application-scoped jobs the application UUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    InstallCrowdsec { server: String },
    EnableAccessLogs { server: String },
    EnableHeaderCapture { server: String },
    IntegrateLogs { server: String },
    InstallTrafficLogger { server: String },
    /// Full-stack validation; `attempt` counts validation rounds so
    /// retries stay bounded.
    ValidateStack { server: String, attempt: u32 },
    ApplyBouncer { application: Uuid },
    DeployRules { application: Uuid },
    RemoveRules { application: Uuid },
    ApplyIpBans { application: Uuid },
    RemoveIpBans { application: Uuid },
    SyncAlerts,
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InstallCrowdsec { .. } => "install-crowdsec",
            Self::EnableAccessLogs { .. } => "enable-access-logs",
            Self::EnableHeaderCapture { .. } => "enable-header-capture",
            Self::IntegrateLogs { .. } => "integrate-logs",
            Self::InstallTrafficLogger { .. } => "install-traffic-logger",
            Self::ValidateStack { .. } => "validate-stack",
            Self::ApplyBouncer { .. } => "apply-bouncer",
            Self::DeployRules { .. } => "deploy-rules",
            Self::RemoveRules { .. } => "remove-rules",
            Self::ApplyIpBans { .. } => "apply-ip-bans",
            Self::RemoveIpBans { .. } => "remove-ip-bans",
            Self::SyncAlerts => "sync-alerts",
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InstallCrowdsec { server }
            | Self::EnableAccessLogs { server }
            | Self::EnableHeaderCapture { server }
            | Self::IntegrateLogs { server }
            | Self::InstallTrafficLogger { server } => {
                write!(f, "{} on {server}", self.kind())
            }
            Self::ValidateStack { server, attempt } => {
                write!(f, "validate-stack on {server} (attempt {attempt})")
            }
            Self::ApplyBouncer { application }
            | Self::DeployRules { application }
            | Self::RemoveRules { application }
            | Self::ApplyIpBans { application }
            | Self::RemoveIpBans { application } => {
                write!(f, "{} for {application}", self.kind())
            }
            Self::SyncAlerts => f.write_str("sync-alerts"),
        }
    }
}

/// Sending half. Cheap to clone; timers run on the Tokio runtime so a
/// delayed dispatch survives the caller returning.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Job>,
    in_flight: Arc<AtomicUsize>,
}

/// Receiving half, held by the worker.
#[derive(Debug)]
pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<Job>,
    in_flight: Arc<AtomicUsize>,
}

pub fn channel() -> (JobQueue, JobReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let in_flight = Arc::new(AtomicUsize::new(0));
    (
        JobQueue {
            tx,
            in_flight: Arc::clone(&in_flight),
        },
        JobReceiver { rx, in_flight },
    )
}

impl JobQueue {
    pub fn dispatch(&self, job: Job) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(job = %job, "dispatching");
        if self.tx.send(job).is_err() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!("job queue closed; dispatch dropped");
        }
    }

    /// Dispatch after a delay. Counts as in-flight from the moment of
    /// scheduling, so draining callers wait out the timer.
    pub fn dispatch_after(&self, delay: Duration, job: Job) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(job = %job, delay_secs = delay.as_secs(), "scheduling");
        let tx = self.tx.clone();
        let in_flight = Arc::clone(&self.in_flight);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(job).is_err() {
                in_flight.fetch_sub(1, Ordering::SeqCst);
                tracing::warn!("job queue closed; scheduled dispatch dropped");
            }
        });
    }

    /// Scheduled, queued, or currently executing jobs.
    pub fn pending(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl JobReceiver {
    pub async fn recv(&mut self) -> Option<Job> {
        self.rx.recv().await
    }

    /// Called by the worker once a job has fully run (including any
    /// dispatches the job itself made, which are counted separately).
    pub fn mark_done(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) == 0
    }
}
