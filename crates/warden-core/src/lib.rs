//! Firewall stack management for fleets of remote Docker hosts.
//!
//! Warden installs and reconciles a CrowdSec-based security stack —
//! agent, proxy access logging, log acquisition and a forward-auth
//! sidecar — over SSH, then keeps per-application firewall rules and
//! alerts in sync with it. The moving parts:
//!
//! - **[`install`]** — one async installer per component. Each checks
//!   its own preconditions, patches remote config, acts on containers
//!   and verifies a concrete signal before recording flags.
//!
//! - **[`orchestrator::StackOrchestrator`]** — owns the [`queue`] and
//!   runs jobs against the fleet: staggered full installs, validation
//!   with bounded retries, firewall enable/disable pipelines.
//!
//! - **[`rules::RuleEngine`]** — compiles firewall rules into CrowdSec
//!   artifacts (scenarios, AppSec configs, standing decisions) and
//!   stages them on the agent.
//!
//! - **[`health::HealthValidator`]** — liveness probes with a TTL
//!   cache, plus the three-component installation gate.
//!
//! - **[`alerts::AlertSyncService`]** — pulls triggered alerts from
//!   each agent, attributes them to applications and dedups them into
//!   the store.
//!
//! - **[`store::FleetStore`]** — in-memory fleet state with lock-free
//!   read snapshots.
//!
//! Every remote action flows through the [`warden_remote::RemoteExecutor`]
//! seam, so the whole stack is testable against a scripted transport.

pub mod acquis;
pub mod alerts;
pub mod duration;
pub mod error;
pub mod health;
pub mod install;
pub mod labels;
pub mod model;
pub mod orchestrator;
pub mod queue;
pub mod rules;
pub mod settings;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use alerts::{AlertSyncService, SyncSummary};
pub use error::{ComponentError, ConflictError};
pub use health::{CrowdsecHealth, HealthValidator, RepairOutcome};
pub use install::{Component, InstallContext, InstallPhase, InstallReport};
pub use model::{
    Application, FirewallAlert, FirewallConfig, FirewallRule, SecurityState, Server,
    ValidationDetails,
};
pub use orchestrator::{NoopRedeploy, RedeployTrigger, StackOrchestrator};
pub use queue::{Job, JobQueue, JobReceiver};
pub use rules::RuleEngine;
pub use settings::StackSettings;
pub use store::{FleetStore, PlainSecrets, SecretStore};
