//! In-memory fleet state: servers, applications and synced alerts.
//!
//! Reads go through lock-free snapshots rebuilt on every mutation, so
//! health probes and CLI renders never contend with installer jobs
//! updating flags mid-flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::ComponentError;
use crate::model::{AlertStatus, Application, FirewallAlert, SecurityUpdate, Server};

// ━━━━━━━━━━━━━━━━━━━ Secrets ━━━━━━━━━━━━━━━━━━━

/// Seals bouncer keys and sidecar tokens before they touch disk.
/// Implementations live with the persistence layer; [`PlainSecrets`]
/// is the passthrough for tests and throwaway setups.
pub trait SecretStore: Send + Sync {
    fn seal(&self, plain: &str) -> Result<String, ComponentError>;
    fn open(&self, sealed: &str) -> Result<String, ComponentError>;

    /// Releases whatever backs a sealed value that is being replaced.
    /// No-op unless the backend holds external resources.
    fn discard(&self, _sealed: &str) -> Result<(), ComponentError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlainSecrets;

impl SecretStore for PlainSecrets {
    fn seal(&self, plain: &str) -> Result<String, ComponentError> {
        Ok(plain.to_owned())
    }

    fn open(&self, sealed: &str) -> Result<String, ComponentError> {
        Ok(sealed.to_owned())
    }
}

// ━━━━━━━━━━━━━━━━━━━ Fleet store ━━━━━━━━━━━━━━━━━━━

/// Shared state for one control plane. Servers are keyed by name,
/// applications and alerts by UUID.
pub struct FleetStore {
    servers: DashMap<String, Arc<Server>>,
    applications: DashMap<Uuid, Arc<Application>>,
    alerts: DashMap<Uuid, Arc<FirewallAlert>>,
    server_snapshot: ArcSwap<Vec<Arc<Server>>>,
    app_snapshot: ArcSwap<Vec<Arc<Application>>>,
    alert_snapshot: ArcSwap<Vec<Arc<FirewallAlert>>>,
    version: AtomicU64,
}

impl Default for FleetStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FleetStore {
    pub fn new() -> Self {
        Self {
            servers: DashMap::new(),
            applications: DashMap::new(),
            alerts: DashMap::new(),
            server_snapshot: ArcSwap::from_pointee(Vec::new()),
            app_snapshot: ArcSwap::from_pointee(Vec::new()),
            alert_snapshot: ArcSwap::from_pointee(Vec::new()),
            version: AtomicU64::new(0),
        }
    }

    /// Monotonic change counter, bumped on every mutation.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    // ── Servers ──

    pub fn upsert_server(&self, server: Server) {
        self.servers.insert(server.name.clone(), Arc::new(server));
        self.rebuild_servers();
        self.bump();
    }

    pub fn remove_server(&self, name: &str) -> Option<Arc<Server>> {
        let removed = self.servers.remove(name).map(|(_, v)| v);
        if removed.is_some() {
            self.rebuild_servers();
            self.bump();
        }
        removed
    }

    pub fn server(&self, name: &str) -> Option<Arc<Server>> {
        self.servers.get(name).map(|e| Arc::clone(e.value()))
    }

    pub fn servers(&self) -> Arc<Vec<Arc<Server>>> {
        self.server_snapshot.load_full()
    }

    /// Applies a security-flag patch to one server. Unknown names are a
    /// precondition failure: flags only ever move for registered hosts.
    pub fn update_security(
        &self,
        name: &str,
        update: SecurityUpdate,
    ) -> Result<Arc<Server>, ComponentError> {
        let updated = {
            let mut entry = self.servers.get_mut(name).ok_or_else(|| {
                ComponentError::precondition("fleet-store", format!("unknown server `{name}`"))
            })?;
            let next = Arc::new(Server {
                security: entry.security.apply(update),
                ..(**entry).clone()
            });
            *entry = Arc::clone(&next);
            next
        };
        self.rebuild_servers();
        self.bump();
        Ok(updated)
    }

    fn rebuild_servers(&self) {
        let mut snapshot: Vec<Arc<Server>> =
            self.servers.iter().map(|e| Arc::clone(e.value())).collect();
        snapshot.sort_by(|a, b| a.name.cmp(&b.name));
        self.server_snapshot.store(Arc::new(snapshot));
    }

    // ── Applications ──

    pub fn upsert_application(&self, application: Application) {
        self.applications
            .insert(application.uuid, Arc::new(application));
        self.rebuild_apps();
        self.bump();
    }

    pub fn remove_application(&self, uuid: &Uuid) -> Option<Arc<Application>> {
        let removed = self.applications.remove(uuid).map(|(_, v)| v);
        if removed.is_some() {
            self.rebuild_apps();
            self.bump();
        }
        removed
    }

    pub fn application(&self, uuid: &Uuid) -> Option<Arc<Application>> {
        self.applications.get(uuid).map(|e| Arc::clone(e.value()))
    }

    pub fn applications(&self) -> Arc<Vec<Arc<Application>>> {
        self.app_snapshot.load_full()
    }

    pub fn applications_on(&self, server: &str) -> Vec<Arc<Application>> {
        self.app_snapshot
            .load()
            .iter()
            .filter(|a| a.server == server)
            .cloned()
            .collect()
    }

    /// Applications on `server` with the firewall switched on — the set
    /// whose AppSec documents belong in the server's acquisition
    /// manifest.
    pub fn firewall_applications_on(&self, server: &str) -> Vec<Arc<Application>> {
        self.applications_on(server)
            .into_iter()
            .filter(|a| a.firewall_enabled())
            .collect()
    }

    /// Replaces one application's firewall config in place.
    pub fn update_firewall(
        &self,
        uuid: &Uuid,
        firewall: Option<crate::model::FirewallConfig>,
    ) -> Result<Arc<Application>, ComponentError> {
        let updated = {
            let mut entry = self.applications.get_mut(uuid).ok_or_else(|| {
                ComponentError::precondition("fleet-store", format!("unknown application `{uuid}`"))
            })?;
            let next = Arc::new(Application {
                firewall,
                ..(**entry).clone()
            });
            *entry = Arc::clone(&next);
            next
        };
        self.rebuild_apps();
        self.bump();
        Ok(updated)
    }

    fn rebuild_apps(&self) {
        let mut snapshot: Vec<Arc<Application>> = self
            .applications
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        snapshot.sort_by(|a, b| a.name.cmp(&b.name));
        self.app_snapshot.store(Arc::new(snapshot));
    }

    // ── Alerts ──

    pub fn record_alert(&self, alert: FirewallAlert) {
        self.alerts.insert(alert.id, Arc::new(alert));
        self.rebuild_alerts();
        self.bump();
    }

    pub fn alerts(&self) -> Arc<Vec<Arc<FirewallAlert>>> {
        self.alert_snapshot.load_full()
    }

    pub fn alerts_for(&self, application: &Uuid) -> Vec<Arc<FirewallAlert>> {
        self.alert_snapshot
            .load()
            .iter()
            .filter(|a| a.application == *application)
            .cloned()
            .collect()
    }

    /// Whether an active alert for this (application, ip, scenario)
    /// triple was recorded inside the window. Drives the one-hour
    /// dedup during sync.
    pub fn has_active_alert_within(
        &self,
        application: &Uuid,
        ip: &str,
        scenario: &str,
        window: Duration,
    ) -> bool {
        let cutoff = Utc::now() - window;
        self.alert_snapshot.load().iter().any(|a| {
            a.status == AlertStatus::Active
                && a.application == *application
                && a.ip == ip
                && a.scenario == scenario
                && a.created_at > cutoff
        })
    }

    fn rebuild_alerts(&self) {
        let mut snapshot: Vec<Arc<FirewallAlert>> =
            self.alerts.iter().map(|e| Arc::clone(e.value())).collect();
        snapshot.sort_by_key(|a| std::cmp::Reverse(a.created_at));
        self.alert_snapshot.store(Arc::new(snapshot));
    }
}

impl std::fmt::Debug for FleetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetStore")
            .field("servers", &self.servers.len())
            .field("applications", &self.applications.len())
            .field("alerts", &self.alerts.len())
            .field("version", &self.version())
            .finish()
    }
}
