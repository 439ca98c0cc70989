//! Pulls triggered alerts from every agent into the fleet store.
//!
//! Each alert is attributed to an application, classified by scenario
//! name, graded by the decisions attached to it, and deduplicated
//! against recent active alerts. One misbehaving server never stops
//! the sweep; its failure is logged and counted.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;
use warden_api::types::{Alert, Decision};
use warden_api::{LapiClient, TransportConfig};
use warden_remote::RemoteExecutor;

use crate::duration::parse_compact_duration;
use crate::error::ComponentError;
use crate::install::cscli;
use crate::model::{AlertStatus, AlertType, Application, FirewallAlert, Server, Severity};
use crate::settings::StackSettings;
use crate::store::FleetStore;

/// How many alerts one sync pulls per server.
const ALERT_PAGE_SIZE: u32 = 100;

/// Window inside which an active alert with the same application, IP
/// and scenario counts as a duplicate.
const DEDUP_WINDOW_HOURS: i64 = 1;

/// Meta keys that may carry the application attribution, in lookup
/// order. Custom scenarios and AppSec rules stamp the first form.
const META_KEYS: &[&str] = &["warden.application_uuid", "application_uuid", "app_uuid"];

/// Scenario-name fragments mapped to alert types. Order matters: the
/// first fragment found anywhere in the lowercased scenario wins.
const SCENARIO_TYPES: &[(&[&str], AlertType)] = &[
    (&["sql-injection", "sqli"], AlertType::SqlInjection),
    (&["xss", "cross-site"], AlertType::XssAttack),
    (&["scan", "probe"], AlertType::PortScan),
    (&["brute", "password"], AlertType::BruteForce),
    (&["path-traversal", "directory"], AlertType::PathTraversal),
    (&["rce", "remote-code"], AlertType::RemoteCodeExecution),
    (&["bot", "crawler"], AlertType::SuspiciousBot),
    (&["rate", "flood"], AlertType::RateLimitExceeded),
];

/// Totals for one full sweep across the fleet.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SyncSummary {
    /// Servers that were eligible (agent installed and available).
    pub servers: usize,
    /// Alerts fetched across all eligible servers.
    pub fetched: usize,
    /// New alerts recorded after attribution and dedup.
    pub recorded: usize,
    /// Servers whose fetch or parse failed; their alerts are retried
    /// on the next sweep.
    pub failed_servers: usize,
}

/// Classify a scenario name by its first matching fragment.
pub(crate) fn classify_scenario(scenario: &str) -> AlertType {
    let lowered = scenario.to_ascii_lowercase();
    for (fragments, alert_type) in SCENARIO_TYPES {
        if fragments.iter().any(|f| lowered.contains(f)) {
            return *alert_type;
        }
    }
    AlertType::SuspiciousActivity
}

/// Grade an alert by its attached decisions: a day-long ban is
/// critical, any ban is high, a captcha is medium, anything else low.
pub(crate) fn decision_severity(decisions: &[Decision]) -> Severity {
    for decision in decisions {
        match decision.decision_type.as_str() {
            "ban" => {
                let long = parse_compact_duration(&decision.duration)
                    .is_some_and(|secs| secs >= 24 * 3600);
                return if long { Severity::Critical } else { Severity::High };
            }
            "captcha" => return Severity::Medium,
            _ => {}
        }
    }
    Severity::Low
}

fn alert_message(ip: &str, scenario: &str, decisions: usize) -> String {
    let mut message = format!("Suspicious activity detected from IP {ip}");
    if scenario != "unknown" {
        message.push_str(&format!(" ({scenario})"));
    }
    if decisions > 0 {
        message.push_str(&format!(". {decisions} decision(s) applied."));
    }
    message
}

fn source_ip(alert: &Alert) -> Option<String> {
    if let Some(ip) = &alert.source.ip {
        if !ip.is_empty() {
            return Some(ip.clone());
        }
    }
    // Machine alerts put the address in `value` with an `Ip` scope.
    match &alert.source.scope {
        Some(scope) if scope.eq_ignore_ascii_case("ip") => alert.source.value.clone(),
        _ => None,
    }
}

fn parse_alerts(server: &str, stdout: &str) -> Result<Vec<Alert>, ComponentError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    serde_json::from_str(trimmed)
        .map_err(|e| ComponentError::parse(format!("alerts from `{server}`"), e.to_string()))
}

/// Sweeps agents for fresh alerts and records them in the store.
pub struct AlertSyncService {
    executor: Arc<dyn RemoteExecutor>,
    store: Arc<FleetStore>,
    settings: Arc<StackSettings>,
}

impl AlertSyncService {
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

    /// One sweep over the whole fleet. Servers without a live agent
    /// are skipped; per-server failures are logged and counted, never
    /// propagated.
    pub async fn sync_all(&self) -> SyncSummary {
        let mut summary = SyncSummary::default();
        for server in self.store.servers().iter() {
            if !server.security.crowdsec_installed || !server.security.crowdsec_available {
                continue;
            }
            summary.servers += 1;
            match self.sync_server(server).await {
                Ok((fetched, recorded)) => {
                    summary.fetched += fetched;
                    summary.recorded += recorded;
                }
                Err(err) => {
                    tracing::warn!(server = %server.name, error = %err, "alert sync failed");
                    summary.failed_servers += 1;
                }
            }
        }
        tracing::info!(
            servers = summary.servers,
            recorded = summary.recorded,
            failed = summary.failed_servers,
            "alert sweep finished"
        );
        summary
    }

    /// Sweep a single named server. Unlike the full sweep, an unknown
    /// server or a dead agent is an error, since the operator asked
    /// for this one by name.
    pub async fn sync_one(&self, server_name: &str) -> Result<SyncSummary, ComponentError> {
        let server = self.store.server(server_name).ok_or_else(|| {
            ComponentError::precondition("alert-sync", format!("unknown server `{server_name}`"))
        })?;
        if !server.security.crowdsec_installed || !server.security.crowdsec_available {
            return Err(ComponentError::precondition(
                "alert-sync",
                format!("server `{server_name}` has no running agent"),
            ));
        }
        let (fetched, recorded) = self.sync_server(&server).await?;
        Ok(SyncSummary {
            servers: 1,
            fetched,
            recorded,
            failed_servers: 0,
        })
    }

    async fn sync_server(&self, server: &Server) -> Result<(usize, usize), ComponentError> {
        let alerts = self.fetch_alerts(server).await?;
        let fetched = alerts.len();
        let mut recorded = 0;
        for alert in &alerts {
            if self.process_alert(alert, server) {
                recorded += 1;
            }
        }
        if fetched > 0 {
            tracing::debug!(server = %server.name, fetched, recorded, "alerts synced");
        }
        Ok((fetched, recorded))
    }

    /// Prefers the recorded LAPI endpoint; servers installed before
    /// the endpoint was persisted fall back to `cscli` over SSH, which
    /// yields the same JSON.
    async fn fetch_alerts(&self, server: &Server) -> Result<Vec<Alert>, ComponentError> {
        let security = &server.security;
        if let (Some(url), Some(key)) = (&security.crowdsec_lapi_url, &security.bouncer_key) {
            let client = LapiClient::from_api_key(url, key, &TransportConfig::default())?;
            return Ok(client.list_alerts(ALERT_PAGE_SIZE, 0).await?);
        }

        let output = self
            .executor
            .probe(
                &server.host,
                "alerts-list",
                &format!(
                    "{} 2>/dev/null",
                    cscli(
                        &self.settings.container_name,
                        "alerts list -o json --since 24h"
                    )
                ),
            )
            .await?;
        parse_alerts(&server.name, &output.stdout)
    }

    /// Records one alert if it can be attributed and is not a recent
    /// duplicate. Returns whether a record was created.
    fn process_alert(&self, alert: &Alert, server: &Server) -> bool {
        let Some(ip) = source_ip(alert) else {
            return false;
        };
        let scenario = alert
            .scenario
            .clone()
            .unwrap_or_else(|| "unknown".to_owned());
        let Some(app) = self.attribute(alert, server) else {
            tracing::debug!(%ip, server = %server.name, "no application found for alert");
            return false;
        };
        if app.firewall.is_none() {
            return false;
        }
        if self.store.has_active_alert_within(
            &app.uuid,
            &ip,
            &scenario,
            chrono::Duration::hours(DEDUP_WINDOW_HOURS),
        ) {
            return false;
        }

        let message = alert_message(&ip, &scenario, alert.decisions.len());
        let metadata = serde_json::to_value(alert).unwrap_or(serde_json::Value::Null);
        self.store.record_alert(FirewallAlert {
            id: Uuid::new_v4(),
            application: app.uuid,
            ip,
            alert_type: classify_scenario(&scenario),
            severity: decision_severity(&alert.decisions),
            scenario,
            message,
            metadata,
            status: AlertStatus::Active,
            created_at: Utc::now(),
        });
        true
    }

    /// Attribution: an application UUID stamped in the alert meta wins;
    /// otherwise the first firewall-enabled application on the server
    /// takes the alert.
    fn attribute(&self, alert: &Alert, server: &Server) -> Option<Arc<Application>> {
        for key in META_KEYS {
            if let Some(value) = alert.meta_value(key) {
                if let Ok(uuid) = value.parse::<Uuid>() {
                    if let Some(app) = self.store.application(&uuid) {
                        return Some(app);
                    }
                }
            }
        }
        self.store
            .firewall_applications_on(&server.name)
            .into_iter()
            .next()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{FirewallConfig, SecurityUpdate};
    use serde_json::json;
    use warden_remote::testing::ScriptedExecutor;
    use warden_remote::{HostSpec, StepOutput};

    fn decision(kind: &str, duration: &str) -> Decision {
        Decision {
            id: None,
            origin: None,
            decision_type: kind.to_owned(),
            scope: "Ip".to_owned(),
            value: "203.0.113.9".to_owned(),
            duration: duration.to_owned(),
            scenario: None,
            until: None,
            simulated: None,
        }
    }

    fn firewall_app(uuid: Uuid, name: &str) -> Application {
        let mut app = Application::new(uuid, name, "web-1");
        app.firewall = Some(FirewallConfig {
            enabled: true,
            ..FirewallConfig::default()
        });
        app
    }

    fn fixture(apps: Vec<Application>) -> Arc<FleetStore> {
        let store = FleetStore::new();
        store.upsert_server(Server::new("web-1", HostSpec::new("web-1", "203.0.113.7")));
        store
            .update_security(
                "web-1",
                SecurityUpdate::default()
                    .crowdsec_installed(true)
                    .crowdsec_available(true),
            )
            .unwrap();
        for app in apps {
            store.upsert_application(app);
        }
        Arc::new(store)
    }

    fn service(executor: Arc<ScriptedExecutor>, store: Arc<FleetStore>) -> AlertSyncService {
        AlertSyncService::new(
            executor as Arc<dyn RemoteExecutor>,
            store,
            Arc::new(StackSettings::default()),
        )
    }

    fn alert_json(ip: &str, scenario: &str, meta_uuid: Option<Uuid>) -> serde_json::Value {
        let meta = match meta_uuid {
            Some(uuid) => json!([{"key": "warden.application_uuid", "value": uuid.to_string()}]),
            None => json!([]),
        };
        json!({
            "id": 17,
            "scenario": scenario,
            "source": {"scope": "Ip", "ip": ip, "value": ip},
            "decisions": [{
                "type": "ban", "scope": "Ip", "value": ip, "duration": "4h"
            }],
            "events": [],
            "meta": meta
        })
    }

    #[test]
    fn scenario_fragments_classify_in_declared_order() {
        assert_eq!(
            classify_scenario("crowdsecurity/http-sql-injection"),
            AlertType::SqlInjection
        );
        assert_eq!(classify_scenario("custom/xss-probe"), AlertType::XssAttack);
        // "scan" outranks "bot" because it appears earlier in the map.
        assert_eq!(
            classify_scenario("crowdsecurity/bot-port-scan"),
            AlertType::PortScan
        );
        assert_eq!(
            classify_scenario("ltsich/http-w00tw00t"),
            AlertType::SuspiciousActivity
        );
    }

    #[test]
    fn decisions_grade_severity() {
        assert_eq!(decision_severity(&[]), Severity::Low);
        assert_eq!(decision_severity(&[decision("captcha", "1h")]), Severity::Medium);
        assert_eq!(decision_severity(&[decision("ban", "4h")]), Severity::High);
        assert_eq!(decision_severity(&[decision("ban", "24h")]), Severity::Critical);
        assert_eq!(decision_severity(&[decision("ban", "1d")]), Severity::Critical);
    }

    #[tokio::test]
    async fn sync_records_classifies_and_dedups() {
        let uuid = Uuid::new_v4();
        let store = fixture(vec![firewall_app(uuid, "shop")]);
        let payload = json!([alert_json("203.0.113.9", "crowdsecurity/http-sql-injection", None)]);
        let executor = Arc::new(
            ScriptedExecutor::new()
                .respond("alerts list -o json", StepOutput::ok(payload.to_string())),
        );
        let service = service(Arc::clone(&executor), Arc::clone(&store));

        let summary = service.sync_all().await;
        assert_eq!(summary.servers, 1);
        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.recorded, 1);

        let alerts = store.alerts_for(&uuid);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::SqlInjection);
        assert_eq!(alerts[0].severity, Severity::High);
        assert_eq!(alerts[0].status, AlertStatus::Active);
        assert_eq!(
            alerts[0].message,
            "Suspicious activity detected from IP 203.0.113.9 \
             (crowdsecurity/http-sql-injection). 1 decision(s) applied."
        );

        // Same alert within the window is a duplicate.
        let second = service.sync_all().await;
        assert_eq!(second.recorded, 0);
        assert_eq!(store.alerts_for(&uuid).len(), 1);
    }

    #[tokio::test]
    async fn meta_attribution_beats_the_fallback() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let store = fixture(vec![
            firewall_app(first, "shop"),
            firewall_app(second, "blog"),
        ]);
        let payload = json!([alert_json("203.0.113.9", "custom/flood", Some(second))]);
        let executor = Arc::new(
            ScriptedExecutor::new()
                .respond("alerts list -o json", StepOutput::ok(payload.to_string())),
        );
        let service = service(Arc::clone(&executor), Arc::clone(&store));

        service.sync_all().await;

        assert!(store.alerts_for(&first).is_empty());
        let alerts = store.alerts_for(&second);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::RateLimitExceeded);
    }

    #[tokio::test]
    async fn alerts_without_a_source_ip_are_dropped() {
        let uuid = Uuid::new_v4();
        let store = fixture(vec![firewall_app(uuid, "shop")]);
        let payload = json!([{
            "id": 3,
            "scenario": "crowdsecurity/http-probing",
            "source": {"scope": "Country", "value": "CN"},
            "decisions": [],
            "meta": []
        }]);
        let executor = Arc::new(
            ScriptedExecutor::new()
                .respond("alerts list -o json", StepOutput::ok(payload.to_string())),
        );
        let service = service(Arc::clone(&executor), Arc::clone(&store));

        let summary = service.sync_all().await;
        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.recorded, 0);
        assert!(store.alerts_for(&uuid).is_empty());
    }

    #[tokio::test]
    async fn one_unreachable_server_is_counted_not_fatal() {
        let store = fixture(vec![firewall_app(Uuid::new_v4(), "shop")]);
        let executor = Arc::new(
            ScriptedExecutor::new().respond_unreachable("alerts list", "connection refused"),
        );
        let service = service(Arc::clone(&executor), store);

        let summary = service.sync_all().await;
        assert_eq!(summary.servers, 1);
        assert_eq!(summary.failed_servers, 1);
        assert_eq!(summary.recorded, 0);
    }

    #[tokio::test]
    async fn servers_without_a_live_agent_are_never_queried() {
        let store = FleetStore::new();
        store.upsert_server(Server::new("web-1", HostSpec::new("web-1", "203.0.113.7")));
        let executor = Arc::new(ScriptedExecutor::new());
        let service = service(Arc::clone(&executor), Arc::new(store));

        let summary = service.sync_all().await;
        assert_eq!(summary.servers, 0);
        assert!(executor.commands().is_empty());
    }

    #[tokio::test]
    async fn malformed_json_counts_as_a_failed_server() {
        let store = fixture(vec![firewall_app(Uuid::new_v4(), "shop")]);
        let executor = Arc::new(
            ScriptedExecutor::new().respond("alerts list -o json", StepOutput::ok("{not json")),
        );
        let service = service(Arc::clone(&executor), store);

        let summary = service.sync_all().await;
        assert_eq!(summary.failed_servers, 1);
    }

    #[tokio::test]
    async fn single_server_sync_returns_its_own_summary() {
        let uuid = Uuid::new_v4();
        let store = fixture(vec![firewall_app(uuid, "shop")]);
        let payload = json!([alert_json("203.0.113.9", "custom/flood", None)]);
        let executor = Arc::new(
            ScriptedExecutor::new()
                .respond("alerts list -o json", StepOutput::ok(payload.to_string())),
        );
        let service = service(executor, Arc::clone(&store));

        let summary = service.sync_one("web-1").await.unwrap();
        assert_eq!(
            summary,
            SyncSummary {
                servers: 1,
                fetched: 1,
                recorded: 1,
                failed_servers: 0,
            }
        );
    }

    #[tokio::test]
    async fn single_server_sync_demands_a_live_agent() {
        let store = FleetStore::new();
        store.upsert_server(Server::new("web-1", HostSpec::new("web-1", "203.0.113.7")));
        let service = service(Arc::new(ScriptedExecutor::new()), Arc::new(store));

        let err = service.sync_one("web-1").await.unwrap_err();
        assert!(matches!(err, ComponentError::Precondition { .. }));
        assert!(service.sync_one("missing").await.is_err());
    }
}
