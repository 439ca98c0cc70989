//! Firewall rule compilation and deployment.
//!
//! Rules live as structured conditions on the application record; this
//! module lowers them into the artifact set the agent consumes:
//! leaky-bucket and geo trigger scenarios, AppSec rule and config
//! documents, the two log parsers, plus direct LAPI ban decisions for
//! plain IP rules. [`compile`] is pure; [`RuleEngine`] stages the
//! output over SSH and reloads the agent.

mod appsec;
pub mod geo;
mod scenario;

use std::net::IpAddr;
use std::sync::Arc;

use uuid::Uuid;
use warden_remote::{HostSpec, Script};

use crate::acquis::{AcquisConfig, AppsecSource};
use crate::duration::format_ban_duration;
use crate::error::ComponentError;
use crate::install::{
    Component, InstallContext, InstallReport, apply_bouncer, container_status_cmd, cscli,
    enable_access_logs,
};
use crate::model::{Application, FirewallConfig, FirewallRule, ProtectionMode};
use crate::settings::ARTIFACT_NAMESPACE;

// ── Log parsers ──

/// First-stage parser: claims raw proxy lines and stamps the program
/// name so later stages can pick them up.
const TRAEFIK_RAW_PARSER: &str = r#"name: warden/traefik-raw
description: Route raw Traefik access-log lines into the pipeline
filter: "evt.Line.Labels.type == 'traefik'"
onsuccess: next_stage
nodes:
  - grok:
      pattern: "%{GREEDYDATA:message}"
      apply_on: Line.Raw
statics:
  - parsed: program
    value: traefik
"#;

/// Enrichment-stage parser: promotes the JSON access-log fields into
/// the event meta that scenarios group and filter on.
const IP_ENRICH_PARSER: &str = r#"name: warden/ip-enrich
description: Promote Traefik client fields into event meta
filter: "evt.Parsed.program == 'traefik'"
statics:
  - meta: source_ip
    expression: "evt.Parsed.remote_addr"
  - meta: http_host
    expression: "evt.Parsed.request_addr"
  - meta: traefik_router_name
    expression: "evt.Parsed.traefik_router_name"
"#;

// ── Compilation ──

/// One rendered YAML document plus the file name it deploys under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedYaml {
    pub filename: String,
    pub content: String,
}

/// Everything one application's ruleset compiles down to.
#[derive(Debug, Clone, Default)]
pub struct CompiledRules {
    /// AppSec engine config; present only when at least one rule
    /// compiled into the AppSec set.
    pub appsec_config: Option<NamedYaml>,
    pub appsec_rules: Vec<NamedYaml>,
    pub scenarios: Vec<NamedYaml>,
    /// Rules that were skipped and why. Compilation never aborts on a
    /// single bad rule.
    pub warnings: Vec<String>,
}

impl CompiledRules {
    pub fn is_empty(&self) -> bool {
        self.appsec_config.is_none() && self.appsec_rules.is_empty() && self.scenarios.is_empty()
    }

    fn skip(&mut self, rule: &FirewallRule, reason: String) {
        tracing::warn!(rule = rule.id, %reason, "firewall rule skipped");
        self.warnings
            .push(format!("rule {} ({}) skipped: {reason}", rule.id, rule.name));
    }

    fn push_geo(
        &mut self,
        result: Result<Option<NamedYaml>, ComponentError>,
        rule: &FirewallRule,
    ) {
        match result {
            Ok(Some(doc)) => self.scenarios.push(doc),
            Ok(None) => self.skip(rule, "no country codes in conditions".to_owned()),
            Err(err) => self.skip(rule, err.to_string()),
        }
    }
}

/// Compiles the application's enabled rules into deployable artifacts.
///
/// Routing by protection mode: IP bans become LAPI decisions (no
/// files), rate limits become leaky scenarios, geo blocks become
/// trigger scenarios. AppSec rules go to the AppSec engine unless they
/// match on country. Country data only exists in the enriched event
/// meta, never in AppSec request zones, so such rules compile to
/// trigger scenarios regardless of their declared mode.
pub fn compile(application: &Application, config: &FirewallConfig) -> CompiledRules {
    let mut compiled = CompiledRules::default();
    let mut rule_names = Vec::new();

    for rule in config.enabled_rules() {
        match rule.protection_mode {
            // Direct LAPI decisions; see RuleEngine::apply_ip_bans.
            ProtectionMode::IpBan => {}
            ProtectionMode::RateLimit => match scenario::leaky(rule, application, config) {
                Ok(doc) => compiled.scenarios.push(doc),
                Err(err) => compiled.skip(rule, err.to_string()),
            },
            ProtectionMode::GeoBlock => {
                compiled.push_geo(scenario::geo(rule, application, config), rule);
            }
            ProtectionMode::CustomAppsec => {
                if rule.conditions.has_country_condition() {
                    compiled.push_geo(scenario::geo(rule, application, config), rule);
                } else if !config.appsec_enabled {
                    compiled.skip(rule, "AppSec engine is disabled".to_owned());
                } else {
                    match appsec::rule_doc(rule) {
                        Ok(Some(doc)) => {
                            rule_names.push(appsec::rule_name(rule));
                            compiled.appsec_rules.push(doc);
                        }
                        Ok(None) => {
                            compiled.skip(rule, "no conditions map to AppSec zones".to_owned());
                        }
                        Err(err) => compiled.skip(rule, err.to_string()),
                    }
                }
            }
        }
    }

    if !rule_names.is_empty() {
        match appsec::config_doc(application, config, rule_names) {
            Ok(doc) => compiled.appsec_config = Some(doc),
            Err(err) => {
                compiled
                    .warnings
                    .push(format!("AppSec config skipped: {err}"));
                // Rule files without a config are dead weight.
                compiled.appsec_rules.clear();
            }
        }
    }
    compiled
}

// ── Deployment ──

/// Pushes compiled rules to the agent on an application's server and
/// keeps LAPI ban decisions in sync with the IP rules.
pub struct RuleEngine {
    ctx: InstallContext,
}

impl RuleEngine {
    pub fn new(ctx: InstallContext) -> Self {
        Self { ctx }
    }

    fn application(&self, application: &Uuid) -> Result<Arc<Application>, ComponentError> {
        self.ctx.store.application(application).ok_or_else(|| {
            ComponentError::precondition(
                Component::Rules.to_string(),
                format!("unknown application `{application}`"),
            )
        })
    }

    /// Compiles the application's ruleset and stages the whole artifact
    /// set on its server: parsers, AppSec files, scenarios, the
    /// acquisition manifest, then the bouncer labels.
    ///
    /// Re-checks the enabled flag at execution time, so a deploy queued
    /// before the firewall was switched off fails its precondition
    /// instead of pushing stale rules.
    pub async fn deploy(&self, application: &Uuid) -> Result<InstallReport, ComponentError> {
        let component = Component::Rules;
        let app = self.application(application)?;
        let config = match app.firewall.as_ref() {
            Some(config) if config.enabled => config,
            _ => {
                return Err(ComponentError::precondition(
                    component.to_string(),
                    format!("firewall is not enabled for `{}`", app.name),
                ));
            }
        };
        let server = self.ctx.server(&app.server, component)?;
        if !server.security.crowdsec_installed || !server.security.crowdsec_available {
            return Err(ComponentError::precondition(
                component.to_string(),
                format!(
                    "CrowdSec must be installed and available on `{}` before rules deploy",
                    app.server
                ),
            ));
        }
        let host = &server.host;
        let settings = &self.ctx.settings;
        let mut report = InstallReport::begin(component);

        // Scenarios are useless until the agent actually sees log
        // lines; bring logging up first when it is still off.
        if !server.security.traefik_logging_enabled {
            let logging = enable_access_logs(&self.ctx, &app.server).await?;
            report.warnings.extend(logging.warnings);
            report.step("access logging enabled first");
        }

        self.stage_parsers(host, &mut report).await?;

        let compiled = compile(&app, config);
        for warning in &compiled.warnings {
            report.warn(warning.clone());
        }

        let scenarios_dir = settings.scenarios_dir();
        let appsec_configs_dir = settings.appsec_configs_dir();
        let appsec_rules_dir = settings.appsec_rules_dir();
        let dirs = Script::new().step(
            "create-rule-directories",
            format!(
                "mkdir -p {scenarios_dir} {appsec_configs_dir} {appsec_rules_dir} \
                 && chown -R 1000:1000 {scenarios_dir} {appsec_configs_dir} {appsec_rules_dir}"
            ),
        );
        self.ctx.executor.run(host, &dirs).await?;

        // Clear this application's previous files before staging so a
        // shrunk ruleset does not leave orphans behind.
        self.ctx
            .executor
            .probe(
                host,
                "appsec-cleanup",
                &format!(
                    "rm -f {appsec_configs_dir}/app-{application}.yaml \
                     {appsec_rules_dir}/{ARTIFACT_NAMESPACE}-{application}-*.yaml"
                ),
            )
            .await?;
        match &compiled.appsec_config {
            Some(doc) => {
                self.ctx
                    .executor
                    .upload(
                        host,
                        &format!("{appsec_configs_dir}/{}", doc.filename),
                        &doc.content,
                    )
                    .await?;
                for rule in &compiled.appsec_rules {
                    self.ctx
                        .executor
                        .upload(
                            host,
                            &format!(
                                "{appsec_rules_dir}/{ARTIFACT_NAMESPACE}-{application}-{}",
                                rule.filename
                            ),
                            &rule.content,
                        )
                        .await?;
                }
                report.step(format!(
                    "AppSec config staged with {} rule(s)",
                    compiled.appsec_rules.len()
                ));
            }
            None => report.step("no AppSec rules to stage"),
        }

        self.ctx
            .executor
            .probe(
                host,
                "scenario-cleanup",
                &format!("rm -f {scenarios_dir}/{ARTIFACT_NAMESPACE}-{application}-*.yaml"),
            )
            .await?;
        for doc in &compiled.scenarios {
            self.ctx
                .executor
                .upload(
                    host,
                    &format!(
                        "{scenarios_dir}/{ARTIFACT_NAMESPACE}-{application}-{}",
                        doc.filename
                    ),
                    &doc.content,
                )
                .await?;
        }
        report.step(format!("{} scenario(s) staged", compiled.scenarios.len()));

        if self
            .sync_acquis(host, application, compiled.appsec_config.is_some())
            .await?
        {
            report.step("acquisition manifest updated");
        }

        report.verifying();
        self.reload_agent(host).await?;
        let status = self
            .ctx
            .executor
            .probe(
                host,
                "agent-status",
                &container_status_cmd(&settings.container_name),
            )
            .await?;
        if !status.stdout.contains("Up") {
            report.warn("agent not confirmed running after reload");
        }

        let bouncer = apply_bouncer(&self.ctx, application).await?;
        report.warnings.extend(bouncer.warnings);
        report.step("bouncer labels wired");

        Ok(report.installed())
    }

    /// Deletes every artifact a deploy staged for the application and
    /// reloads the agent. Safe when nothing was ever deployed.
    pub async fn remove_rules(&self, application: &Uuid) -> Result<InstallReport, ComponentError> {
        let component = Component::Rules;
        let app = self.application(application)?;
        let server = self.ctx.server(&app.server, component)?;
        let mut report = InstallReport::begin(component);

        if !server.security.crowdsec_installed {
            report.step("agent not installed; nothing to remove");
            return Ok(report.installed());
        }
        let host = &server.host;
        let settings = &self.ctx.settings;

        self.ctx
            .executor
            .probe(
                host,
                "rule-cleanup",
                &format!(
                    "rm -f {}/app-{application}.yaml \
                     {}/{ARTIFACT_NAMESPACE}-{application}-*.yaml \
                     {}/{ARTIFACT_NAMESPACE}-{application}-*.yaml",
                    settings.appsec_configs_dir(),
                    settings.appsec_rules_dir(),
                    settings.scenarios_dir(),
                ),
            )
            .await?;
        report.step("rule files removed");

        if self.sync_acquis(host, application, false).await? {
            report.step("acquisition manifest updated");
        }

        report.verifying();
        self.reload_agent(host).await?;
        Ok(report.installed())
    }

    /// Syncs direct LAPI decisions with the application's IP-ban rules:
    /// deletes then re-adds for enabled rules so durations refresh,
    /// removes for disabled ones. Add failures are warnings; removal
    /// failures fail the run after every IP was attempted, because a
    /// ban that should have been lifted and silently was not is worse
    /// than a missing one.
    pub async fn apply_ip_bans(
        &self,
        application: &Uuid,
    ) -> Result<InstallReport, ComponentError> {
        let component = Component::Rules;
        let app = self.application(application)?;
        let config = app.firewall.as_ref().ok_or_else(|| {
            ComponentError::precondition(
                component.to_string(),
                format!("no firewall configuration for `{}`", app.name),
            )
        })?;
        let server = self.ctx.server(&app.server, component)?;
        if !server.security.crowdsec_installed || !server.security.crowdsec_available {
            return Err(ComponentError::precondition(
                component.to_string(),
                format!(
                    "CrowdSec must be installed and available on `{}` before decisions sync",
                    app.server
                ),
            ));
        }
        let host = &server.host;
        let container = &self.ctx.settings.container_name;
        let mut report = InstallReport::begin(component);
        let mut failed_removals = Vec::new();

        for rule in config
            .rules
            .iter()
            .filter(|r| r.protection_mode == ProtectionMode::IpBan)
        {
            let ips = rule.conditions.ips();
            if ips.is_empty() {
                report.warn(format!("rule {} has no valid IP conditions", rule.id));
                continue;
            }
            if !rule.enabled {
                self.remove_decisions(host, &ips, &mut report, &mut failed_removals)
                    .await;
                continue;
            }
            if !config.enabled {
                tracing::debug!(rule = rule.id, "firewall disabled; ban not applied");
                continue;
            }
            let duration = match format_ban_duration(rule.effective_duration(config)) {
                Ok(duration) => duration,
                Err(err) => {
                    report.warn(format!("rule {} skipped: {err}", rule.id));
                    continue;
                }
            };
            for ip in &ips {
                let exists = self
                    .ctx
                    .executor
                    .probe(
                        host,
                        "decision-check",
                        &format!(
                            "{} 2>/dev/null | grep -q '{ip}'",
                            cscli(container, &format!("decisions list --ip {ip}"))
                        ),
                    )
                    .await?;
                if exists.success() {
                    self.ctx
                        .executor
                        .probe(
                            host,
                            "decision-delete",
                            &cscli(container, &format!("decisions delete --ip {ip}")),
                        )
                        .await?;
                }
                let added = self
                    .ctx
                    .executor
                    .probe(
                        host,
                        "decision-add",
                        &cscli(
                            container,
                            &format!(
                                "decisions add --ip {ip} --duration {duration} --type ban \
                                 --reason 'Firewall rule: {}'",
                                rule.name
                            ),
                        ),
                    )
                    .await?;
                if added.success() {
                    report.step(format!("banned {ip} for {duration}"));
                } else {
                    report.warn(format!("failed to ban {ip}: {}", added.stderr.trim()));
                }
            }
        }

        if failed_removals.is_empty() {
            Ok(report.installed())
        } else {
            Err(ComponentError::verification(
                component.to_string(),
                "decision-delete",
                format!("decisions not removed for: {}", failed_removals.join(", ")),
            ))
        }
    }

    /// Removes every decision the application's IP-ban rules created.
    /// Attempts all IPs and reports the full failure list; the caller
    /// must never mistake a partial removal for a clean one.
    pub async fn remove_ip_bans(
        &self,
        application: &Uuid,
    ) -> Result<InstallReport, ComponentError> {
        let component = Component::Rules;
        let app = self.application(application)?;
        let server = self.ctx.server(&app.server, component)?;
        let mut report = InstallReport::begin(component);

        let Some(config) = app.firewall.as_ref() else {
            report.step("no firewall configuration; nothing to remove");
            return Ok(report.installed());
        };
        if !server.security.crowdsec_installed {
            report.step("agent not installed; nothing to remove");
            return Ok(report.installed());
        }
        let host = &server.host;

        let mut ips: Vec<IpAddr> = Vec::new();
        for rule in config
            .rules
            .iter()
            .filter(|r| r.protection_mode == ProtectionMode::IpBan)
        {
            for ip in rule.conditions.ips() {
                if !ips.contains(&ip) {
                    ips.push(ip);
                }
            }
        }

        let mut failures = Vec::new();
        self.remove_decisions(host, &ips, &mut report, &mut failures)
            .await;

        if failures.is_empty() {
            Ok(report.installed())
        } else {
            Err(ComponentError::verification(
                component.to_string(),
                "decision-delete",
                format!("decisions not removed for: {}", failures.join(", ")),
            ))
        }
    }

    // ── Internals ──

    /// Stages the raw and enrich parsers. The stock traefik collection
    /// adds extra scenarios but is optional; a failed install is
    /// reported and deployment continues on the custom parsers.
    async fn stage_parsers(
        &self,
        host: &HostSpec,
        report: &mut InstallReport,
    ) -> Result<(), ComponentError> {
        let settings = &self.ctx.settings;
        let raw_dir = settings.parsers_raw_dir();
        let enrich_dir = settings.parsers_enrich_dir();

        let dirs = Script::new().step(
            "create-parser-directories",
            format!("mkdir -p {raw_dir} {enrich_dir}"),
        );
        self.ctx.executor.run(host, &dirs).await?;
        self.ctx
            .executor
            .upload(
                host,
                &format!("{raw_dir}/{ARTIFACT_NAMESPACE}-traefik-raw.yaml"),
                TRAEFIK_RAW_PARSER,
            )
            .await?;

        let collection = self
            .ctx
            .executor
            .probe(
                host,
                "collection-install",
                &format!(
                    "{} 2>&1 || echo 'INSTALL_FAILED'",
                    cscli(
                        &settings.container_name,
                        "collections install crowdsecurity/traefik -o raw"
                    )
                ),
            )
            .await?;
        if collection.combined().contains("INSTALL_FAILED") {
            report.warn("stock traefik collection failed to install; custom parsers still apply");
        } else {
            // The collection ships its own parser stages; reload so the
            // enrich parser lands on top of them.
            self.reload_agent(host).await?;
        }

        self.ctx
            .executor
            .upload(
                host,
                &format!("{enrich_dir}/{ARTIFACT_NAMESPACE}-ip-enrich.yaml"),
                IP_ENRICH_PARSER,
            )
            .await?;
        report.step("log parsers staged");
        Ok(())
    }

    /// Merges the application's AppSec source into the shared
    /// acquisition manifest, or prunes it when the ruleset no longer
    /// needs one. Returns whether the file was rewritten.
    async fn sync_acquis(
        &self,
        host: &HostSpec,
        application: &Uuid,
        wants_appsec: bool,
    ) -> Result<bool, ComponentError> {
        let settings = &self.ctx.settings;
        let current = self
            .ctx
            .executor
            .probe(
                host,
                "read-acquis",
                &format!("cat {} 2>/dev/null || true", settings.acquis_path()),
            )
            .await?;
        let mut acquis = AcquisConfig::parse(&current.stdout);

        let mut changed = acquis.ensure_traefik_source();
        if wants_appsec {
            acquis.upsert_appsec(AppsecSource::for_application(application, settings));
            changed = true;
        } else {
            let keep: Vec<Uuid> = acquis
                .appsec_sources()
                .filter_map(|source| source.application_uuid().and_then(|u| u.parse().ok()))
                .filter(|uuid| uuid != application)
                .collect();
            changed = acquis.prune_appsec(&keep) > 0 || changed;
        }

        if changed {
            self.ctx
                .executor
                .upload(host, &settings.acquis_path(), &acquis.render())
                .await?;
        }
        Ok(changed)
    }

    async fn reload_agent(&self, host: &HostSpec) -> Result<(), ComponentError> {
        let settings = &self.ctx.settings;
        self.ctx
            .executor
            .probe(
                host,
                "agent-reload",
                &format!("docker exec {} kill -SIGHUP 1", settings.container_name),
            )
            .await?;
        self.ctx.settle(settings.reload_wait_secs).await;
        Ok(())
    }

    async fn remove_decisions(
        &self,
        host: &HostSpec,
        ips: &[IpAddr],
        report: &mut InstallReport,
        failures: &mut Vec<String>,
    ) {
        let container = &self.ctx.settings.container_name;
        for ip in ips {
            let deleted = self
                .ctx
                .executor
                .probe(
                    host,
                    "decision-delete",
                    &cscli(container, &format!("decisions delete --ip {ip}")),
                )
                .await;
            match deleted {
                Ok(output) if output.success() => {
                    report.step(format!("decision removed for {ip}"));
                }
                Ok(output) => failures.push(format!("{ip} ({})", output.stderr.trim())),
                Err(err) => failures.push(format!("{ip} ({err})")),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::install::InstallPhase;
    use crate::model::{ConditionSet, LogicalOp, RuleAction, SecurityUpdate, Server};
    use crate::settings::StackSettings;
    use crate::store::FleetStore;
    use serde_json::json;
    use std::sync::Arc;
    use warden_remote::testing::ScriptedExecutor;
    use warden_remote::{HostSpec, StepOutput};

    const UUID: &str = "2b7f4c1e-9d3a-4f6b-8a21-5c9e7d0f1a2b";

    fn rule(id: i64, mode: ProtectionMode, conditions: serde_json::Value) -> FirewallRule {
        FirewallRule {
            id,
            name: format!("rule {id}"),
            description: None,
            protection_mode: mode,
            action: RuleAction::Block,
            enabled: true,
            priority: 0,
            conditions: ConditionSet::new(conditions),
            remediation_duration: None,
            capacity: None,
            leakspeed: None,
            logical_operator: LogicalOp::And,
        }
    }

    fn app_with(rules: Vec<FirewallRule>) -> Application {
        let mut app = Application::new(UUID.parse().unwrap(), "shop", "web-1");
        app.firewall = Some(FirewallConfig {
            enabled: true,
            rules,
            ..FirewallConfig::default()
        });
        app
    }

    fn engine(executor: Arc<ScriptedExecutor>, app: Application) -> RuleEngine {
        let store = FleetStore::new();
        store.upsert_server(Server::new("web-1", HostSpec::new("web-1", "203.0.113.7")));
        store
            .update_security(
                "web-1",
                SecurityUpdate::default()
                    .crowdsec_installed(true)
                    .crowdsec_available(true)
                    .traefik_logging_enabled(true),
            )
            .unwrap();
        store.upsert_application(app);
        RuleEngine::new(InstallContext::new(
            executor as Arc<dyn warden_remote::RemoteExecutor>,
            Arc::new(store),
            Arc::new(StackSettings::default()),
        ))
    }

    #[test]
    fn compile_routes_each_mode_to_its_artifact() {
        let app = app_with(vec![
            rule(
                1,
                ProtectionMode::IpBan,
                json!([{"field": "ip", "operator": "equals", "value": "198.51.100.9"}]),
            ),
            rule(
                2,
                ProtectionMode::RateLimit,
                json!([{"field": "path", "operator": "contains", "value": "/login"}]),
            ),
            rule(
                3,
                ProtectionMode::GeoBlock,
                json!([{"field": "country_code", "operator": "in", "value": "CN"}]),
            ),
            rule(
                4,
                ProtectionMode::CustomAppsec,
                json!([{"field": "path", "operator": "contains", "value": "/admin"}]),
            ),
        ]);
        let compiled = compile(&app, app.firewall.as_ref().unwrap());

        assert!(compiled.warnings.is_empty());
        assert_eq!(compiled.scenarios.len(), 2);
        assert!(compiled.scenarios.iter().any(|s| s.filename == "rule-2.yaml"));
        assert!(compiled.scenarios.iter().any(|s| s.filename == "geo-3.yaml"));
        assert_eq!(compiled.appsec_rules.len(), 1);
        let config = compiled.appsec_config.unwrap();
        assert!(config.content.contains("custom_rule_4_rule_4"));
    }

    #[test]
    fn country_conditions_never_reach_the_appsec_engine() {
        let app = app_with(vec![rule(
            7,
            ProtectionMode::CustomAppsec,
            json!([{"field": "country_code", "operator": "in", "value": "CN,RU"}]),
        )]);
        let compiled = compile(&app, app.firewall.as_ref().unwrap());

        assert!(compiled.appsec_config.is_none());
        assert!(compiled.appsec_rules.is_empty());
        assert_eq!(compiled.scenarios.len(), 1);
        assert_eq!(compiled.scenarios[0].filename, "geo-7.yaml");
        assert!(compiled.scenarios[0].content.contains("evt.Enriched.IsoCode"));
    }

    #[test]
    fn appsec_rules_wait_while_the_engine_is_disabled() {
        let mut app = app_with(vec![rule(
            4,
            ProtectionMode::CustomAppsec,
            json!([{"field": "path", "operator": "contains", "value": "/admin"}]),
        )]);
        app.firewall.as_mut().unwrap().appsec_enabled = false;
        let compiled = compile(&app, app.firewall.as_ref().unwrap());

        assert!(compiled.is_empty());
        assert_eq!(compiled.warnings.len(), 1);
        assert!(compiled.warnings[0].contains("AppSec engine is disabled"));
    }

    #[test]
    fn parsers_are_valid_yaml_in_the_shared_namespace() {
        for (text, name) in [
            (TRAEFIK_RAW_PARSER, "warden/traefik-raw"),
            (IP_ENRICH_PARSER, "warden/ip-enrich"),
        ] {
            let doc: serde_yaml::Value = serde_yaml::from_str(text).unwrap();
            assert_eq!(doc["name"].as_str().unwrap(), name);
        }
        assert!(IP_ENRICH_PARSER.contains("source_ip"));
    }

    #[tokio::test(start_paused = true)]
    async fn deploy_stages_the_full_artifact_set() {
        let uuid: Uuid = UUID.parse().unwrap();
        let app = app_with(vec![
            rule(
                1,
                ProtectionMode::RateLimit,
                json!([{"field": "path", "operator": "contains", "value": "/login"}]),
            ),
            rule(
                2,
                ProtectionMode::CustomAppsec,
                json!([{"field": "user_agent", "operator": "equals", "value": "sqlmap"}]),
            ),
        ]);
        let executor = Arc::new(
            ScriptedExecutor::new()
                .respond("docker ps --filter name=crowdsec", StepOutput::ok("Up 2 hours"))
                .respond(
                    "bouncers add app-",
                    StepOutput::ok("API key for 'app':\n\n   fedcba9876543210fedcba9876543210\n"),
                )
                .respond("'{{.Names}}' | grep", StepOutput::ok("shop-1"))
                .respond("docker restart shop-1", StepOutput::ok("shop-1")),
        );
        let engine = engine(Arc::clone(&executor), app);

        let report = engine.deploy(&uuid).await.unwrap();

        assert_eq!(report.phase, InstallPhase::Installed);
        assert!(
            executor
                .upload_content("parsers/s00-raw/warden-traefik-raw.yaml")
                .is_some()
        );
        assert!(
            executor
                .upload_content("parsers/s02-enrich/warden-ip-enrich.yaml")
                .is_some()
        );
        assert!(
            executor
                .upload_content(&format!("scenarios/warden-{uuid}-rule-1.yaml"))
                .is_some()
        );
        assert!(
            executor
                .upload_content(&format!("appsec-configs/warden/app-{uuid}.yaml"))
                .is_some()
        );
        assert!(
            executor
                .upload_content(&format!("appsec-rules/warden/warden-{uuid}-custom-appsec-2.yaml"))
                .is_some()
        );
        let manifest = executor.upload_content("acquis.yaml").unwrap();
        assert!(manifest.contains("appsec"));
        assert!(manifest.contains(&uuid.to_string()));
        assert_eq!(
            executor.count_matching("collections install crowdsecurity/traefik"),
            1
        );
        assert_eq!(executor.count_matching("kill -SIGHUP 1"), 2);
        let cleanup = format!("scenarios/warden-{uuid}-*.yaml");
        assert!(
            executor
                .commands()
                .iter()
                .any(|c| c.contains("rm -f") && c.contains(&cleanup))
        );
        assert!(report.steps.iter().any(|s| s.contains("bouncer")));
    }

    #[tokio::test(start_paused = true)]
    async fn deploy_refuses_a_disabled_firewall() {
        let mut app = app_with(Vec::new());
        app.firewall.as_mut().unwrap().enabled = false;
        let engine = engine(Arc::new(ScriptedExecutor::new()), app);

        let err = engine.deploy(&UUID.parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, ComponentError::Precondition { .. }));
        assert!(err.to_string().contains("not enabled"));
    }

    #[tokio::test(start_paused = true)]
    async fn ip_bans_delete_existing_decisions_before_adding() {
        let app = app_with(vec![rule(
            9,
            ProtectionMode::IpBan,
            json!([{"field": "ip", "operator": "in", "value": "198.51.100.9,203.0.113.44"}]),
        )]);
        let executor = Arc::new(
            ScriptedExecutor::new()
                .respond("decisions list --ip 198.51.100.9", StepOutput::ok("found"))
                .respond(
                    "decisions list --ip 203.0.113.44",
                    StepOutput {
                        stdout: String::new(),
                        stderr: String::new(),
                        code: Some(1),
                    },
                ),
        );
        let engine = engine(Arc::clone(&executor), app);

        let report = engine.apply_ip_bans(&UUID.parse().unwrap()).await.unwrap();

        assert_eq!(
            executor.count_matching("decisions delete --ip 198.51.100.9"),
            1
        );
        assert_eq!(
            executor.count_matching("decisions delete --ip 203.0.113.44"),
            0
        );
        assert_eq!(executor.count_matching("--duration 1h --type ban"), 2);
        assert!(
            executor
                .commands()
                .iter()
                .any(|c| c.contains("--reason 'Firewall rule: rule 9'"))
        );
        assert_eq!(
            report.steps.iter().filter(|s| s.starts_with("banned")).count(),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_ban_removal_is_loud() {
        let mut app = app_with(vec![rule(
            9,
            ProtectionMode::IpBan,
            json!([{"field": "ip", "operator": "equals", "value": "198.51.100.9"}]),
        )]);
        app.firewall.as_mut().unwrap().rules[0].enabled = false;
        let executor = Arc::new(ScriptedExecutor::new().respond(
            "decisions delete",
            StepOutput {
                stdout: String::new(),
                stderr: "connection reset".to_owned(),
                code: Some(1),
            },
        ));
        let engine = engine(Arc::clone(&executor), app);

        let err = engine.apply_ip_bans(&UUID.parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, ComponentError::Verification { .. }));
        assert!(err.to_string().contains("198.51.100.9"));
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn remove_rules_prunes_files_and_acquis() {
        let uuid: Uuid = UUID.parse().unwrap();
        let settings = StackSettings::default();
        let mut seeded = AcquisConfig::parse("");
        seeded.ensure_traefik_source();
        seeded.upsert_appsec(AppsecSource::for_application(&uuid, &settings));
        let executor = Arc::new(ScriptedExecutor::new().respond(
            "cat /var/lib/warden/crowdsec/config/acquis.yaml",
            StepOutput::ok(seeded.render()),
        ));
        let engine = engine(Arc::clone(&executor), app_with(Vec::new()));

        let report = engine.remove_rules(&uuid).await.unwrap();

        assert_eq!(report.phase, InstallPhase::Installed);
        let cleanup = executor
            .commands()
            .into_iter()
            .find(|c| c.contains("rm -f"))
            .unwrap();
        assert!(cleanup.contains(&format!("app-{uuid}.yaml")));
        assert!(cleanup.contains(&format!("scenarios/warden-{uuid}-*.yaml")));
        let manifest = executor.upload_content("acquis.yaml").unwrap();
        assert!(!manifest.contains(&uuid.to_string()));
        assert!(manifest.contains("access.log"));
        assert_eq!(executor.count_matching("kill -SIGHUP 1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn remove_ip_bans_sweeps_every_rule() {
        let app = app_with(vec![
            rule(
                1,
                ProtectionMode::IpBan,
                json!([{"field": "ip", "operator": "equals", "value": "198.51.100.9"}]),
            ),
            rule(
                2,
                ProtectionMode::IpBan,
                json!([{"field": "ip", "operator": "in", "value": "198.51.100.9,203.0.113.44"}]),
            ),
        ]);
        let executor = Arc::new(ScriptedExecutor::new());
        let engine = engine(Arc::clone(&executor), app);

        let report = engine.remove_ip_bans(&UUID.parse().unwrap()).await.unwrap();

        // Duplicate IPs across rules collapse to one delete each.
        assert_eq!(executor.count_matching("decisions delete"), 2);
        assert_eq!(report.steps.len(), 2);
    }
}
