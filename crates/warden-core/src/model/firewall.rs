// ── Firewall domain types ──

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a rule is enforced on the server.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProtectionMode {
    /// Direct LAPI decisions against the IPs in the conditions.
    IpBan,
    /// Leaky-bucket scenario counting matching requests per source IP.
    RateLimit,
    /// Trigger scenario on the GeoIP-enriched country code.
    GeoBlock,
    /// Inline AppSec rule evaluated on the request itself.
    CustomAppsec,
}

/// What a matching rule does to the request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RuleAction {
    Block,
    Allow,
    Log,
    Captcha,
}

impl RuleAction {
    /// CrowdSec remediation name for scenario labels and AppSec
    /// configs. `Allow` still maps to `ban`: allowlist rules ban the
    /// traffic that falls *outside* the list.
    pub fn remediation(self) -> &'static str {
        match self {
            Self::Block | Self::Allow => "ban",
            Self::Captcha => "captcha",
            Self::Log => "log",
        }
    }
}

/// How multiple conditions on one rule combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOp {
    #[default]
    And,
    Or,
}

/// One field/operator/value predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: String,
    #[serde(default = "default_operator")]
    pub operator: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

fn default_operator() -> String {
    "equals".into()
}

impl RuleCondition {
    /// The value as display text. Numbers and booleans stringify;
    /// anything without a scalar reading becomes empty.
    pub fn value_text(&self) -> String {
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            _ => String::new(),
        }
    }

    /// The value as a list: arrays element-wise, strings split on
    /// commas. Entries are trimmed; empties dropped.
    pub fn value_list(&self) -> Vec<String> {
        let items: Vec<String> = match &self.value {
            serde_json::Value::Array(items) => items
                .iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            serde_json::Value::String(s) => s.split(',').map(str::to_owned).collect(),
            serde_json::Value::Number(n) => vec![n.to_string()],
            _ => Vec::new(),
        };
        items
            .into_iter()
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// The raw conditions payload of a rule. Stored rules arrive in three
/// shapes: `{"rules": [...]}`, a bare list, or a single condition
/// object. Malformed entries are dropped, never fatal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionSet(pub serde_json::Value);

impl ConditionSet {
    pub fn new(conditions: serde_json::Value) -> Self {
        Self(conditions)
    }

    /// Normalize to a flat condition list, whatever the stored shape.
    pub fn conditions(&self) -> Vec<RuleCondition> {
        let items: Vec<serde_json::Value> = match &self.0 {
            serde_json::Value::Array(items) => items.clone(),
            serde_json::Value::Object(map) => match map.get("rules") {
                Some(serde_json::Value::Array(items)) => items.clone(),
                // A single bare condition object.
                _ => vec![self.0.clone()],
            },
            _ => Vec::new(),
        };

        items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<RuleCondition>(item) {
                Ok(cond) if !cond.field.is_empty() => Some(cond),
                Ok(_) => None,
                Err(err) => {
                    tracing::debug!(error = %err, "dropping malformed rule condition");
                    None
                }
            })
            .collect()
    }

    /// Syntactically valid IPs from IP-bearing conditions, deduplicated
    /// in first-seen order.
    pub fn ips(&self) -> Vec<IpAddr> {
        let mut seen = Vec::new();
        for cond in self.conditions() {
            if !matches!(cond.field.as_str(), "ip" | "ip_address" | "source_ip") {
                continue;
            }
            for raw in cond.value_list() {
                match raw.parse::<IpAddr>() {
                    Ok(ip) if !seen.contains(&ip) => seen.push(ip),
                    Ok(_) => {}
                    Err(_) => {
                        tracing::debug!(value = %raw, "skipping condition value that is not an IP");
                    }
                }
            }
        }
        seen
    }

    /// Whether any condition targets the GeoIP country code. Such rules
    /// are scenario-compiled, never AppSec-compiled.
    pub fn has_country_condition(&self) -> bool {
        self.conditions()
            .iter()
            .any(|c| matches!(c.field.as_str(), "country_code" | "country"))
    }

    pub fn is_empty(&self) -> bool {
        self.conditions().is_empty()
    }
}

/// A declarative per-application firewall rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallRule {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub protection_mode: ProtectionMode,
    #[serde(default = "default_action")]
    pub action: RuleAction,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub conditions: ConditionSet,
    /// Ban length in seconds. Falls back to the config default.
    #[serde(default)]
    pub remediation_duration: Option<u64>,
    /// Leaky-bucket size for rate-limit rules.
    #[serde(default)]
    pub capacity: Option<u32>,
    /// Leaky-bucket drain interval for rate-limit rules, e.g. `10s`.
    #[serde(default)]
    pub leakspeed: Option<String>,
    #[serde(default)]
    pub logical_operator: LogicalOp,
}

fn default_action() -> RuleAction {
    RuleAction::Block
}

fn default_true() -> bool {
    true
}

impl FirewallRule {
    /// Resolved ban duration in seconds.
    pub fn effective_duration(&self, config: &FirewallConfig) -> u64 {
        self.remediation_duration.unwrap_or(config.ban_duration)
    }
}

/// Per-application firewall configuration, owning its ordered rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub appsec_enabled: bool,
    #[serde(default)]
    pub appsec_outofband: bool,
    #[serde(default = "default_remediation")]
    pub default_remediation: String,
    #[serde(default = "default_ban_duration")]
    pub ban_duration: u64,
    #[serde(default = "default_blocked_code")]
    pub blocked_http_code: u16,
    #[serde(default = "default_passed_code")]
    pub passed_http_code: u16,
    #[serde(default)]
    pub rules: Vec<FirewallRule>,
}

fn default_remediation() -> String {
    "ban".into()
}

fn default_ban_duration() -> u64 {
    3_600
}

fn default_blocked_code() -> u16 {
    403
}

fn default_passed_code() -> u16 {
    200
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            appsec_enabled: true,
            appsec_outofband: false,
            default_remediation: default_remediation(),
            ban_duration: default_ban_duration(),
            blocked_http_code: default_blocked_code(),
            passed_http_code: default_passed_code(),
            rules: Vec::new(),
        }
    }
}

impl FirewallConfig {
    /// Enabled rules in priority order (highest priority first, stable
    /// on equal priority).
    pub fn enabled_rules(&self) -> Vec<&FirewallRule> {
        let mut rules: Vec<&FirewallRule> = self.rules.iter().filter(|r| r.enabled).collect();
        rules.sort_by_key(|r| std::cmp::Reverse(r.priority));
        rules
    }

    pub fn rule(&self, id: i64) -> Option<&FirewallRule> {
        self.rules.iter().find(|r| r.id == id)
    }
}

// ── Alerts ──────────────────────────────────────────────────────────

/// Platform alert taxonomy mapped from raw CrowdSec scenarios.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertType {
    SqlInjection,
    XssAttack,
    PortScan,
    BruteForce,
    PathTraversal,
    RemoteCodeExecution,
    SuspiciousBot,
    RateLimitExceeded,
    SuspiciousActivity,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Resolved,
}

/// A detected security event attributed to an application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallAlert {
    pub id: Uuid,
    pub application: Uuid,
    pub ip: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub scenario: String,
    pub message: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn condition_set_accepts_bare_list() {
        let set = ConditionSet::new(json!([
            {"field": "ip", "operator": "equals", "value": "1.2.3.4"},
            {"field": "user_agent", "operator": "contains", "value": "bot"},
        ]));
        let conds = set.conditions();
        assert_eq!(conds.len(), 2);
        assert_eq!(conds[0].field, "ip");
    }

    #[test]
    fn condition_set_accepts_rules_wrapper() {
        let set = ConditionSet::new(json!({"rules": [
            {"field": "source_ip", "value": "10.0.0.1"},
        ]}));
        assert_eq!(set.conditions().len(), 1);
        assert_eq!(set.conditions()[0].operator, "equals");
    }

    #[test]
    fn condition_set_accepts_single_object() {
        let set = ConditionSet::new(json!({"field": "ip", "value": "1.2.3.4"}));
        assert_eq!(set.conditions().len(), 1);
    }

    #[test]
    fn ips_dedup_and_validate() {
        let set = ConditionSet::new(json!([
            {"field": "ip", "value": "1.2.3.4"},
            {"field": "ip_address", "value": "1.2.3.4, 5.6.7.8"},
            {"field": "source_ip", "value": "not-an-ip"},
            {"field": "user_agent", "value": "8.8.8.8"},
        ]));
        let ips: Vec<String> = set.ips().iter().map(ToString::to_string).collect();
        assert_eq!(ips, vec!["1.2.3.4", "5.6.7.8"]);
    }

    #[test]
    fn ips_accept_ipv6() {
        let set = ConditionSet::new(json!({"field": "ip", "value": "2001:db8::1"}));
        assert_eq!(set.ips().len(), 1);
    }

    #[test]
    fn country_condition_detection() {
        let geo = ConditionSet::new(json!([
            {"field": "country_code", "operator": "in", "value": "CN,RU"},
        ]));
        assert!(geo.has_country_condition());

        let plain = ConditionSet::new(json!([{"field": "ip", "value": "1.1.1.1"}]));
        assert!(!plain.has_country_condition());
    }

    #[test]
    fn value_list_splits_strings_and_arrays() {
        let from_string = RuleCondition {
            field: "country_code".into(),
            operator: "in".into(),
            value: json!(" CN , RU ,KP"),
        };
        assert_eq!(from_string.value_list(), vec!["CN", "RU", "KP"]);

        let from_array = RuleCondition {
            field: "country_code".into(),
            operator: "in".into(),
            value: json!(["CN", "RU"]),
        };
        assert_eq!(from_array.value_list(), vec!["CN", "RU"]);
    }

    #[test]
    fn enabled_rules_order_by_priority() {
        let config = FirewallConfig {
            rules: vec![
                FirewallRule {
                    id: 1,
                    name: "low".into(),
                    description: None,
                    protection_mode: ProtectionMode::CustomAppsec,
                    action: RuleAction::Block,
                    enabled: true,
                    priority: 1,
                    conditions: ConditionSet::default(),
                    remediation_duration: None,
                    capacity: None,
                    leakspeed: None,
                    logical_operator: LogicalOp::And,
                },
                FirewallRule {
                    id: 2,
                    name: "disabled".into(),
                    description: None,
                    protection_mode: ProtectionMode::IpBan,
                    action: RuleAction::Block,
                    enabled: false,
                    priority: 50,
                    conditions: ConditionSet::default(),
                    remediation_duration: None,
                    capacity: None,
                    leakspeed: None,
                    logical_operator: LogicalOp::And,
                },
                FirewallRule {
                    id: 3,
                    name: "high".into(),
                    description: None,
                    protection_mode: ProtectionMode::GeoBlock,
                    action: RuleAction::Block,
                    enabled: true,
                    priority: 10,
                    conditions: ConditionSet::default(),
                    remediation_duration: None,
                    capacity: None,
                    leakspeed: None,
                    logical_operator: LogicalOp::And,
                },
            ],
            ..FirewallConfig::default()
        };

        let ids: Vec<i64> = config.enabled_rules().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn effective_duration_falls_back_to_config() {
        let config = FirewallConfig::default();
        let rule = FirewallRule {
            id: 1,
            name: "r".into(),
            description: None,
            protection_mode: ProtectionMode::IpBan,
            action: RuleAction::Block,
            enabled: true,
            priority: 0,
            conditions: ConditionSet::default(),
            remediation_duration: None,
            capacity: None,
            leakspeed: None,
            logical_operator: LogicalOp::And,
        };
        assert_eq!(rule.effective_duration(&config), 3_600);
    }

    #[test]
    fn protection_mode_round_trips_snake_case() {
        let mode: ProtectionMode = "custom_appsec".parse().unwrap();
        assert_eq!(mode, ProtectionMode::CustomAppsec);
        assert_eq!(ProtectionMode::IpBan.to_string(), "ip_ban");
    }
}
