//! Scenario compilation.
//!
//! Rate-limit and geo-block rules become CrowdSec scenarios: YAML docs
//! the agent hot-loads from its scenarios directory. Rate limits map to
//! `leaky` buckets keyed by source IP; geo rules map to `trigger`
//! scenarios over the GeoIP-enriched ISO code. Rule conditions are
//! translated into the agent's expression language against the fields
//! the Traefik parser chain populates.

use serde::Serialize;

use crate::duration::format_ban_duration;
use crate::error::ComponentError;
use crate::model::{
    Application, FirewallConfig, FirewallRule, LogicalOp, ProtectionMode, RuleAction,
    RuleCondition,
};
use crate::rules::NamedYaml;

/// Every scenario buckets by client address; that is what a ban
/// ultimately applies to.
const GROUP_BY: &str = "evt.Meta.source_ip";

/// Base filter: only events the HTTP parser chain produced.
const HTTP_EVENTS: &str = r#"evt.Meta.service == "http""#;

#[derive(Debug, Serialize)]
struct ScenarioDoc {
    #[serde(rename = "type")]
    kind: &'static str,
    name: String,
    description: String,
    filter: String,
    groupby: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    capacity: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    leakspeed: Option<String>,
    blackhole: String,
    labels: ScenarioLabels,
}

#[derive(Debug, Serialize)]
struct ScenarioLabels {
    service: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    /// Required by the agent's profiles to actually create a decision.
    remediation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    protection_mode: Option<ProtectionMode>,
    application_uuid: String,
    rule_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    rule_name: Option<String>,
}

/// Lowercases and collapses every non-alphanumeric run to `_`, the
/// charset scenario names tolerate.
pub(crate) fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_sep = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            in_sep = false;
        } else if !in_sep {
            out.push('_');
            in_sep = true;
        }
    }
    out
}

/// Maps rule fields to the event fields the Traefik parser chain sets.
pub(crate) fn event_field(field: &str) -> String {
    match field {
        "request_path" | "path" => "evt.Parsed.request".to_owned(),
        "uri_full" | "query_parameter" => "evt.Parsed.uri".to_owned(),
        "method" => "evt.Parsed.verb".to_owned(),
        "user_agent" => "evt.Parsed.http_user_agent".to_owned(),
        "ip" | "ip_address" | "source_ip" => "evt.Meta.source_ip".to_owned(),
        "host" => "evt.Meta.target_fqdn".to_owned(),
        "referer" => "evt.Parsed.http_referer".to_owned(),
        "protocol" => "evt.Parsed.http_version".to_owned(),
        "country" | "country_code" => "evt.Enriched.IsoCode".to_owned(),
        other => format!("evt.Parsed.{other}"),
    }
}

fn quoted_list(condition: &RuleCondition) -> String {
    condition
        .value_list()
        .iter()
        .map(|item| format!("'{item}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// One condition as an expression-language clause. Regex values pass
/// through untouched (single-quoted); everything else gets its double
/// quotes escaped.
fn condition_expr(condition: &RuleCondition) -> Option<String> {
    if condition.field.is_empty() {
        return None;
    }
    let field = event_field(&condition.field);
    let value = condition.value_text();
    let escaped = value.replace('"', "\\\"");

    Some(match condition.operator.as_str() {
        "not_equals" => format!("{field} != \"{escaped}\""),
        "contains" => format!("{field} contains \"{escaped}\""),
        "not_contains" => format!("!({field} contains \"{escaped}\")"),
        "starts_with" | "startsWith" => format!("{field} startsWith \"{escaped}\""),
        "ends_with" | "endsWith" => format!("{field} endsWith \"{escaped}\""),
        "regex" => format!("{field} matches '{value}'"),
        "in" => format!("{field} in [{}]", quoted_list(condition)),
        "not_in" => format!("{field} not in [{}]", quoted_list(condition)),
        "gt" => format!("{field} > {value}"),
        "gte" => format!("{field} >= {value}"),
        "lt" => format!("{field} < {value}"),
        "lte" => format!("{field} <= {value}"),
        // `equals` and anything unrecognised.
        _ => format!("{field} == \"{escaped}\""),
    })
}

/// Full scenario filter: the HTTP base clause plus every translatable
/// condition, joined by the rule's logical operator. Untranslatable
/// conditions are dropped, not fatal.
pub(crate) fn filter_expression(rule: &FirewallRule) -> String {
    let mut clauses = vec![HTTP_EVENTS.to_owned()];
    for condition in rule.conditions.conditions() {
        if let Some(expr) = condition_expr(&condition) {
            clauses.push(expr);
        } else {
            tracing::debug!(rule = rule.id, field = %condition.field, "condition skipped in scenario filter");
        }
    }
    let joiner = match rule.logical_operator {
        LogicalOp::And => " and ",
        LogicalOp::Or => " or ",
    };
    clauses.join(joiner)
}

/// Leaky-bucket scenario for a rate-limit rule. Capacity and leakspeed
/// default to "ban on the second hit within 10s" when the rule does
/// not set them.
pub(crate) fn leaky(
    rule: &FirewallRule,
    application: &Application,
    config: &FirewallConfig,
) -> Result<NamedYaml, ComponentError> {
    let doc = ScenarioDoc {
        kind: "leaky",
        name: format!(
            "warden/{}_{}_{}",
            sanitize_name(&rule.name),
            application.uuid,
            rule.id
        ),
        description: rule
            .description
            .clone()
            .unwrap_or_else(|| format!("Custom rule: {} (IP ban on abuse)", rule.name)),
        filter: filter_expression(rule),
        groupby: GROUP_BY,
        capacity: Some(rule.capacity.unwrap_or(1)),
        leakspeed: Some(rule.leakspeed.clone().unwrap_or_else(|| "10s".to_owned())),
        blackhole: format_ban_duration(rule.effective_duration(config))?,
        labels: ScenarioLabels {
            service: "http",
            kind: "custom_block",
            remediation: true,
            protection_mode: Some(rule.protection_mode),
            application_uuid: application.uuid.to_string(),
            rule_id: rule.id.to_string(),
            rule_name: Some(rule.name.clone()),
        },
    };
    render(format!("rule-{}.yaml", rule.id), &doc)
}

/// Trigger scenario for a geo rule. Membership direction folds the
/// condition operator together with the rule action: `in` + `block`
/// bans listed countries, `in` + `allow` bans everyone else, and the
/// negated operators flip either reading.
pub(crate) fn geo(
    rule: &FirewallRule,
    application: &Application,
    config: &FirewallConfig,
) -> Result<Option<NamedYaml>, ComponentError> {
    let mut codes: Vec<String> = Vec::new();
    let mut negated_operator = false;
    for condition in rule.conditions.conditions() {
        if matches!(condition.field.as_str(), "country_code" | "country") {
            for code in condition.value_list() {
                let code = code.to_ascii_uppercase();
                if !codes.contains(&code) {
                    codes.push(code);
                }
            }
            negated_operator = matches!(condition.operator.as_str(), "not_in" | "not_equals");
        }
    }
    if codes.is_empty() {
        return Ok(None);
    }

    let ban_outside = negated_operator != (rule.action == RuleAction::Allow);
    let membership = if ban_outside { "not in" } else { "in" };
    let listed = codes
        .iter()
        .map(|code| format!("'{code}'"))
        .collect::<Vec<_>>()
        .join(", ");

    let doc = ScenarioDoc {
        kind: "trigger",
        name: format!(
            "warden/geo-{}-{}-{}",
            rule.action, application.uuid, rule.id
        ),
        description: rule
            .description
            .clone()
            .unwrap_or_else(|| format!("Geo-blocking rule for {}", application.name)),
        filter: format!("evt.Enriched.IsoCode {membership} [{listed}]"),
        groupby: GROUP_BY,
        capacity: None,
        leakspeed: None,
        blackhole: format_ban_duration(rule.effective_duration(config))?,
        labels: ScenarioLabels {
            service: "appsec",
            kind: "geo_blocking",
            remediation: true,
            protection_mode: None,
            application_uuid: application.uuid.to_string(),
            rule_id: rule.id.to_string(),
            rule_name: None,
        },
    };
    render(format!("geo-{}.yaml", rule.id), &doc).map(Some)
}

fn render(filename: String, doc: &ScenarioDoc) -> Result<NamedYaml, ComponentError> {
    let content = serde_yaml::to_string(doc)
        .map_err(|e| ComponentError::parse(format!("scenario {filename}"), e.to_string()))?;
    Ok(NamedYaml { filename, content })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn rule(conditions: serde_json::Value) -> FirewallRule {
        FirewallRule {
            id: 7,
            name: "Block scrapers".to_owned(),
            description: None,
            protection_mode: ProtectionMode::RateLimit,
            action: RuleAction::Block,
            enabled: true,
            priority: 0,
            conditions: crate::model::ConditionSet::new(conditions),
            remediation_duration: None,
            capacity: None,
            leakspeed: None,
            logical_operator: LogicalOp::And,
        }
    }

    fn app() -> Application {
        Application::new(
            Uuid::parse_str("2b7f4c1e-9d3a-4f6b-8a21-5c9e7d0f1a2b").unwrap(),
            "shop",
            "web-1",
        )
    }

    #[test]
    fn filter_joins_conditions_with_the_logical_operator() {
        let mut r = rule(json!([
            {"field": "request_path", "operator": "startsWith", "value": "/admin"},
            {"field": "user_agent", "operator": "contains", "value": "bot"}
        ]));
        assert_eq!(
            filter_expression(&r),
            r#"evt.Meta.service == "http" and evt.Parsed.request startsWith "/admin" and evt.Parsed.http_user_agent contains "bot""#
        );

        r.logical_operator = LogicalOp::Or;
        assert!(filter_expression(&r).contains(" or evt.Parsed.request "));
    }

    #[test]
    fn operators_cover_negation_lists_and_comparisons() {
        let r = rule(json!([
            {"field": "user_agent", "operator": "not_contains", "value": "Mozilla"},
            {"field": "method", "operator": "in", "value": "POST, PUT"},
            {"field": "status", "operator": "gte", "value": "500"}
        ]));
        let filter = filter_expression(&r);
        assert!(filter.contains(r#"!(evt.Parsed.http_user_agent contains "Mozilla")"#));
        assert!(filter.contains("evt.Parsed.verb in ['POST', 'PUT']"));
        assert!(filter.contains("evt.Parsed.status >= 500"));
    }

    #[test]
    fn double_quotes_are_escaped_except_in_regex() {
        let r = rule(json!([
            {"field": "request_path", "operator": "equals", "value": "/say-\"hi\""},
            {"field": "uri_full", "operator": "regex", "value": "^/api/v[0-9]+\""}
        ]));
        let filter = filter_expression(&r);
        assert!(filter.contains(r#"evt.Parsed.request == "/say-\"hi\"""#));
        assert!(filter.contains(r#"evt.Parsed.uri matches '^/api/v[0-9]+"'"#));
    }

    #[test]
    fn leaky_scenario_fills_bucket_defaults() {
        let r = rule(json!([{"field": "request_path", "operator": "equals", "value": "/login"}]));
        let config = FirewallConfig::default();
        let yaml = leaky(&r, &app(), &config).unwrap();
        assert_eq!(yaml.filename, "rule-7.yaml");

        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml.content).unwrap();
        assert_eq!(doc["type"].as_str(), Some("leaky"));
        assert_eq!(
            doc["name"].as_str(),
            Some("warden/block_scrapers_2b7f4c1e-9d3a-4f6b-8a21-5c9e7d0f1a2b_7")
        );
        assert_eq!(doc["capacity"].as_u64(), Some(1));
        assert_eq!(doc["leakspeed"].as_str(), Some("10s"));
        // Default config ban duration is 3600s.
        assert_eq!(doc["blackhole"].as_str(), Some("1h"));
        assert_eq!(doc["labels"]["remediation"].as_bool(), Some(true));
        assert_eq!(
            doc["labels"]["application_uuid"].as_str(),
            Some("2b7f4c1e-9d3a-4f6b-8a21-5c9e7d0f1a2b")
        );
    }

    #[test]
    fn geo_blocklist_and_allowlist_flip_membership() {
        let mut r = rule(json!([
            {"field": "country_code", "operator": "in", "value": "cn, ru"}
        ]));
        r.protection_mode = ProtectionMode::GeoBlock;
        let config = FirewallConfig::default();

        let blocked = geo(&r, &app(), &config).unwrap().unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&blocked.content).unwrap();
        assert_eq!(
            doc["filter"].as_str(),
            Some("evt.Enriched.IsoCode in ['CN', 'RU']")
        );
        assert_eq!(doc["type"].as_str(), Some("trigger"));
        assert_eq!(doc["labels"]["type"].as_str(), Some("geo_blocking"));

        r.action = RuleAction::Allow;
        let allowlist = geo(&r, &app(), &config).unwrap().unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&allowlist.content).unwrap();
        assert_eq!(
            doc["filter"].as_str(),
            Some("evt.Enriched.IsoCode not in ['CN', 'RU']")
        );
        assert!(doc["name"].as_str().unwrap().starts_with("warden/geo-allow-"));
    }

    #[test]
    fn geo_without_country_codes_compiles_to_nothing() {
        let mut r = rule(json!([{"field": "request_path", "operator": "equals", "value": "/x"}]));
        r.protection_mode = ProtectionMode::GeoBlock;
        assert!(geo(&r, &app(), &FirewallConfig::default()).unwrap().is_none());
    }
}
