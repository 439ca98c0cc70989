//! AppSec rule compilation.
//!
//! Custom-AppSec rules become in-band WAF rules evaluated by the
//! agent's AppSec component before the request reaches the upstream,
//! which is what makes them suitable for path, header, and body
//! inspection. Each application gets one config doc naming its rule
//! set plus one YAML file per rule.

use serde::Serialize;

use crate::error::ComponentError;
use crate::model::{Application, FirewallConfig, FirewallRule, RuleCondition};
use crate::rules::NamedYaml;

#[derive(Debug, Serialize)]
struct AppsecRuleDoc {
    name: String,
    description: String,
    rules: Vec<ConditionDoc>,
    labels: RuleLabels,
}

#[derive(Debug, Serialize)]
struct ConditionDoc {
    zones: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<Vec<&'static str>>,
    #[serde(rename = "match")]
    matcher: MatchDoc,
    #[serde(skip_serializing_if = "Option::is_none")]
    transform: Option<Vec<&'static str>>,
}

#[derive(Debug, Serialize)]
struct MatchDoc {
    #[serde(rename = "type")]
    kind: &'static str,
    value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    negate: Option<bool>,
}

#[derive(Debug, Serialize)]
struct RuleLabels {
    #[serde(rename = "type")]
    kind: &'static str,
    service: &'static str,
    behavior: &'static str,
    confidence: u8,
    spoofable: u8,
    label: String,
    classification: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
struct AppsecConfigDoc {
    name: String,
    default_remediation: String,
    default_pass_action: &'static str,
    blocked_http_code: u16,
    passed_http_code: u16,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    inband_rules: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    outofband_rules: Vec<String>,
    log_level: &'static str,
}

/// Request zones the AppSec engine can inspect for a given rule field.
fn zones(field: &str) -> Vec<&'static str> {
    match field {
        "path" | "request_path" => vec!["URI"],
        "uri_full" => vec!["URI_FULL"],
        "query_parameter" => vec!["ARGS"],
        "post_body" => vec!["BODY_ARGS"],
        "user_agent" | "referer" | "host" => vec!["HEADERS"],
        "method" => vec!["METHOD"],
        _ => Vec::new(),
    }
}

/// Header fields need a variable to pick the header out of the zone.
fn header_variable(field: &str) -> Option<&'static str> {
    match field {
        "user_agent" => Some("User-Agent"),
        "referer" => Some("Referer"),
        "host" => Some("Host"),
        _ => None,
    }
}

fn transforms(field: &str) -> Option<Vec<&'static str>> {
    match field {
        "path" | "request_path" | "uri_full" | "user_agent" | "referer" => vec!["lowercase"].into(),
        _ => None,
    }
}

fn match_doc(operator: &str, value: String) -> Option<MatchDoc> {
    let (kind, negate) = match operator {
        "equals" => ("equals", None),
        "not_equals" => ("equals", Some(true)),
        "contains" => ("contains", None),
        "not_contains" => ("contains", Some(true)),
        "starts_with" | "startsWith" => ("startsWith", None),
        "ends_with" | "endsWith" => ("endsWith", None),
        "regex" => ("regex", None),
        _ => return None,
    };
    Some(MatchDoc {
        kind,
        value,
        negate,
    })
}

fn condition_doc(condition: &RuleCondition) -> Option<ConditionDoc> {
    let zones = zones(&condition.field);
    if zones.is_empty() {
        return None;
    }
    let matcher = match_doc(&condition.operator, condition.value_text())?;
    Some(ConditionDoc {
        zones,
        variables: header_variable(&condition.field).map(|v| vec![v]),
        matcher,
        transform: transforms(&condition.field),
    })
}

/// Rule names double as file references in the config doc, so they use
/// the namespaced `warden/...` form.
pub(crate) fn rule_name(rule: &FirewallRule) -> String {
    let snake = rule
        .name
        .to_lowercase()
        .replace([' ', '-', '/'], "_");
    format!("warden/custom_rule_{}_{}", rule.id, snake)
}

/// One AppSec rule file. `None` when no condition maps to an
/// inspectable zone, in which case the rule has no AppSec rendering.
pub(crate) fn rule_doc(rule: &FirewallRule) -> Result<Option<NamedYaml>, ComponentError> {
    let conditions: Vec<ConditionDoc> = rule
        .conditions
        .conditions()
        .iter()
        .filter_map(condition_doc)
        .collect();
    if conditions.is_empty() {
        return Ok(None);
    }

    let doc = AppsecRuleDoc {
        name: rule_name(rule),
        description: rule
            .description
            .clone()
            .unwrap_or_else(|| format!("Generated rule: {}", rule.name)),
        rules: conditions,
        labels: RuleLabels {
            kind: "exploit",
            service: "http",
            behavior: "http:exploit",
            confidence: 2,
            spoofable: 0,
            label: format!("Warden custom rule: {}", rule.name),
            classification: vec!["attack.T1190"],
        },
    };
    let filename = format!("custom-appsec-{}.yaml", rule.id);
    let content = serde_yaml::to_string(&doc)
        .map_err(|e| ComponentError::parse(format!("appsec rule {filename}"), e.to_string()))?;
    Ok(Some(NamedYaml { filename, content }))
}

/// The per-application AppSec config doc referenced from `acquis.yaml`.
/// Rules run in-band (blocking) unless the config asks for out-of-band
/// (monitor-only) evaluation.
pub(crate) fn config_doc(
    application: &Application,
    config: &FirewallConfig,
    rule_names: Vec<String>,
) -> Result<NamedYaml, ComponentError> {
    let (inband_rules, outofband_rules) = if config.appsec_outofband {
        (Vec::new(), rule_names)
    } else {
        (rule_names, Vec::new())
    };
    let doc = AppsecConfigDoc {
        name: format!("warden/app-{}", application.uuid),
        default_remediation: config.default_remediation.clone(),
        default_pass_action: "allow",
        blocked_http_code: config.blocked_http_code,
        passed_http_code: config.passed_http_code,
        inband_rules,
        outofband_rules,
        log_level: "info",
    };
    let filename = format!("app-{}.yaml", application.uuid);
    let content = serde_yaml::to_string(&doc)
        .map_err(|e| ComponentError::parse(format!("appsec config {filename}"), e.to_string()))?;
    Ok(NamedYaml { filename, content })
}
