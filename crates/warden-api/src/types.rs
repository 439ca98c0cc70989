//! Wire types for the CrowdSec Local API (v1).
//!
//! Shapes follow the LAPI swagger; fields the engine never reads are
//! left out and tolerated via `deny_unknown_fields` being off. Most
//! fields are defaulted because older LAPI builds omit them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Decisions ───────────────────────────────────────────────────────

/// An active remediation decision (ban, captcha, ...).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Decision {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub origin: Option<String>,
    /// Remediation kind: `ban`, `captcha`, ...
    #[serde(rename = "type")]
    pub decision_type: String,
    /// Decision scope: `Ip`, `Range`, `Country`, ...
    pub scope: String,
    /// The banned value within the scope (an IP for scope `Ip`).
    pub value: String,
    /// Remaining duration in CrowdSec notation (`3h59m12s`).
    pub duration: String,
    #[serde(default)]
    pub scenario: Option<String>,
    #[serde(default)]
    pub until: Option<String>,
    #[serde(default)]
    pub simulated: Option<bool>,
}

/// Payload for creating decisions directly against the Local API.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NewDecision {
    /// Duration in CrowdSec notation (`30s`, `4h`).
    pub duration: String,
    pub origin: String,
    pub scenario: String,
    pub scope: String,
    #[serde(rename = "type")]
    pub decision_type: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Query filters for decision listing and deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecisionFilter {
    pub ip: Option<String>,
    pub scope: Option<String>,
    pub value: Option<String>,
    pub decision_type: Option<String>,
    pub origin: Option<String>,
}

impl DecisionFilter {
    pub fn for_ip(ip: impl Into<String>) -> Self {
        Self {
            ip: Some(ip.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    #[must_use]
    pub fn decision_type(mut self, decision_type: impl Into<String>) -> Self {
        self.decision_type = Some(decision_type.into());
        self
    }

    /// Render as query parameters; unset filters are omitted.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(ip) = &self.ip {
            params.push(("ip", ip.clone()));
        }
        if let Some(scope) = &self.scope {
            params.push(("scope", scope.clone()));
        }
        if let Some(value) = &self.value {
            params.push(("value", value.clone()));
        }
        if let Some(decision_type) = &self.decision_type {
            params.push(("type", decision_type.clone()));
        }
        if let Some(origin) = &self.origin {
            params.push(("origin", origin.clone()));
        }
        params
    }
}

// ── Alerts ──────────────────────────────────────────────────────────

/// One key/value pair of parsed event metadata.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct MetaItem {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// A single event bucketed into an alert.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct AlertEvent {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub meta: Vec<MetaItem>,
}

/// Attack source attached to an alert.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AlertSource {
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    /// Country code from the GeoIP enrichment.
    #[serde(default)]
    pub cn: Option<String>,
    #[serde(default)]
    pub as_name: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

/// A triggered scenario reported by the Local API.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Alert {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scenario: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub events_count: Option<i64>,
    #[serde(default)]
    pub source: AlertSource,
    #[serde(default)]
    pub decisions: Vec<Decision>,
    #[serde(default)]
    pub events: Vec<AlertEvent>,
    #[serde(default)]
    pub meta: Vec<MetaItem>,
    #[serde(default)]
    pub simulated: Option<bool>,
}

impl Alert {
    /// Look up a top-level meta entry by key.
    pub fn meta_value(&self, key: &str) -> Option<&str> {
        self.meta
            .iter()
            .find(|m| m.key == key)
            .map(|m| m.value.as_str())
    }
}

// ── Bouncers / status ───────────────────────────────────────────────

/// Response from `POST /v1/bouncers`.
#[derive(Debug, Clone, Deserialize)]
pub struct BouncerCreateResponse {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Response from `GET /v1/version`.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionResponse {
    #[serde(default)]
    pub version: Option<String>,
}
