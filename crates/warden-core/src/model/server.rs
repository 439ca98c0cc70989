// ── Server and security-stack state ──
//
// Component flags are only ever changed by applying a `SecurityUpdate`
// returned from an installer or validator. Jobs never reach into a
// shared `Server` and flip booleans; they compute a patch, and the
// fleet store swaps the record under its own lock.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use warden_remote::HostSpec;

/// A managed remote Docker host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    /// Unique name, the primary key across the fleet.
    pub name: String,
    /// SSH coordinates.
    pub host: HostSpec,
    #[serde(default)]
    pub security: SecurityState,
}

impl Server {
    pub fn new(name: impl Into<String>, host: HostSpec) -> Self {
        Self {
            name: name.into(),
            host,
            security: SecurityState::default(),
        }
    }
}

/// Installed-component flags and validation bookkeeping for one server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct SecurityState {
    pub crowdsec_installed: bool,
    pub crowdsec_available: bool,
    pub crowdsec_lapi_url: Option<String>,
    /// Bouncer API key for the Traefik plugin. Never serialized; the
    /// secret-store seam handles at-rest representation.
    #[serde(skip)]
    pub bouncer_key: Option<SecretString>,
    pub traefik_logging_enabled: bool,
    pub traffic_logger_installed: bool,
    #[serde(skip)]
    pub traffic_logger_api_key: Option<SecretString>,
    pub installation_validated: bool,
    pub last_validation_at: Option<DateTime<Utc>>,
    pub validation_details: Option<ValidationDetails>,
}

impl SecurityState {
    /// Apply a patch, producing the next state. Fields absent from the
    /// patch are carried over unchanged.
    #[must_use]
    pub fn apply(&self, update: SecurityUpdate) -> Self {
        let mut next = self.clone();
        if let Some(v) = update.crowdsec_installed {
            next.crowdsec_installed = v;
        }
        if let Some(v) = update.crowdsec_available {
            next.crowdsec_available = v;
        }
        if let Some(v) = update.crowdsec_lapi_url {
            next.crowdsec_lapi_url = v;
        }
        if let Some(v) = update.bouncer_key {
            next.bouncer_key = v;
        }
        if let Some(v) = update.traefik_logging_enabled {
            next.traefik_logging_enabled = v;
        }
        if let Some(v) = update.traffic_logger_installed {
            next.traffic_logger_installed = v;
        }
        if let Some(v) = update.traffic_logger_api_key {
            next.traffic_logger_api_key = v;
        }
        if let Some(v) = update.installation_validated {
            next.installation_validated = v;
        }
        if let Some(v) = update.last_validation_at {
            next.last_validation_at = Some(v);
        }
        if let Some(v) = update.validation_details {
            next.validation_details = Some(v);
        }
        next
    }
}

/// Record-update patch for [`SecurityState`]. `None` means "leave as
/// is"; the inner `Option` on nullable fields distinguishes "set to
/// nothing" from "don't touch".
#[derive(Debug, Clone, Default)]
pub struct SecurityUpdate {
    pub crowdsec_installed: Option<bool>,
    pub crowdsec_available: Option<bool>,
    pub crowdsec_lapi_url: Option<Option<String>>,
    pub bouncer_key: Option<Option<SecretString>>,
    pub traefik_logging_enabled: Option<bool>,
    pub traffic_logger_installed: Option<bool>,
    pub traffic_logger_api_key: Option<Option<SecretString>>,
    pub installation_validated: Option<bool>,
    pub last_validation_at: Option<DateTime<Utc>>,
    pub validation_details: Option<ValidationDetails>,
}

impl SecurityUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn crowdsec_installed(mut self, v: bool) -> Self {
        self.crowdsec_installed = Some(v);
        self
    }

    pub fn crowdsec_available(mut self, v: bool) -> Self {
        self.crowdsec_available = Some(v);
        self
    }

    pub fn crowdsec_lapi_url(mut self, v: Option<String>) -> Self {
        self.crowdsec_lapi_url = Some(v);
        self
    }

    pub fn bouncer_key(mut self, v: Option<SecretString>) -> Self {
        self.bouncer_key = Some(v);
        self
    }

    pub fn traefik_logging_enabled(mut self, v: bool) -> Self {
        self.traefik_logging_enabled = Some(v);
        self
    }

    pub fn traffic_logger_installed(mut self, v: bool) -> Self {
        self.traffic_logger_installed = Some(v);
        self
    }

    pub fn traffic_logger_api_key(mut self, v: Option<SecretString>) -> Self {
        self.traffic_logger_api_key = Some(v);
        self
    }

    pub fn installation_validated(mut self, v: bool) -> Self {
        self.installation_validated = Some(v);
        self
    }

    pub fn last_validation_at(mut self, v: DateTime<Utc>) -> Self {
        self.last_validation_at = Some(v);
        self
    }

    pub fn validation_details(mut self, v: ValidationDetails) -> Self {
        self.validation_details = Some(v);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.crowdsec_installed.is_none()
            && self.crowdsec_available.is_none()
            && self.crowdsec_lapi_url.is_none()
            && self.bouncer_key.is_none()
            && self.traefik_logging_enabled.is_none()
            && self.traffic_logger_installed.is_none()
            && self.traffic_logger_api_key.is_none()
            && self.installation_validated.is_none()
            && self.last_validation_at.is_none()
            && self.validation_details.is_none()
    }
}

/// One probed component inside a full-stack validation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub passed: bool,
    /// What was observed: a status string, a probe response, or the
    /// reason the check could not pass.
    pub detail: String,
}

impl ComponentCheck {
    pub fn pass(detail: impl Into<String>) -> Self {
        Self {
            passed: true,
            detail: detail.into(),
        }
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Structured result of a full-stack validation run, persisted on the
/// server record for the status surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationDetails {
    pub crowdsec: ComponentCheck,
    pub traefik_logging: ComponentCheck,
    pub traffic_logger: ComponentCheck,
    pub validated_at: DateTime<Utc>,
}

impl ValidationDetails {
    pub fn all_passed(&self) -> bool {
        self.crowdsec.passed && self.traefik_logging.passed && self.traffic_logger.passed
    }

    /// Components that did not pass, for targeted retry dispatch.
    pub fn failed_components(&self) -> Vec<&'static str> {
        let mut failed = Vec::new();
        if !self.crowdsec.passed {
            failed.push("crowdsec");
        }
        if !self.traefik_logging.passed {
            failed.push("traefik-logging");
        }
        if !self.traffic_logger.passed {
            failed.push("traffic-logger");
        }
        failed
    }
}
