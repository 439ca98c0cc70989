//! The per-server CrowdSec acquisition manifest (`acquis.yaml`).
//!
//! The file is multi-document YAML shared by every application on the
//! server, so edits are read-merge-write: fetch the current remote
//! text, merge the needed documents in, render, upload atomically.
//! Documents we do not understand pass through untouched; segments
//! that fail to parse at all are dropped with a warning rather than
//! aborting the write, since a partial manifest still feeds the agent
//! while a failed write starves every application at once.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::settings::{ACCESS_LOG_CONTAINER_PATH, ARTIFACT_NAMESPACE, StackSettings};

/// `labels:` block of an acquisition document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLabels {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_uuid: Option<String>,
}

/// A `source: file` document tailing log files on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSource {
    pub source: String,
    pub filenames: Vec<String>,
    pub labels: SourceLabels,
}

impl FileSource {
    /// The Traefik access-log tail every server needs once logging is
    /// integrated.
    pub fn traefik() -> Self {
        Self {
            source: "file".into(),
            filenames: vec![ACCESS_LOG_CONTAINER_PATH.into()],
            labels: SourceLabels {
                kind: "traefik".into(),
                application_uuid: None,
            },
        }
    }

    pub fn is_traefik(&self) -> bool {
        self.labels.kind == "traefik"
    }
}

/// A `source: appsec` document exposing one application's inline
/// WAF listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppsecSource {
    pub source: String,
    pub listen_addr: String,
    pub appsec_config: String,
    pub labels: SourceLabels,
}

impl AppsecSource {
    pub fn for_application(application: &Uuid, settings: &StackSettings) -> Self {
        Self {
            source: "appsec".into(),
            listen_addr: format!("0.0.0.0:{}", settings.appsec_port),
            appsec_config: format!("{ARTIFACT_NAMESPACE}/app-{application}"),
            labels: SourceLabels {
                kind: "appsec".into(),
                application_uuid: Some(application.to_string()),
            },
        }
    }

    pub fn application_uuid(&self) -> Option<&str> {
        self.labels.application_uuid.as_deref()
    }
}

/// One document of the manifest. Sources other than the two we manage
/// (journald, docker, whatever an operator added by hand) are carried
/// as raw mappings and re-emitted verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisDoc {
    File(FileSource),
    Appsec(AppsecSource),
    Other(serde_yaml::Mapping),
}

impl AcquisDoc {
    fn classify(value: serde_yaml::Value) -> Option<Self> {
        let mapping = value.as_mapping()?.clone();
        let source = value.get("source").and_then(serde_yaml::Value::as_str);
        match source {
            Some("file") => match serde_yaml::from_value::<FileSource>(value) {
                Ok(doc) => Some(Self::File(doc)),
                Err(_) => Some(Self::Other(mapping)),
            },
            Some("appsec") => match serde_yaml::from_value::<AppsecSource>(value) {
                Ok(doc) => Some(Self::Appsec(doc)),
                Err(_) => Some(Self::Other(mapping)),
            },
            _ => Some(Self::Other(mapping)),
        }
    }

    fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        match self {
            Self::File(doc) => serde_yaml::to_string(doc),
            Self::Appsec(doc) => serde_yaml::to_string(doc),
            Self::Other(mapping) => serde_yaml::to_string(mapping),
        }
    }
}

/// The ordered document list for one server.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcquisConfig {
    docs: Vec<AcquisDoc>,
}

impl AcquisConfig {
    pub fn new(docs: Vec<AcquisDoc>) -> Self {
        Self { docs }
    }

    /// Splits on `---` separators and parses each segment on its own.
    /// Unparseable or non-mapping segments are dropped and logged;
    /// empty input yields an empty manifest.
    pub fn parse(text: &str) -> Self {
        let mut docs = Vec::new();
        for segment in split_documents(text) {
            match serde_yaml::from_str::<serde_yaml::Value>(&segment) {
                Ok(value) if value.is_mapping() => {
                    if let Some(doc) = AcquisDoc::classify(value) {
                        docs.push(doc);
                    }
                }
                Ok(serde_yaml::Value::Null) => {}
                Ok(_) => {
                    tracing::warn!("dropping acquisition segment that is not a mapping");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "dropping unparseable acquisition segment");
                }
            }
        }
        Self { docs }
    }

    pub fn docs(&self) -> &[AcquisDoc] {
        &self.docs
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn has_traefik_source(&self) -> bool {
        self.docs
            .iter()
            .any(|d| matches!(d, AcquisDoc::File(f) if f.is_traefik()))
    }

    /// Prepends the Traefik tail document when missing. Idempotent.
    pub fn ensure_traefik_source(&mut self) -> bool {
        if self.has_traefik_source() {
            return false;
        }
        self.docs.insert(0, AcquisDoc::File(FileSource::traefik()));
        true
    }

    pub fn appsec_sources(&self) -> impl Iterator<Item = &AppsecSource> {
        self.docs.iter().filter_map(|d| match d {
            AcquisDoc::Appsec(doc) => Some(doc),
            _ => None,
        })
    }

    /// Replaces the application's AppSec document in place, or appends
    /// one. Matching is by application UUID only, so repeated upserts
    /// converge on a single document carrying the latest values.
    pub fn upsert_appsec(&mut self, source: AppsecSource) {
        let uuid = source.application_uuid().map(str::to_owned);
        let existing = self.docs.iter_mut().find(|d| {
            matches!(d, AcquisDoc::Appsec(a) if a.application_uuid().map(str::to_owned) == uuid)
        });
        match existing {
            Some(slot) => *slot = AcquisDoc::Appsec(source),
            None => self.docs.push(AcquisDoc::Appsec(source)),
        }
    }

    /// Drops AppSec documents for applications no longer in `keep`.
    /// Returns how many were removed. The caller decides the keep set;
    /// this component never infers liveness on its own.
    pub fn prune_appsec(&mut self, keep: &[Uuid]) -> usize {
        let keep: Vec<String> = keep.iter().map(Uuid::to_string).collect();
        let before = self.docs.len();
        self.docs.retain(|d| match d {
            AcquisDoc::Appsec(a) => a
                .application_uuid()
                .is_some_and(|uuid| keep.iter().any(|k| k == uuid)),
            _ => true,
        });
        before - self.docs.len()
    }

    /// Emits `---` before every document, each serialized on its own so
    /// nothing leaks across document boundaries.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for doc in &self.docs {
            match doc.to_yaml() {
                Ok(yaml) => {
                    out.push_str("---\n");
                    out.push_str(&yaml);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unserializable acquisition document");
                }
            }
        }
        out
    }
}

fn split_documents(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.trim_end() == "---" {
            if !current.trim().is_empty() {
                segments.push(std::mem::take(&mut current));
            }
            current.clear();
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    if !current.trim().is_empty() {
        segments.push(current);
    }
    segments
}
