//! Read-modify-write for the container label blob.
//!
//! Application labels are stored as newline-delimited `KEY=VALUE` text
//! that earlier writers sometimes base64-encoded twice. Every mutation
//! goes through [`rewrite`]: peel up to two encoding layers, parse,
//! mutate, then re-encode exactly once. Malformed lines are dropped
//! with a log, never fatal.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use uuid::Uuid;

use crate::error::ConflictError;

/// Label namespace owned by the deployment engine. Lines under it are
/// managed elsewhere and stripped during normalization so we never
/// write them back stale.
pub const RESERVED_LABEL_PREFIX: &str = "coolify.";

/// Keys longer than this that read as bare base64 are treated as
/// corruption artifacts from earlier double-encoded writes.
const NOISE_KEY_LEN: usize = 100;

// ━━━━━━━━━━━━━━━━━━━ Encoding ━━━━━━━━━━━━━━━━━━━

/// Plain label text plus how many base64 layers were peeled to get it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLabels {
    pub text: String,
    pub levels: u8,
}

/// Strips up to two layers of base64 from `raw`.
///
/// A layer only counts when the text strictly decodes, re-encoding the
/// result reproduces the input byte for byte, and the payload is UTF-8.
/// Anything still encoded after two layers is corrupt and refused
/// rather than guessed at.
pub fn decode_labels(raw: &str) -> Result<DecodedLabels, ConflictError> {
    let mut text = raw.trim().to_owned();
    let mut levels = 0u8;
    while levels < 2 {
        match peel_base64(&text) {
            Some(inner) => {
                text = inner;
                levels += 1;
            }
            None => break,
        }
    }
    if levels == 2 && peel_base64(&text).is_some() {
        return Err(ConflictError::DoubleEncoding);
    }
    Ok(DecodedLabels { text, levels })
}

/// Single base64 pass. [`rewrite`] is the only production caller, which
/// is what keeps persisted blobs at exactly one layer.
pub fn encode_labels(plain: &str) -> String {
    BASE64.encode(plain)
}

fn peel_base64(text: &str) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    let bytes = BASE64.decode(text).ok()?;
    if BASE64.encode(&bytes) != text {
        return None;
    }
    String::from_utf8(bytes).ok()
}

// ━━━━━━━━━━━━━━━━━━━ Document ━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Blank,
    Comment(String),
    Pair { key: String, value: String },
}

/// An ordered `key=value` line sequence with comments and blanks kept
/// in place.
#[derive(Debug, Clone, Default)]
pub struct LabelDocument {
    lines: Vec<Line>,
}

impl LabelDocument {
    /// Parses normalized label text. Reserved-prefix lines, non-KV
    /// lines and base64 noise keys are dropped here; an empty input is
    /// an empty document.
    pub fn parse(plain: &str) -> Self {
        let mut lines = Vec::new();
        for raw in plain.lines() {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                lines.push(Line::Blank);
                continue;
            }
            if trimmed.starts_with('#') {
                lines.push(Line::Comment(raw.to_owned()));
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                tracing::debug!(line = %trimmed, "dropping label line without key=value shape");
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                tracing::debug!(line = %trimmed, "dropping label line with empty key");
                continue;
            }
            if key.starts_with(RESERVED_LABEL_PREFIX) {
                tracing::debug!(key, "dropping reserved-prefix label");
                continue;
            }
            if is_noise_key(key) {
                tracing::debug!(len = key.len(), "dropping base64 noise key");
                continue;
            }
            lines.push(Line::Pair {
                key: key.to_owned(),
                value: value.trim().to_owned(),
            });
        }
        Self { lines }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lines
            .iter()
            .any(|l| matches!(l, Line::Pair { key: k, .. } if k == key))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|l| match l {
            Line::Pair { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Adds `key=value` if the key is absent; existing lines are left
    /// untouched. Router `middlewares` lines are the one exception:
    /// their value is a comma-separated set and the new entry is merged
    /// into it in place. Returns whether the document changed.
    pub fn upsert(&mut self, key: &str, value: &str) -> bool {
        if is_router_middlewares_key(key) {
            return self.merge_into_set(key, value, true);
        }
        if self.contains_key(key) {
            return false;
        }
        self.lines.push(Line::Pair {
            key: key.to_owned(),
            value: value.to_owned(),
        });
        true
    }

    /// Merges `middleware` into the named router's `middlewares=` line.
    /// Returns `None` when the router line does not exist: attachment
    /// requires the deploy engine to have written the router labels
    /// first, so the caller warns instead of inventing one.
    pub fn attach_router_middleware(&mut self, router: &str, middleware: &str) -> Option<bool> {
        let key = router_middlewares_key(router);
        if !self.contains_key(&key) {
            return None;
        }
        Some(self.merge_into_set(&key, middleware, false))
    }

    fn merge_into_set(&mut self, key: &str, entry: &str, append_missing: bool) -> bool {
        for line in &mut self.lines {
            let Line::Pair { key: k, value } = line else {
                continue;
            };
            if k.as_str() != key {
                continue;
            }
            let mut set: Vec<&str> = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect();
            if set.contains(&entry) {
                return false;
            }
            set.push(entry);
            *value = set.join(",");
            return true;
        }
        if append_missing {
            self.lines.push(Line::Pair {
                key: key.to_owned(),
                value: entry.to_owned(),
            });
            return true;
        }
        false
    }

    pub fn render(&self) -> String {
        let rendered: Vec<String> = self
            .lines
            .iter()
            .map(|l| match l {
                Line::Blank => String::new(),
                Line::Comment(text) => text.clone(),
                Line::Pair { key, value } => format!("{key}={value}"),
            })
            .collect();
        rendered.join("\n")
    }
}

/// Decode, mutate, re-encode — the single entry point for label edits.
/// The closure's return value is handed back alongside the encoded
/// blob so callers can report what changed.
pub fn rewrite<T>(
    raw: &str,
    mutate: impl FnOnce(&mut LabelDocument) -> T,
) -> Result<(String, T), ConflictError> {
    let decoded = decode_labels(raw)?;
    let mut doc = LabelDocument::parse(&decoded.text);
    let outcome = mutate(&mut doc);
    Ok((encode_labels(&doc.render()), outcome))
}

fn is_noise_key(key: &str) -> bool {
    key.len() > NOISE_KEY_LEN
        && key
            .chars()
            .filter(|c| !matches!(c, '+' | '/' | '='))
            .all(|c| c.is_ascii_alphanumeric())
}

fn is_router_middlewares_key(key: &str) -> bool {
    key.starts_with("traefik.http.routers.") && key.ends_with(".middlewares")
}

pub fn router_middlewares_key(router: &str) -> String {
    format!("traefik.http.routers.{router}.middlewares")
}

// ━━━━━━━━━━━━━━━━━━━ Bouncer wiring ━━━━━━━━━━━━━━━━━━━

pub fn bouncer_middleware_name(application: &Uuid) -> String {
    format!("crowdsec-{application}")
}

pub fn appsec_middleware_name(application: &Uuid) -> String {
    format!("appsec-{application}")
}

/// The middleware definition labels wiring one application to the
/// bouncer plugin: a decision-checking middleware plus an AppSec one,
/// both scoped by application UUID.
pub fn bouncer_middleware_labels(
    application: &Uuid,
    lapi_host: &str,
    appsec_host: &str,
    lapi_key: &str,
) -> Vec<(String, String)> {
    let bouncer = bouncer_middleware_name(application);
    let appsec = appsec_middleware_name(application);
    let prefix = |name: &str| format!("traefik.http.middlewares.{name}.plugin.bouncer");
    let b = prefix(&bouncer);
    let a = prefix(&appsec);
    vec![
        (format!("{b}.enabled"), "true".into()),
        (format!("{b}.CrowdsecLapiHost"), lapi_host.into()),
        (format!("{b}.CrowdsecLapiKey"), lapi_key.into()),
        (format!("{b}.CrowdsecLapiScheme"), "http".into()),
        (format!("{b}.CrowdsecMode"), "live".into()),
        (format!("{a}.enabled"), "true".into()),
        (format!("{a}.CrowdsecLapiHost"), lapi_host.into()),
        (format!("{a}.CrowdsecLapiKey"), lapi_key.into()),
        (format!("{a}.CrowdsecAppsecEnabled"), "true".into()),
        (format!("{a}.CrowdsecAppsecHost"), appsec_host.into()),
    ]
}

/// Rejects LAPI keys the Traefik bouncer plugin cannot load. Writing
/// one into the label blob would take the proxy config down with it.
pub fn validate_plugin_key(key: &str) -> Result<(), ConflictError> {
    let accepted = key.chars().all(|c| {
        c.is_ascii_alphanumeric()
            || matches!(
                c,
                ' ' | '!'
                    | '#'
                    | '$'
                    | '%'
                    | '&'
                    | '\''
                    | '*'
                    | '+'
                    | '-'
                    | '.'
                    | '^'
                    | '_'
                    | '`'
                    | '|'
                    | '~'
                    | '='
                    | '/'
            )
    });
    if accepted {
        Ok(())
    } else {
        Err(ConflictError::KeyCharset)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn encode_n(text: &str, layers: u32) -> String {
        let mut out = text.to_owned();
        for _ in 0..layers {
            out = BASE64.encode(&out);
        }
        out
    }

    #[test]
    fn decode_peels_zero_one_and_two_layers() {
        for layers in 0..=2 {
            let raw = encode_n("a=b\nc=d", layers);
            let decoded = decode_labels(&raw).unwrap();
            assert_eq!(decoded.text, "a=b\nc=d");
            assert_eq!(u32::from(decoded.levels), layers);
        }
    }

    #[test]
    fn decode_refuses_three_layers() {
        let raw = encode_n("a=b\nc=d", 3);
        assert!(matches!(
            decode_labels(&raw),
            Err(ConflictError::DoubleEncoding)
        ));
    }

    #[test]
    fn rewrite_always_lands_on_one_layer() {
        for layers in 0..=2 {
            let raw = encode_n("a=b", layers);
            let (out, _) = rewrite(&raw, |_| ()).unwrap();
            assert_eq!(out, encode_n("a=b", 1));
        }
    }

    #[test]
    fn empty_input_is_an_empty_document() {
        let decoded = decode_labels("").unwrap();
        assert_eq!(decoded.levels, 0);
        let doc = LabelDocument::parse(&decoded.text);
        assert_eq!(doc.render(), "");
    }

    #[test]
    fn normalization_drops_reserved_noise_and_non_kv_lines() {
        let noise_key: String = "Z".repeat(120);
        let input = format!("a=b\ncoolify.x=1\n{noise_key}==base64noise=payload\nbadline");
        let doc = LabelDocument::parse(&input);
        assert_eq!(doc.render(), "a=b");
    }

    #[test]
    fn comments_and_blanks_are_preserved_in_place() {
        let input = "# managed block\n\na=b";
        let doc = LabelDocument::parse(input);
        assert_eq!(doc.render(), input);
    }

    #[test]
    fn upsert_skips_existing_keys() {
        let mut doc = LabelDocument::parse("a=b");
        assert!(!doc.upsert("a", "other"));
        assert_eq!(doc.get("a"), Some("b"));
        assert!(doc.upsert("c", "d"));
        assert_eq!(doc.render(), "a=b\nc=d");
    }

    #[test]
    fn upsert_is_idempotent() {
        let mut once = LabelDocument::parse("a=b");
        once.upsert("x", "y");
        let mut twice = LabelDocument::parse("a=b");
        twice.upsert("x", "y");
        twice.upsert("x", "y");
        assert_eq!(once.render(), twice.render());
    }

    #[test]
    fn middlewares_key_merges_as_comma_set() {
        let key = router_middlewares_key("http-0-abc");
        let mut doc = LabelDocument::parse(&format!("{key}=gzip"));
        assert!(doc.upsert(&key, "crowdsec-abc"));
        assert!(!doc.upsert(&key, "crowdsec-abc"));
        assert_eq!(doc.get(&key), Some("gzip,crowdsec-abc"));
    }

    #[test]
    fn attach_router_middleware_requires_router_line() {
        let mut doc = LabelDocument::parse("a=b");
        assert_eq!(doc.attach_router_middleware("http-0-abc", "crowdsec-abc"), None);

        let key = router_middlewares_key("http-0-abc");
        let mut doc = LabelDocument::parse(&format!("{key}=gzip"));
        assert_eq!(
            doc.attach_router_middleware("http-0-abc", "crowdsec-abc"),
            Some(true)
        );
        assert_eq!(
            doc.attach_router_middleware("http-0-abc", "crowdsec-abc"),
            Some(false)
        );
    }

    #[test]
    fn rewrite_applies_mutation_and_is_idempotent() {
        let raw = encode_n("a=b", 2);
        let (first, changed) = rewrite(&raw, |doc| doc.upsert("x", "y")).unwrap();
        assert!(changed);
        let (second, changed) = rewrite(&first, |doc| doc.upsert("x", "y")).unwrap();
        assert!(!changed);
        assert_eq!(first, second);
        assert_eq!(decode_labels(&second).unwrap().text, "a=b\nx=y");
    }

    #[test]
    fn bouncer_labels_cover_both_middlewares() {
        let uuid = Uuid::new_v4();
        let labels = bouncer_middleware_labels(&uuid, "crowdsec:8080", "crowdsec:7422", "k3y");
        assert_eq!(labels.len(), 10);
        assert!(labels.iter().any(|(k, v)| {
            k == &format!("traefik.http.middlewares.crowdsec-{uuid}.plugin.bouncer.CrowdsecLapiKey")
                && v == "k3y"
        }));
        assert!(labels.iter().any(|(k, v)| {
            k == &format!(
                "traefik.http.middlewares.appsec-{uuid}.plugin.bouncer.CrowdsecAppsecHost"
            ) && v == "crowdsec:7422"
        }));
    }

    #[test]
    fn plugin_key_charset() {
        validate_plugin_key("abcDEF123+/=.^_`|~").unwrap();
        assert!(matches!(
            validate_plugin_key("has\"quote"),
            Err(ConflictError::KeyCharset)
        ));
        assert!(matches!(
            validate_plugin_key("hat{brace}"),
            Err(ConflictError::KeyCharset)
        ));
    }
}
