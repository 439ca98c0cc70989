//! Configuration, fleet inventory and state persistence for Warden.
//!
//! The TOML config declares what the operator controls: managed hosts,
//! the applications behind their proxies, and stack tunables. The JSON
//! state file carries what the installers produce at runtime: component
//! flags, rewritten label blocks, synced alerts. Bouncer and sidecar
//! keys appear in neither file in the clear — they pass through a
//! [`SecretStore`], with the OS-keyring implementation living here.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use warden_core::store::SecretStore;
use warden_core::{
    Application, ComponentError, FirewallAlert, FleetStore, Server, StackSettings,
};
use warden_remote::{HostSpec, SshOptions};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("state file is not valid JSON: {0}")]
    State(#[from] serde_json::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    /// SSH transport tuning shared by every host.
    #[serde(default)]
    pub ssh: SshDefaults,

    /// Stack tunables; anything omitted falls back to
    /// [`StackSettings::default`].
    #[serde(default)]
    pub stack: StackSettings,

    /// Managed hosts.
    #[serde(default)]
    pub servers: Vec<HostSpec>,

    /// Applications behind the proxies, keyed to a server by name.
    /// Firewall configs (rules included) can be declared here too.
    #[serde(default)]
    pub applications: Vec<Application>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Secret backend for minted keys: `keyring` keeps them in the OS
    /// keyring, `plain` leaves them readable in the state file.
    #[serde(default = "default_secrets")]
    pub secrets: String,

    /// Where runtime state lands; `None` means the platform data dir.
    #[serde(default)]
    pub state_path: Option<PathBuf>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            secrets: default_secrets(),
            state_path: None,
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_secrets() -> String {
    "keyring".into()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SshDefaults {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Off by default: fleet hosts are provisioned faster than
    /// known-hosts files are curated.
    #[serde(default)]
    pub strict_host_keys: bool,
}

impl Default for SshDefaults {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
            strict_host_keys: false,
        }
    }
}

fn default_connect_timeout() -> u64 {
    10
}
fn default_command_timeout() -> u64 {
    300
}

impl SshDefaults {
    pub fn options(&self) -> SshOptions {
        SshOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            strict_host_keys: self.strict_host_keys,
        }
    }
}

impl Config {
    /// Cross-checks the inventory: unique server names, unique
    /// application UUIDs, applications pointing at declared servers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = BTreeSet::new();
        for host in &self.servers {
            if !names.insert(host.name.as_str()) {
                return Err(ConfigError::Validation {
                    field: "servers".into(),
                    reason: format!("duplicate server name `{}`", host.name),
                });
            }
        }
        let mut uuids = BTreeSet::new();
        for app in &self.applications {
            if !uuids.insert(app.uuid) {
                return Err(ConfigError::Validation {
                    field: "applications".into(),
                    reason: format!("duplicate application uuid `{}`", app.uuid),
                });
            }
            if !names.contains(app.server.as_str()) {
                return Err(ConfigError::Validation {
                    field: "applications".into(),
                    reason: format!(
                        "application `{}` references unknown server `{}`",
                        app.name, app.server
                    ),
                });
            }
        }
        Ok(())
    }

    pub fn state_path(&self) -> PathBuf {
        self.defaults
            .state_path
            .clone()
            .unwrap_or_else(default_state_path)
    }
}

// ── Paths ───────────────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "warden", "warden").map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default location of the runtime state file.
pub fn default_state_path() -> PathBuf {
    ProjectDirs::from("com", "warden", "warden").map_or_else(
        || dirs_fallback().join("state.json"),
        |dirs| dirs.data_local_dir().join("state.json"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("warden");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full config from one TOML file plus `WARDEN_`-prefixed
/// environment overrides (`__` separates nesting levels, so field
/// names keep their underscores: `WARDEN_STACK__CONTAINER_NAME`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("WARDEN_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load from the canonical config path.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(&path, toml_str)?;
    Ok(())
}

// ── Runtime state ───────────────────────────────────────────────────

/// Everything the installers produce that has to survive between
/// invocations. Keys are stored sealed; see [`SecretStore`].
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PersistedState {
    #[serde(default)]
    pub servers: Vec<Server>,

    #[serde(default)]
    pub applications: Vec<Application>,

    #[serde(default)]
    pub alerts: Vec<FirewallAlert>,

    /// Sealed bouncer keys by server name.
    #[serde(default)]
    pub bouncer_keys: BTreeMap<String, String>,

    /// Sealed sidecar API keys by server name.
    #[serde(default)]
    pub logger_keys: BTreeMap<String, String>,
}

/// Load persisted state; a missing file is an empty fleet, any other
/// failure is real.
pub fn load_state(path: &Path) -> Result<PersistedState, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(serde_json::from_str(&raw)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(PersistedState::default()),
        Err(err) => Err(err.into()),
    }
}

pub fn save_state(path: &Path, state: &PersistedState) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(state)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Build the in-memory store from declared inventory plus persisted
/// runtime state. Config wins for connection coordinates; state wins
/// for security flags and anything the installers rewrote (labels,
/// firewall configs). Servers present only in state are dropped — the
/// config is the source of truth for what is managed.
pub fn hydrate_store(
    config: &Config,
    state: &PersistedState,
    secrets: &dyn SecretStore,
) -> Result<FleetStore, ComponentError> {
    let store = FleetStore::new();

    for host in &config.servers {
        let mut server = Server::new(host.name.clone(), host.clone());
        if let Some(saved) = state.servers.iter().find(|s| s.name == host.name) {
            server.security = saved.security.clone();
        }
        if let Some(sealed) = state.bouncer_keys.get(&host.name) {
            server.security.bouncer_key = Some(SecretString::from(secrets.open(sealed)?));
        }
        if let Some(sealed) = state.logger_keys.get(&host.name) {
            server.security.traffic_logger_api_key =
                Some(SecretString::from(secrets.open(sealed)?));
        }
        store.upsert_server(server);
    }

    for app in &config.applications {
        let saved = state.applications.iter().find(|a| a.uuid == app.uuid);
        store.upsert_application(saved.map_or_else(|| app.clone(), |a| a.clone()));
    }

    for alert in &state.alerts {
        store.record_alert(alert.clone());
    }

    Ok(store)
}

/// Capture the store back into a serializable blob. `previous` lets
/// unchanged keys keep their sealed form instead of being resealed on
/// every save; replaced seals are discarded through the store.
pub fn snapshot_state(
    store: &FleetStore,
    secrets: &dyn SecretStore,
    previous: &PersistedState,
) -> Result<PersistedState, ComponentError> {
    let mut state = PersistedState::default();

    for server in store.servers().iter() {
        if let Some(key) = &server.security.bouncer_key {
            let sealed = reseal(
                secrets,
                previous.bouncer_keys.get(&server.name),
                key.expose_secret(),
            )?;
            state.bouncer_keys.insert(server.name.clone(), sealed);
        }
        if let Some(key) = &server.security.traffic_logger_api_key {
            let sealed = reseal(
                secrets,
                previous.logger_keys.get(&server.name),
                key.expose_secret(),
            )?;
            state.logger_keys.insert(server.name.clone(), sealed);
        }
        state.servers.push((**server).clone());
    }

    for app in store.applications().iter() {
        state.applications.push((**app).clone());
    }
    for alert in store.alerts().iter() {
        state.alerts.push((**alert).clone());
    }

    Ok(state)
}

fn reseal(
    secrets: &dyn SecretStore,
    previous: Option<&String>,
    plain: &str,
) -> Result<String, ComponentError> {
    if let Some(sealed) = previous {
        if secrets.open(sealed).is_ok_and(|opened| opened == plain) {
            return Ok(sealed.clone());
        }
        secrets.discard(sealed)?;
    }
    secrets.seal(plain)
}

// ── Keyring-backed secret store ─────────────────────────────────────

const KEYRING_SERVICE: &str = "warden";
const KEYRING_PREFIX: &str = "keyring:";

/// Seals secrets into the OS keyring; the state file only ever sees an
/// opaque handle.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyringSecrets;

impl KeyringSecrets {
    fn entry(handle: &str) -> Result<keyring::Entry, ComponentError> {
        keyring::Entry::new(KEYRING_SERVICE, handle).map_err(keyring_error)
    }
}

fn keyring_error(err: keyring::Error) -> ComponentError {
    ComponentError::precondition("secret-store", format!("OS keyring unavailable: {err}"))
}

impl SecretStore for KeyringSecrets {
    fn seal(&self, plain: &str) -> Result<String, ComponentError> {
        let handle = format!("secret-{}", Uuid::new_v4());
        Self::entry(&handle)?
            .set_password(plain)
            .map_err(keyring_error)?;
        Ok(format!("{KEYRING_PREFIX}{handle}"))
    }

    fn open(&self, sealed: &str) -> Result<String, ComponentError> {
        let Some(handle) = sealed.strip_prefix(KEYRING_PREFIX) else {
            return Err(ComponentError::parse(
                "sealed secret",
                "missing keyring handle prefix",
            ));
        };
        Self::entry(handle)?.get_password().map_err(keyring_error)
    }

    fn discard(&self, sealed: &str) -> Result<(), ComponentError> {
        let Some(handle) = sealed.strip_prefix(KEYRING_PREFIX) else {
            return Ok(());
        };
        match Self::entry(handle)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(keyring_error(err)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use warden_core::model::SecurityUpdate;
    use warden_core::store::PlainSecrets;

    fn inventory() -> Config {
        Config {
            servers: vec![HostSpec::new("web-1", "203.0.113.7")],
            applications: vec![Application::new(Uuid::new_v4(), "shop", "web-1")],
            ..Config::default()
        }
    }

    #[test]
    fn missing_files_yield_defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = load_config_from(Path::new("warden.toml")).unwrap();
            assert!(config.servers.is_empty());
            assert_eq!(config.defaults.output, "table");
            assert_eq!(config.stack.container_name, "crowdsec");

            let state = load_state(Path::new("state.json")).unwrap();
            assert!(state.servers.is_empty());
            Ok(())
        });
    }

    #[test]
    fn toml_inventory_and_env_overrides_merge() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "warden.toml",
                r#"
                    [stack]
                    container_name = "cs-main"

                    [[servers]]
                    name = "web-1"
                    address = "203.0.113.7"

                    [[servers]]
                    name = "web-2"
                    address = "203.0.113.8"
                    port = 2222
                    user = "deploy"
                "#,
            )?;
            jail.set_env("WARDEN_STACK__LAPI_PORT", "9090");
            jail.set_env("WARDEN_DEFAULTS__OUTPUT", "json");

            let config = load_config_from(Path::new("warden.toml")).unwrap();
            assert_eq!(config.stack.container_name, "cs-main");
            assert_eq!(config.stack.lapi_port, 9090);
            assert_eq!(config.defaults.output, "json");
            assert_eq!(config.servers.len(), 2);
            assert_eq!(config.servers[0].port, 22);
            assert_eq!(config.servers[1].user, "deploy");
            Ok(())
        });
    }

    #[test]
    fn config_rejects_unknown_server_reference() {
        let mut config = inventory();
        config.applications[0].server = "web-9".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("web-9"));
    }

    #[test]
    fn state_round_trip_preserves_flags_and_keys() {
        let config = inventory();
        let store = hydrate_store(&config, &PersistedState::default(), &PlainSecrets).unwrap();
        store
            .update_security(
                "web-1",
                SecurityUpdate::default()
                    .crowdsec_installed(true)
                    .crowdsec_available(true)
                    .bouncer_key(Some(SecretString::from("k".repeat(32)))),
            )
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let state = snapshot_state(&store, &PlainSecrets, &PersistedState::default()).unwrap();
        save_state(&path, &state).unwrap();

        let reloaded = load_state(&path).unwrap();
        let store = hydrate_store(&config, &reloaded, &PlainSecrets).unwrap();
        let server = store.server("web-1").unwrap();
        assert!(server.security.crowdsec_installed);
        assert!(server.security.crowdsec_available);
        assert_eq!(
            server.security.bouncer_key.as_ref().unwrap().expose_secret(),
            "k".repeat(32)
        );
    }

    #[test]
    fn servers_absent_from_config_are_dropped_on_hydrate() {
        let mut state = PersistedState::default();
        state
            .servers
            .push(Server::new("gone-1", HostSpec::new("gone-1", "198.51.100.1")));

        let store = hydrate_store(&inventory(), &state, &PlainSecrets).unwrap();
        assert!(store.server("gone-1").is_none());
        assert!(store.server("web-1").is_some());
    }

    struct CountingSecrets {
        seals: AtomicUsize,
    }

    impl SecretStore for CountingSecrets {
        fn seal(&self, plain: &str) -> Result<String, ComponentError> {
            self.seals.fetch_add(1, Ordering::SeqCst);
            Ok(format!("sealed:{plain}"))
        }

        fn open(&self, sealed: &str) -> Result<String, ComponentError> {
            Ok(sealed.trim_start_matches("sealed:").to_owned())
        }
    }

    #[test]
    fn unchanged_keys_are_not_resealed() {
        let config = inventory();
        let secrets = CountingSecrets {
            seals: AtomicUsize::new(0),
        };
        let store = hydrate_store(&config, &PersistedState::default(), &secrets).unwrap();
        store
            .update_security(
                "web-1",
                SecurityUpdate::default().bouncer_key(Some(SecretString::from("stable-key"))),
            )
            .unwrap();

        let first = snapshot_state(&store, &secrets, &PersistedState::default()).unwrap();
        let second = snapshot_state(&store, &secrets, &first).unwrap();

        assert_eq!(secrets.seals.load(Ordering::SeqCst), 1);
        assert_eq!(first.bouncer_keys, second.bouncer_keys);
    }
}
