//! Stack-wide tunables with workable defaults for a Coolify-style
//! host: Traefik proxy under `/data/coolify/proxy`, containers on the
//! `coolify` network.

use serde::{Deserialize, Serialize};

/// Namespace prefix stamped on every generated CrowdSec artifact
/// (parsers, scenarios, AppSec configs) so ours can be listed, replaced
/// and pruned without touching hub-installed files.
pub const ARTIFACT_NAMESPACE: &str = "warden";

/// Access-log path as seen from inside the proxy and agent containers.
pub const ACCESS_LOG_CONTAINER_PATH: &str = "/traefik/access.log";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StackSettings {
    // ── CrowdSec agent ──
    pub crowdsec_image: String,
    pub container_name: String,
    /// Host directory holding the agent's compose file plus its
    /// `config/` and `data/` bind mounts.
    pub base_path: String,
    pub docker_network: String,
    /// Published on loopback only; the host port for the local API.
    pub lapi_port: u16,
    pub appsec_port: u16,
    pub collections: Vec<String>,
    pub timezone: String,

    // ── Reverse proxy ──
    pub proxy_container: String,
    pub proxy_path: String,

    // ── Traffic-logger sidecar ──
    pub logger_image: String,
    pub logger_container: String,
    /// Host loopback port the sidecar's health/forward-auth API is
    /// published on.
    pub logger_port: u16,
    pub logger_dir: String,
    /// Externally reachable URL of this control plane, injected into
    /// the sidecar for metric callbacks. Loopback values are swapped
    /// for the server's own address at install time.
    pub control_plane_url: String,

    // ── Timing ──
    pub startup_wait_secs: u64,
    pub reload_wait_secs: u64,
    pub job_timeout_secs: u64,
    pub health_cache_ttl_secs: u64,
    pub max_install_attempts: u32,
}

impl Default for StackSettings {
    fn default() -> Self {
        Self {
            crowdsec_image: "crowdsecurity/crowdsec:latest".into(),
            container_name: "crowdsec".into(),
            base_path: "/var/lib/warden/crowdsec".into(),
            docker_network: "coolify".into(),
            lapi_port: 8080,
            appsec_port: 7422,
            collections: vec![
                "crowdsecurity/nginx".into(),
                "crowdsecurity/traefik".into(),
                "crowdsecurity/http-cve".into(),
            ],
            timezone: "UTC".into(),
            proxy_container: "coolify-proxy".into(),
            proxy_path: "/data/coolify/proxy".into(),
            logger_image: "python:3.11-slim".into(),
            logger_container: "traffic-logger".into(),
            logger_port: 3001,
            logger_dir: "/opt/traffic-logger".into(),
            control_plane_url: "http://localhost:8000".into(),
            startup_wait_secs: 15,
            reload_wait_secs: 2,
            job_timeout_secs: 600,
            health_cache_ttl_secs: 120,
            max_install_attempts: 3,
        }
    }
}

impl StackSettings {
    // ── Remote paths ──

    pub fn config_path(&self) -> String {
        format!("{}/config", self.base_path)
    }

    pub fn data_path(&self) -> String {
        format!("{}/data", self.base_path)
    }

    pub fn compose_path(&self) -> String {
        format!("{}/docker-compose.yml", self.base_path)
    }

    pub fn acquis_path(&self) -> String {
        format!("{}/acquis.yaml", self.config_path())
    }

    pub fn scenarios_dir(&self) -> String {
        format!("{}/scenarios", self.config_path())
    }

    pub fn appsec_configs_dir(&self) -> String {
        format!("{}/appsec-configs/{ARTIFACT_NAMESPACE}", self.config_path())
    }

    pub fn appsec_rules_dir(&self) -> String {
        format!("{}/appsec-rules/{ARTIFACT_NAMESPACE}", self.config_path())
    }

    pub fn parsers_raw_dir(&self) -> String {
        format!("{}/parsers/s00-raw", self.config_path())
    }

    pub fn parsers_enrich_dir(&self) -> String {
        format!("{}/parsers/s02-enrich", self.config_path())
    }

    /// Host path of the proxy access log, backing
    /// [`ACCESS_LOG_CONTAINER_PATH`] inside containers.
    pub fn access_log_host_path(&self) -> String {
        format!("{}/access.log", self.proxy_path)
    }

    pub fn proxy_static_config_path(&self) -> String {
        format!("{}/docker-compose.yml", self.proxy_path)
    }

    pub fn proxy_dynamic_dir(&self) -> String {
        format!("{}/dynamic", self.proxy_path)
    }

    // ── In-network endpoints ──

    /// LAPI endpoint as seen by containers on the shared network.
    pub fn lapi_host(&self) -> String {
        format!("{}:8080", self.container_name)
    }

    /// AppSec endpoint as seen by containers on the shared network.
    pub fn appsec_host(&self) -> String {
        format!("{}:{}", self.container_name, self.appsec_port)
    }

    /// LAPI URL recorded on the server once installed. Only reachable
    /// where the caller shares a host (or a tunnel) with the agent,
    /// since the port is published on loopback.
    pub fn lapi_url_for(&self, address: &str) -> String {
        format!("http://{address}:{}", self.lapi_port)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn derived_paths_follow_base() {
        let settings = StackSettings {
            base_path: "/srv/crowdsec".into(),
            ..StackSettings::default()
        };
        assert_eq!(settings.acquis_path(), "/srv/crowdsec/config/acquis.yaml");
        assert_eq!(
            settings.appsec_rules_dir(),
            "/srv/crowdsec/config/appsec-rules/warden"
        );
        assert_eq!(settings.compose_path(), "/srv/crowdsec/docker-compose.yml");
    }

    #[test]
    fn network_endpoints_use_container_name() {
        let settings = StackSettings::default();
        assert_eq!(settings.lapi_host(), "crowdsec:8080");
        assert_eq!(settings.appsec_host(), "crowdsec:7422");
        assert_eq!(settings.lapi_url_for("10.0.0.5"), "http://10.0.0.5:8080");
    }
}
