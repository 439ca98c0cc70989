//! CrowdSec agent installer.
//!
//! Brings up the agent container with the LAPI published on loopback
//! only, generates the Traefik bouncer key inside the container, and
//! wires the proxy's bouncer plugin through a dynamic-config fragment.
//! Traefik picks the fragment up from its watched directory; the
//! SIGHUP afterwards is a reload nudge, never a restart.

use std::collections::BTreeMap;

use secrecy::SecretString;
use serde::Serialize;
use warden_remote::{HostSpec, Script};

use crate::acquis::AcquisConfig;
use crate::error::ComponentError;
use crate::install::{
    Component, InstallContext, InstallReport, cscli, proxy_reload_cmd, verify_container_up,
};
use crate::labels::validate_plugin_key;
use crate::model::SecurityUpdate;
use crate::settings::StackSettings;

const MIN_BOUNCER_KEY_LEN: usize = 20;

/// Name of the server-wide bouncer registered for the proxy plugin.
pub(crate) fn global_bouncer_name(server: &str) -> String {
    format!("warden-traefik-{server}")
}

#[derive(Debug, Serialize)]
struct ComposeDoc {
    services: BTreeMap<String, ServiceDoc>,
    networks: BTreeMap<&'static str, NetworkDoc>,
}

#[derive(Debug, Serialize)]
struct ServiceDoc {
    image: String,
    container_name: String,
    restart: &'static str,
    environment: BTreeMap<&'static str, String>,
    volumes: Vec<String>,
    ports: Vec<String>,
}

#[derive(Debug, Serialize)]
struct NetworkDoc {
    name: String,
    external: bool,
}

/// Compose file for the agent. `with_proxy_mount` adds the read-only
/// proxy and `/var/log` mounts once log integration runs; its presence
/// doubles as the "already integrated" marker when deciding whether a
/// recreate is needed.
pub(crate) fn render_compose(
    settings: &StackSettings,
    with_proxy_mount: bool,
) -> Result<String, ComponentError> {
    let mut volumes = vec![
        "./config:/etc/crowdsec".to_owned(),
        "./data:/var/lib/crowdsec/data".to_owned(),
    ];
    if with_proxy_mount {
        volumes.push("/var/log:/var/log:ro".to_owned());
        volumes.push(format!("{}:/traefik:ro", settings.proxy_path));
    }

    let doc = ComposeDoc {
        services: BTreeMap::from([(
            settings.container_name.clone(),
            ServiceDoc {
                image: settings.crowdsec_image.clone(),
                container_name: settings.container_name.clone(),
                restart: "unless-stopped",
                environment: BTreeMap::from([
                    ("COLLECTIONS", settings.collections.join(" ")),
                    ("GID", "1000".to_owned()),
                    ("TZ", settings.timezone.clone()),
                ]),
                volumes,
                // Loopback only: the LAPI carries bouncer keys and must
                // never listen on a public interface.
                ports: vec![format!("127.0.0.1:{}:8080", settings.lapi_port)],
            },
        )]),
        networks: BTreeMap::from([(
            "default",
            NetworkDoc {
                name: settings.docker_network.clone(),
                external: true,
            },
        )]),
    };
    serde_yaml::to_string(&doc)
        .map_err(|e| ComponentError::parse("agent compose file", e.to_string()))
}

/// Substring that marks a compose file as log-integrated.
pub(crate) const PROXY_MOUNT_MARKER: &str = ":/traefik:ro";

/// Plugin settings serialized in the camelCase form the Traefik plugin
/// reads from dynamic configuration.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BouncerPluginDoc {
    enabled: bool,
    log_level: &'static str,
    crowdsec_lapi_host: String,
    crowdsec_lapi_scheme: &'static str,
    crowdsec_lapi_key: String,
    crowdsec_appsec_enabled: bool,
    crowdsec_appsec_host: String,
    crowdsec_appsec_failure_block: bool,
    crowdsec_mode: &'static str,
    update_interval_seconds: u32,
    default_decision_seconds: u32,
}

#[derive(Debug, Serialize)]
struct MiddlewareDoc {
    plugin: BTreeMap<&'static str, BouncerPluginDoc>,
}

#[derive(Debug, Serialize)]
struct HttpMiddlewares {
    middlewares: BTreeMap<&'static str, MiddlewareDoc>,
}

#[derive(Debug, Serialize)]
struct DynamicConfigDoc {
    http: HttpMiddlewares,
}

/// Traefik dynamic-config fragment registering the bouncer plugin with
/// the freshly generated key.
pub(crate) fn render_bouncer_fragment(
    settings: &StackSettings,
    key: &str,
) -> Result<String, ComponentError> {
    let plugin = BouncerPluginDoc {
        enabled: true,
        log_level: "INFO",
        crowdsec_lapi_host: settings.lapi_host(),
        crowdsec_lapi_scheme: "http",
        crowdsec_lapi_key: key.to_owned(),
        crowdsec_appsec_enabled: true,
        crowdsec_appsec_host: settings.appsec_host(),
        crowdsec_appsec_failure_block: true,
        crowdsec_mode: "live",
        update_interval_seconds: 10,
        default_decision_seconds: 3600,
    };
    let doc = DynamicConfigDoc {
        http: HttpMiddlewares {
            middlewares: BTreeMap::from([(
                "crowdsec-bouncer",
                MiddlewareDoc {
                    plugin: BTreeMap::from([("crowdsec-bouncer-traefik-plugin", plugin)]),
                },
            )]),
        },
    };
    serde_yaml::to_string(&doc)
        .map_err(|e| ComponentError::parse("bouncer plugin fragment", e.to_string()))
}

/// Host-level requirements, probed tolerantly so a missing prerequisite
/// surfaces as a precondition failure rather than a shell error.
async fn check_requirements(ctx: &InstallContext, host: &HostSpec) -> Result<(), ComponentError> {
    let component = Component::Crowdsec.to_string();
    let settings = &ctx.settings;

    let docker = ctx
        .executor
        .probe(host, "docker-version", "docker --version")
        .await?;
    if !docker.combined().to_lowercase().contains("docker version") {
        return Err(ComponentError::precondition(
            component,
            "docker is not installed on the server",
        ));
    }

    let network = ctx
        .executor
        .probe(
            host,
            "network-exists",
            &format!(
                "docker network ls --format '{{{{.Name}}}}' | grep -w {network} || echo NETWORK_MISSING",
                network = settings.docker_network
            ),
        )
        .await?;
    if network.stdout.contains("NETWORK_MISSING") {
        return Err(ComponentError::precondition(
            component,
            format!("docker network `{}` does not exist", settings.docker_network),
        ));
    }

    let port = ctx
        .executor
        .probe(
            host,
            "port-free",
            &format!(
                "netstat -tuln | grep ':{port} ' || echo PORT_FREE",
                port = settings.lapi_port
            ),
        )
        .await?;
    if !port.stdout.contains("PORT_FREE") {
        return Err(ComponentError::precondition(
            component,
            format!("port {} is already in use", settings.lapi_port),
        ));
    }

    Ok(())
}

/// Last non-empty line of `cscli bouncers add -o raw`, validated for
/// length and for the plugin's accepted charset.
pub(crate) fn extract_bouncer_key(
    component: Component,
    stdout: &str,
) -> Result<String, ComponentError> {
    let key = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .next_back()
        .unwrap_or_default()
        .to_owned();
    if key.len() < MIN_BOUNCER_KEY_LEN {
        return Err(ComponentError::verification(
            component.to_string(),
            "key-generation",
            format!("bouncer key too short ({} chars)", key.len()),
        ));
    }
    validate_plugin_key(&key)?;
    Ok(key)
}

/// Full agent install on one server. Idempotent: re-running rewrites
/// the same artifacts and rotates the bouncer key.
pub async fn install_crowdsec(
    ctx: &InstallContext,
    server_name: &str,
) -> Result<InstallReport, ComponentError> {
    let component = Component::Crowdsec;
    let server = ctx.server(server_name, component)?;
    let host = &server.host;
    let settings = &ctx.settings;
    let mut report = InstallReport::begin(component);

    check_requirements(ctx, host).await?;
    report.step("requirements satisfied");

    let prepare = Script::new()
        .step(
            "create-directories",
            format!(
                "mkdir -p {} {}",
                settings.config_path(),
                settings.data_path()
            ),
        )
        .step(
            "chown-directories",
            format!("chown -R 1000:1000 {}", settings.base_path),
        );
    ctx.executor.run(host, &prepare).await?;
    report.step("directories prepared");

    // Merge rather than overwrite: a reinstall must not drop AppSec
    // documents other applications already registered.
    let current = ctx
        .executor
        .probe(
            host,
            "read-acquis",
            &format!("cat {} 2>/dev/null || true", settings.acquis_path()),
        )
        .await?;
    let mut acquis = AcquisConfig::parse(&current.stdout);
    if acquis.ensure_traefik_source() {
        ctx.executor
            .upload(host, &settings.acquis_path(), &acquis.render())
            .await?;
        report.step("acquisition manifest written");
    }

    ctx.executor
        .upload(
            host,
            &settings.compose_path(),
            &render_compose(settings, false)?,
        )
        .await?;
    report.step("compose file written");

    let start = Script::new().step(
        "compose-up",
        format!("cd {} && docker compose up -d", settings.base_path),
    );
    ctx.executor.run(host, &start).await?;

    report.verifying();
    ctx.settle(settings.startup_wait_secs).await;
    verify_container_up(
        ctx.executor.as_ref(),
        host,
        &settings.container_name,
        component,
        "container-start",
    )
    .await?;
    report.step("agent container running");

    // Rotate the key: drop any previous registration, then mint fresh.
    let bouncer = global_bouncer_name(server_name);
    ctx.executor
        .probe(
            host,
            "bouncer-delete",
            &cscli(
                &settings.container_name,
                &format!("bouncers delete {bouncer}"),
            ),
        )
        .await?;
    let added = ctx
        .executor
        .probe(
            host,
            "bouncer-add",
            &cscli(
                &settings.container_name,
                &format!("bouncers add {bouncer} -o raw"),
            ),
        )
        .await?;
    let key = extract_bouncer_key(component, &added.stdout)?;
    report.step("bouncer key generated");

    ctx.executor
        .upload(
            host,
            &format!("{}/crowdsec.yaml", settings.proxy_dynamic_dir()),
            &render_bouncer_fragment(settings, &key)?,
        )
        .await?;
    ctx.executor
        .probe(
            host,
            "proxy-reload",
            &proxy_reload_cmd(&settings.proxy_container),
        )
        .await?;
    report.step("proxy bouncer fragment wired");

    let appsec = ctx
        .executor
        .probe(
            host,
            "appsec-collections",
            &cscli(
                &settings.container_name,
                "collections install crowdsecurity/appsec-virtual-patching crowdsecurity/appsec-generic-rules -o raw",
            ),
        )
        .await?;
    if appsec.success() {
        ctx.executor
            .probe(
                host,
                "agent-reload",
                &format!("docker exec {} kill -SIGHUP 1", settings.container_name),
            )
            .await?;
    } else {
        report.warn("AppSec hub collections failed to install; custom rules still apply");
    }

    ctx.store.update_security(
        server_name,
        SecurityUpdate::default()
            .crowdsec_installed(true)
            .crowdsec_available(true)
            .crowdsec_lapi_url(Some(settings.lapi_url_for(&host.address)))
            .bouncer_key(Some(SecretString::from(key))),
    )?;
    report.step("server flags recorded");

    Ok(report.installed())
}

/// Tears the agent down and unwires the proxy. Remote steps are
/// best-effort so a half-dead host still gets its flags cleared.
pub async fn remove_crowdsec(
    ctx: &InstallContext,
    server_name: &str,
) -> Result<InstallReport, ComponentError> {
    let component = Component::Crowdsec;
    let server = ctx.server(server_name, component)?;
    let host = &server.host;
    let settings = &ctx.settings;
    let mut report = InstallReport::begin(component);

    ctx.executor
        .probe(
            host,
            "compose-down",
            &format!("cd {} && docker compose down || true", settings.base_path),
        )
        .await?;
    report.step("agent container stopped");

    ctx.executor
        .probe(
            host,
            "remove-fragment",
            &format!("rm -f {}/crowdsec.yaml", settings.proxy_dynamic_dir()),
        )
        .await?;
    ctx.executor
        .probe(
            host,
            "proxy-reload",
            &proxy_reload_cmd(&settings.proxy_container),
        )
        .await?;
    report.step("proxy bouncer fragment removed");

    ctx.store.update_security(
        server_name,
        SecurityUpdate::default()
            .crowdsec_installed(false)
            .crowdsec_available(false)
            .crowdsec_lapi_url(None)
            .bouncer_key(None)
            .installation_validated(false),
    )?;
    report.step("server flags cleared");

    Ok(report.installed())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Server;
    use crate::store::FleetStore;
    use std::sync::Arc;
    use warden_remote::testing::ScriptedExecutor;
    use warden_remote::{RemoteExecutor, StepOutput};

    fn context(executor: ScriptedExecutor) -> InstallContext {
        let store = FleetStore::new();
        store.upsert_server(Server::new("web-1", HostSpec::new("web-1", "203.0.113.7")));
        InstallContext::new(
            Arc::new(executor),
            Arc::new(store),
            Arc::new(StackSettings::default()),
        )
    }

    fn healthy_executor() -> ScriptedExecutor {
        ScriptedExecutor::new()
            .respond("docker --version", StepOutput::ok("Docker version 26.1.0"))
            .respond("docker network ls", StepOutput::ok("coolify"))
            .respond("netstat", StepOutput::ok("PORT_FREE"))
            .respond("docker ps --filter name=crowdsec", StepOutput::ok("Up 4 seconds"))
            .respond(
                "bouncers add",
                StepOutput::ok(
                    "API key for 'warden-traefik-web-1':\n\n   0123456789abcdef0123456789abcdef\n",
                ),
            )
    }

    #[test]
    fn compose_publishes_lapi_on_loopback_only() {
        let compose = render_compose(&StackSettings::default(), false).unwrap();
        assert!(compose.contains("127.0.0.1:8080:8080"));
        assert!(!compose.contains("0.0.0.0"));
        assert!(!compose.contains(PROXY_MOUNT_MARKER));

        let doc: serde_yaml::Value = serde_yaml::from_str(&compose).unwrap();
        assert_eq!(doc["services"]["crowdsec"]["restart"].as_str(), Some("unless-stopped"));
        assert_eq!(doc["networks"]["default"]["external"].as_bool(), Some(true));
    }

    #[test]
    fn compose_proxy_mount_is_opt_in() {
        let compose = render_compose(&StackSettings::default(), true).unwrap();
        assert!(compose.contains("/data/coolify/proxy:/traefik:ro"));
        assert!(compose.contains("/var/log:/var/log:ro"));
    }

    #[test]
    fn bouncer_fragment_targets_agent_endpoints() {
        let fragment = render_bouncer_fragment(&StackSettings::default(), "secret-key").unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&fragment).unwrap();
        let plugin = &doc["http"]["middlewares"]["crowdsec-bouncer"]["plugin"]
            ["crowdsec-bouncer-traefik-plugin"];
        assert_eq!(plugin["crowdsecLapiHost"].as_str(), Some("crowdsec:8080"));
        assert_eq!(plugin["crowdsecAppsecHost"].as_str(), Some("crowdsec:7422"));
        assert_eq!(plugin["crowdsecLapiKey"].as_str(), Some("secret-key"));
        assert_eq!(plugin["crowdsecMode"].as_str(), Some("live"));
    }

    #[test]
    fn key_extraction_takes_last_line_and_validates() {
        let key = extract_bouncer_key(
            Component::Crowdsec,
            "API key for 'x':\n\n   0123456789abcdef0123456789abcdef\n",
        )
        .unwrap();
        assert_eq!(key, "0123456789abcdef0123456789abcdef");

        let err = extract_bouncer_key(Component::Crowdsec, "short\n").unwrap_err();
        assert!(err.to_string().contains("too short"));
    }

    #[tokio::test(start_paused = true)]
    async fn install_runs_to_installed_and_sets_flags() {
        let ctx = context(healthy_executor());
        let report = install_crowdsec(&ctx, "web-1").await.unwrap();
        assert_eq!(report.phase, crate::install::InstallPhase::Installed);

        let server = ctx.store.server("web-1").unwrap();
        assert!(server.security.crowdsec_installed);
        assert!(server.security.crowdsec_available);
        assert_eq!(
            server.security.crowdsec_lapi_url.as_deref(),
            Some("http://203.0.113.7:8080")
        );
        assert!(server.security.bouncer_key.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn install_uploads_compose_and_acquis() {
        let executor = Arc::new(healthy_executor());
        let ctx = InstallContext::new(
            Arc::clone(&executor) as Arc<dyn RemoteExecutor>,
            {
                let store = FleetStore::new();
                store.upsert_server(Server::new("web-1", HostSpec::new("web-1", "203.0.113.7")));
                Arc::new(store)
            },
            Arc::new(StackSettings::default()),
        );

        install_crowdsec(&ctx, "web-1").await.unwrap();

        let compose = executor.upload_content("docker-compose.yml").unwrap();
        assert!(compose.contains("127.0.0.1:8080:8080"));
        let acquis = executor.upload_content("acquis.yaml").unwrap();
        assert!(acquis.contains("type: traefik"));
        let fragment = executor.upload_content("dynamic/crowdsec.yaml").unwrap();
        assert!(fragment.contains("crowdsecLapiKey"));
    }

    #[tokio::test]
    async fn missing_docker_is_a_precondition_failure() {
        let executor = ScriptedExecutor::new().respond(
            "docker --version",
            StepOutput {
                stdout: String::new(),
                stderr: "sh: docker: not found".into(),
                code: Some(127),
            },
        );
        let ctx = context(executor);
        let err = install_crowdsec(&ctx, "web-1").await.unwrap_err();
        assert!(matches!(err, ComponentError::Precondition { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn busy_lapi_port_is_a_precondition_failure() {
        let executor = ScriptedExecutor::new()
            .respond("docker --version", StepOutput::ok("Docker version 26.1.0"))
            .respond("docker network ls", StepOutput::ok("coolify"))
            .respond("netstat", StepOutput::ok("tcp 0.0.0.0:8080 LISTEN"));
        let ctx = context(executor);
        let err = install_crowdsec(&ctx, "web-1").await.unwrap_err();
        assert!(err.to_string().contains("8080"));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_container_is_a_verification_failure() {
        let executor = ScriptedExecutor::new()
            .respond("docker --version", StepOutput::ok("Docker version 26.1.0"))
            .respond("docker network ls", StepOutput::ok("coolify"))
            .respond("netstat", StepOutput::ok("PORT_FREE"))
            .respond(
                "docker ps --filter name=crowdsec",
                StepOutput::ok("Restarting (1) 2 seconds ago"),
            );
        let ctx = context(executor);
        let err = install_crowdsec(&ctx, "web-1").await.unwrap_err();
        assert!(matches!(err, ComponentError::Verification { .. }));
        assert!(err.is_retryable());

        // Flags stay untouched on failure.
        let server = ctx.store.server("web-1").unwrap();
        assert!(!server.security.crowdsec_installed);
    }

    #[tokio::test(start_paused = true)]
    async fn remove_clears_flags_and_unwires_proxy() {
        let ctx = context(healthy_executor());
        install_crowdsec(&ctx, "web-1").await.unwrap();
        remove_crowdsec(&ctx, "web-1").await.unwrap();

        let server = ctx.store.server("web-1").unwrap();
        assert!(!server.security.crowdsec_installed);
        assert!(server.security.bouncer_key.is_none());
        assert!(server.security.crowdsec_lapi_url.is_none());
    }
}
