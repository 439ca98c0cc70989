//! Forward-auth sidecar installer.
//!
//! Uploads the bundled logger script, replaces any previous container
//! wholesale (stop, rm, run — never patch in place), and publishes the
//! health endpoint on loopback. The control plane's callback URL is
//! rewritten when it points at loopback, because the sidecar runs on a
//! different host than the control plane and `localhost` would loop
//! back to itself.

use rand::Rng;
use rand::distributions::Alphanumeric;
use secrecy::{ExposeSecret, SecretString};
use warden_remote::Script;

use crate::error::ComponentError;
use crate::install::{Component, InstallContext, InstallReport, container_status_cmd};
use crate::model::SecurityUpdate;

const LOGGER_SCRIPT: &str = include_str!("../../assets/traffic-logger/logger.py");
const LOGGER_REQUIREMENTS: &str = include_str!("../../assets/traffic-logger/requirements.txt");

const API_KEY_LEN: usize = 32;

/// Swaps loopback hosts in the control-plane URL for the server's own
/// address.
fn resolve_callback_url(url: &str, server_address: &str) -> String {
    url.replace("localhost", server_address)
        .replace("127.0.0.1", server_address)
}

fn generate_api_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_LEN)
        .map(char::from)
        .collect()
}

/// Installs (or replaces) the sidecar on one server.
pub async fn install_traffic_logger(
    ctx: &InstallContext,
    server_name: &str,
) -> Result<InstallReport, ComponentError> {
    let component = Component::TrafficLogger;
    let server = ctx.server(server_name, component)?;
    let host = &server.host;
    let settings = &ctx.settings;
    let mut report = InstallReport::begin(component);

    let prepare = Script::new().step(
        "create-directory",
        format!("mkdir -p {dir} && chmod 755 {dir}", dir = settings.logger_dir),
    );
    ctx.executor.run(host, &prepare).await?;

    ctx.executor
        .upload(host, &format!("{}/logger.py", settings.logger_dir), LOGGER_SCRIPT)
        .await?;
    ctx.executor
        .upload(
            host,
            &format!("{}/requirements.txt", settings.logger_dir),
            LOGGER_REQUIREMENTS,
        )
        .await?;
    report.step("sidecar assets uploaded");

    ctx.executor
        .probe(
            host,
            "remove-previous",
            &format!(
                "docker stop {name} 2>/dev/null; docker rm {name} 2>/dev/null; true",
                name = settings.logger_container
            ),
        )
        .await?;

    // Keys survive reinstalls so the control plane keeps accepting the
    // sidecar's callbacks.
    let api_key = server
        .security
        .traffic_logger_api_key
        .as_ref()
        .map_or_else(generate_api_key, |k| k.expose_secret().to_owned());
    let callback_url = resolve_callback_url(&settings.control_plane_url, &host.address);

    let mut run_cmd = format!(
        "docker run -d --name {name} --network {network} --restart unless-stopped \
         -p 127.0.0.1:{port}:8080 \
         -v {proxy}:/var/log/traefik:ro \
         -v {dir}:/app \
         -e WARDEN_API_URL={url} \
         -e WARDEN_API_KEY={key} \
         -e CROWDSEC_LAPI_URL=http://{lapi} \
         -e CROWDSEC_APPSEC_URL=http://{appsec}",
        name = settings.logger_container,
        network = settings.docker_network,
        port = settings.logger_port,
        proxy = settings.proxy_path,
        dir = settings.logger_dir,
        url = callback_url,
        key = api_key,
        lapi = settings.lapi_host(),
        appsec = settings.appsec_host(),
    );
    if let Some(bouncer_key) = &server.security.bouncer_key {
        run_cmd.push_str(&format!(
            " -e CROWDSEC_API_KEY={}",
            bouncer_key.expose_secret()
        ));
    }
    run_cmd.push_str(&format!(
        " {image} sh -c 'cd /app && pip install -r requirements.txt && python logger.py'",
        image = settings.logger_image
    ));

    let start = Script::new().step("container-run", run_cmd);
    ctx.executor.run(host, &start).await?;
    report.step("sidecar container started");

    report.verifying();
    ctx.settle(5).await;
    let status = ctx
        .executor
        .probe(
            host,
            "container-status",
            &container_status_cmd(&settings.logger_container),
        )
        .await?;
    if !status.stdout.contains("Up") {
        let logs = ctx
            .executor
            .probe(
                host,
                "container-logs",
                &format!("docker logs {} 2>&1 | tail -20", settings.logger_container),
            )
            .await?;
        return Err(ComponentError::verification(
            component.to_string(),
            "container-run",
            format!(
                "sidecar container is not running: {}",
                logs.stdout_trimmed()
            ),
        ));
    }
    report.step("sidecar container running");

    ctx.store.update_security(
        server_name,
        SecurityUpdate::default()
            .traffic_logger_installed(true)
            .traffic_logger_api_key(Some(SecretString::from(api_key))),
    )?;
    report.step("server flags recorded");

    Ok(report.installed())
}

/// Stops and removes the sidecar, clearing its flags.
pub async fn remove_traffic_logger(
    ctx: &InstallContext,
    server_name: &str,
) -> Result<InstallReport, ComponentError> {
    let component = Component::TrafficLogger;
    let server = ctx.server(server_name, component)?;
    let mut report = InstallReport::begin(component);

    ctx.executor
        .probe(
            &server.host,
            "remove-container",
            &format!(
                "docker stop {name} 2>/dev/null; docker rm {name} 2>/dev/null; true",
                name = ctx.settings.logger_container
            ),
        )
        .await?;
    report.step("sidecar container removed");

    ctx.store.update_security(
        server_name,
        SecurityUpdate::default()
            .traffic_logger_installed(false)
            .traffic_logger_api_key(None),
    )?;
    report.step("server flags cleared");

    Ok(report.installed())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Server;
    use crate::settings::StackSettings;
    use crate::store::FleetStore;
    use std::sync::Arc;
    use warden_remote::testing::ScriptedExecutor;
    use warden_remote::{HostSpec, StepOutput};

    fn fixture() -> (Arc<FleetStore>, Arc<ScriptedExecutor>) {
        let store = FleetStore::new();
        store.upsert_server(Server::new("web-1", HostSpec::new("web-1", "203.0.113.7")));
        let executor = ScriptedExecutor::new().respond(
            "docker ps --filter name=traffic-logger",
            StepOutput::ok("Up 3 seconds"),
        );
        (Arc::new(store), Arc::new(executor))
    }

    fn context(store: Arc<FleetStore>, executor: Arc<ScriptedExecutor>) -> InstallContext {
        InstallContext::new(executor, store, Arc::new(StackSettings::default()))
    }

    #[test]
    fn loopback_callback_urls_are_rewritten() {
        assert_eq!(
            resolve_callback_url("http://localhost:8000", "203.0.113.7"),
            "http://203.0.113.7:8000"
        );
        assert_eq!(
            resolve_callback_url("http://127.0.0.1:8000/api", "203.0.113.7"),
            "http://203.0.113.7:8000/api"
        );
        assert_eq!(
            resolve_callback_url("https://panel.example.com", "203.0.113.7"),
            "https://panel.example.com"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn install_uploads_assets_and_starts_container() {
        let (store, executor) = fixture();
        let ctx = context(store, Arc::clone(&executor));

        let report = install_traffic_logger(&ctx, "web-1").await.unwrap();
        assert_eq!(report.phase, crate::install::InstallPhase::Installed);

        let script = executor.upload_content("logger.py").unwrap();
        assert!(script.contains("/forwardauth"));
        assert!(executor.upload_content("requirements.txt").unwrap().contains("flask"));

        let run = executor
            .commands()
            .into_iter()
            .find(|c| c.starts_with("docker run"))
            .unwrap();
        assert!(run.contains("-p 127.0.0.1:3001:8080"));
        assert!(run.contains("--network coolify"));
        assert!(run.contains("--restart unless-stopped"));
        assert!(run.contains("python:3.11-slim"));
        // Loopback control-plane URL swapped for the server address.
        assert!(run.contains("WARDEN_API_URL=http://203.0.113.7:8000"));

        let server = ctx.store.server("web-1").unwrap();
        assert!(server.security.traffic_logger_installed);
        assert!(server.security.traffic_logger_api_key.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn reinstall_reuses_the_existing_api_key() {
        let (store, executor) = fixture();
        store
            .update_security(
                "web-1",
                SecurityUpdate::default().traffic_logger_api_key(Some(SecretString::from(
                    "reused-key-0123456789abcdef",
                ))),
            )
            .unwrap();
        let ctx = context(store, Arc::clone(&executor));

        install_traffic_logger(&ctx, "web-1").await.unwrap();
        let run = executor
            .commands()
            .into_iter()
            .find(|c| c.starts_with("docker run"))
            .unwrap();
        assert!(run.contains("WARDEN_API_KEY=reused-key-0123456789abcdef"));
    }

    #[tokio::test(start_paused = true)]
    async fn dead_container_is_a_verification_failure_with_logs() {
        let store = FleetStore::new();
        store.upsert_server(Server::new("web-1", HostSpec::new("web-1", "203.0.113.7")));
        let executor = ScriptedExecutor::new()
            .respond("docker ps --filter name=traffic-logger", StepOutput::ok(""))
            .respond(
                "docker logs traffic-logger",
                StepOutput::ok("ModuleNotFoundError: No module named 'flask'"),
            );
        let ctx = context(Arc::new(store), Arc::new(executor));

        let err = install_traffic_logger(&ctx, "web-1").await.unwrap_err();
        assert!(matches!(err, ComponentError::Verification { .. }));
        assert!(err.to_string().contains("ModuleNotFoundError"));
        assert!(!ctx.store.server("web-1").unwrap().security.traffic_logger_installed);
    }

    #[tokio::test(start_paused = true)]
    async fn remove_clears_flags() {
        let (store, executor) = fixture();
        let ctx = context(store, executor);
        install_traffic_logger(&ctx, "web-1").await.unwrap();
        remove_traffic_logger(&ctx, "web-1").await.unwrap();

        let server = ctx.store.server("web-1").unwrap();
        assert!(!server.security.traffic_logger_installed);
        assert!(server.security.traffic_logger_api_key.is_none());
    }
}
