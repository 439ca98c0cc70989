//! Feeds the proxy access log into the CrowdSec agent.
//!
//! Regenerates the agent compose file with read-only mounts for the
//! proxy directory and `/var/log`, recreates the container, and makes
//! sure the acquisition manifest tails the access log. The mount line
//! inside the compose file doubles as the "already integrated" marker,
//! so re-runs skip the disruptive recreate.

use warden_remote::Script;

use crate::acquis::{AcquisConfig, AcquisDoc, AppsecSource, FileSource};
use crate::error::ComponentError;
use crate::install::crowdsec::{PROXY_MOUNT_MARKER, render_compose};
use crate::install::{Component, InstallContext, InstallReport, verify_container_up};
use crate::settings::ACCESS_LOG_CONTAINER_PATH;

/// Wires the access log into the agent on one server.
pub async fn integrate_logs(
    ctx: &InstallContext,
    server_name: &str,
) -> Result<InstallReport, ComponentError> {
    let component = Component::LogIntegration;
    let server = ctx.server(server_name, component)?;
    let host = &server.host;
    let settings = &ctx.settings;
    let mut report = InstallReport::begin(component);

    if !server.security.crowdsec_installed {
        return Err(ComponentError::precondition(
            component.to_string(),
            "CrowdSec must be installed before its log sources are wired",
        ));
    }

    let compose_path = settings.compose_path();
    let current = ctx
        .executor
        .probe(host, "read-compose", &format!("cat {compose_path}"))
        .await?;

    if current.stdout.contains(PROXY_MOUNT_MARKER) {
        report.step("proxy mount already present");
    } else {
        let backup = Script::new().step(
            "backup-compose",
            format!("cp {compose_path} {compose_path}.backup-$(date +%Y%m%d%H%M%S)"),
        );
        ctx.executor.run(host, &backup).await?;

        ctx.executor
            .upload(host, &compose_path, &render_compose(settings, true)?)
            .await?;
        report.step("compose rewritten with proxy mount");

        let recreate = Script::new().step(
            "agent-recreate",
            format!(
                "cd {} && docker compose down && docker compose up -d",
                settings.base_path
            ),
        );
        ctx.executor.run(host, &recreate).await?;
        report.step("agent recreated");
        ctx.settle(settings.startup_wait_secs).await;
    }

    // The manifest is shared state; merge, never overwrite.
    let manifest = ctx
        .executor
        .probe(
            host,
            "read-acquis",
            &format!("cat {} 2>/dev/null || true", settings.acquis_path()),
        )
        .await?;
    let mut acquis = AcquisConfig::parse(&manifest.stdout);
    if acquis.ensure_traefik_source() {
        ctx.executor
            .upload(host, &settings.acquis_path(), &acquis.render())
            .await?;
        ctx.executor
            .probe(
                host,
                "agent-reload",
                &format!("docker exec {} kill -SIGHUP 1", settings.container_name),
            )
            .await?;
        report.step("acquisition manifest updated");
    }

    report.verifying();
    verify_container_up(
        ctx.executor.as_ref(),
        host,
        &settings.container_name,
        component,
        "agent-recreate",
    )
    .await?;

    let mount = ctx
        .executor
        .probe(
            host,
            "verify-log-mount",
            &format!(
                "docker exec {} ls -lh {ACCESS_LOG_CONTAINER_PATH} 2>&1",
                settings.container_name
            ),
        )
        .await?;
    if mount.combined().contains("No such file") {
        return Err(ComponentError::verification(
            component.to_string(),
            "verify-log-mount",
            "access log is not visible inside the agent container",
        ));
    }

    let acquired = ctx
        .executor
        .probe(
            host,
            "verify-log-acquisition",
            &format!(
                "docker logs {} 2>&1 | grep -i 'traefik/access.log' | tail -5",
                settings.container_name
            ),
        )
        .await?;
    if acquired.combined().contains("No matching files") {
        return Err(ComponentError::verification(
            component.to_string(),
            "verify-log-acquisition",
            "agent reports no matching files for the access log",
        ));
    }
    report.step("access log flowing into the agent");

    Ok(report.installed())
}

/// Rebuilds the acquisition manifest from the tracked inventory.
///
/// Recovery path for a manifest that drifted or became unparseable on
/// the host: the file is replaced wholesale with the Traefik source
/// plus one AppSec source per firewall-enabled application, and the
/// agent is restarted rather than signalled so a broken in-memory
/// config cannot outlive the fix. Surviving log errors are reported as
/// warnings, mirroring what an operator would check by hand.
pub async fn rebuild_acquis(
    ctx: &InstallContext,
    server_name: &str,
) -> Result<InstallReport, ComponentError> {
    let component = Component::LogIntegration;
    let server = ctx.server(server_name, component)?;
    let host = &server.host;
    let settings = &ctx.settings;
    let mut report = InstallReport::begin(component);

    if !server.security.crowdsec_installed {
        return Err(ComponentError::precondition(
            component.to_string(),
            "no agent on this server to rebuild the acquisition manifest for",
        ));
    }

    let mut acquis = AcquisConfig::new(vec![AcquisDoc::File(FileSource::traefik())]);
    for application in ctx.store.firewall_applications_on(server_name) {
        acquis.upsert_appsec(AppsecSource::for_application(&application.uuid, settings));
    }
    ctx.executor
        .upload(host, &settings.acquis_path(), &acquis.render())
        .await?;
    report.step(format!(
        "manifest rebuilt with {} appsec source(s)",
        acquis.appsec_sources().count()
    ));

    let restart = Script::new().step(
        "agent-restart",
        format!(
            "cd {} && docker compose restart {}",
            settings.base_path, settings.container_name
        ),
    );
    ctx.executor.run(host, &restart).await?;
    ctx.settle(settings.startup_wait_secs).await;

    report.verifying();
    verify_container_up(
        ctx.executor.as_ref(),
        host,
        &settings.container_name,
        component,
        "agent-restart",
    )
    .await?;

    let logs = ctx
        .executor
        .probe(
            host,
            "agent-log-scan",
            &format!("docker logs {} --tail 20 2>&1", settings.container_name),
        )
        .await?;
    let tail = logs.combined().to_lowercase();
    if tail.contains("fatal") || tail.contains("level=error") {
        report.warn("agent log still shows errors after the rebuild");
    } else {
        report.step("agent log clean");
    }

    Ok(report.installed())
}
