//! Proxy access-log configuration.
//!
//! Two textual patches to the proxy's compose file: first the
//! access-log directives themselves (JSON format, fixed file path,
//! buffering), then capture directives for the headers the detection
//! scenarios read. Both are marker-checked so re-runs never duplicate
//! lines, and both force-recreate the proxy because command arguments
//! only apply at container creation.

use warden_remote::Script;

use crate::error::ComponentError;
use crate::install::{Component, InstallContext, InstallReport};
use crate::model::SecurityUpdate;
use crate::settings::ACCESS_LOG_CONTAINER_PATH;

/// Presence of this directive means access logging is configured.
const ACCESS_LOG_MARKER: &str = "--accesslog.filepath=/traefik/access.log";

/// Anchor the header directives are inserted after.
const HEADER_ANCHOR: &str = "--accesslog.fields.headers.defaultmode=keep";

/// Presence of this directive means header capture is configured.
const HEADER_MARKER: &str = "--accesslog.fields.headers.names.User-Agent=keep";

/// Headers the scenarios and AppSec rules match on.
const CAPTURED_HEADERS: [&str; 4] = ["User-Agent", "Referer", "X-Forwarded-For", "X-Real-Ip"];

fn access_log_args() -> Vec<String> {
    vec![
        "--accesslog=true".into(),
        format!("--accesslog.filepath={ACCESS_LOG_CONTAINER_PATH}"),
        "--accesslog.format=json".into(),
        "--accesslog.bufferingsize=100".into(),
        "--accesslog.fields.defaultmode=keep".into(),
        "--accesslog.fields.headers.defaultmode=keep".into(),
    ]
}

fn header_args() -> Vec<String> {
    CAPTURED_HEADERS
        .iter()
        .map(|h| format!("--accesslog.fields.headers.names.{h}=keep"))
        .collect()
}

fn indent_of(line: &str) -> String {
    line.chars().take_while(|c| c.is_whitespace()).collect()
}

/// Inserts command arguments after the last existing `--` argument
/// line, or before the `labels:`/`volumes:` block when the service has
/// no argument list yet.
fn insert_compose_args(
    compose: &str,
    args: &[String],
    component: Component,
) -> Result<String, ComponentError> {
    let lines: Vec<&str> = compose.lines().collect();

    let last_arg = lines
        .iter()
        .rposition(|l| l.trim_start().starts_with("- '--") || l.trim_start().starts_with("- \"--"));
    let (insert_at, indent) = if let Some(idx) = last_arg {
        (idx + 1, indent_of(lines[idx]))
    } else {
        let block = lines.iter().position(|l| {
            let t = l.trim_start();
            t.starts_with("labels:") || t.starts_with("volumes:")
        });
        let Some(idx) = block else {
            return Err(ComponentError::precondition(
                component.to_string(),
                "proxy compose file has no command arguments and no labels/volumes block to anchor on",
            ));
        };
        (idx, format!("{}  ", indent_of(lines[idx])))
    };

    let mut out: Vec<String> = lines[..insert_at].iter().map(|&l| l.to_owned()).collect();
    for arg in args {
        out.push(format!("{indent}- '{arg}'"));
    }
    out.extend(lines[insert_at..].iter().map(|&l| (*l).to_owned()));
    Ok(out.join("\n") + "\n")
}

/// Inserts command arguments directly after the line containing
/// `anchor`.
fn insert_after_anchor(
    compose: &str,
    anchor: &str,
    args: &[String],
    component: Component,
) -> Result<String, ComponentError> {
    let lines: Vec<&str> = compose.lines().collect();
    let Some(idx) = lines.iter().position(|l| l.contains(anchor)) else {
        return Err(ComponentError::precondition(
            component.to_string(),
            format!("proxy compose file is missing the `{anchor}` directive"),
        ));
    };
    let indent = indent_of(lines[idx]);
    let mut out: Vec<String> = lines[..=idx].iter().map(|&l| l.to_owned()).collect();
    for arg in args {
        out.push(format!("{indent}- '{arg}'"));
    }
    out.extend(lines[idx + 1..].iter().map(|&l| (*l).to_owned()));
    Ok(out.join("\n") + "\n")
}

async fn read_proxy_compose(
    ctx: &InstallContext,
    host: &warden_remote::HostSpec,
    component: Component,
) -> Result<String, ComponentError> {
    let path = ctx.settings.proxy_static_config_path();
    let output = ctx
        .executor
        .probe(host, "read-proxy-compose", &format!("cat {path}"))
        .await?;
    if !output.success() || output.stdout.trim().is_empty() {
        return Err(ComponentError::precondition(
            component.to_string(),
            format!("proxy compose file `{path}` is missing or empty"),
        ));
    }
    Ok(output.stdout)
}

async fn backup_and_replace(
    ctx: &InstallContext,
    host: &warden_remote::HostSpec,
    patched: &str,
) -> Result<(), ComponentError> {
    let path = ctx.settings.proxy_static_config_path();
    let backup = Script::new().step(
        "backup-proxy-compose",
        format!("cp {path} {path}.backup-$(date +%Y%m%d%H%M%S)"),
    );
    ctx.executor.run(host, &backup).await?;
    ctx.executor.upload(host, &path, patched).await?;
    Ok(())
}

async fn recreate_proxy(
    ctx: &InstallContext,
    host: &warden_remote::HostSpec,
) -> Result<(), ComponentError> {
    let recreate = Script::new().step(
        "proxy-recreate",
        format!(
            "cd {} && docker compose up -d --force-recreate",
            ctx.settings.proxy_path
        ),
    );
    ctx.executor.run(host, &recreate).await?;
    Ok(())
}

/// Turns on JSON access logging at a fixed path on the proxy and
/// records `traefik_logging_enabled` once a log line is observable.
pub async fn enable_access_logs(
    ctx: &InstallContext,
    server_name: &str,
) -> Result<InstallReport, ComponentError> {
    let component = Component::AccessLogs;
    let server = ctx.server(server_name, component)?;
    let host = &server.host;
    let settings = &ctx.settings;
    let mut report = InstallReport::begin(component);

    let compose = read_proxy_compose(ctx, host, component).await?;
    if compose.contains(ACCESS_LOG_MARKER) {
        report.step("access-log directives already present");
    } else {
        let patched = insert_compose_args(&compose, &access_log_args(), component)?;
        backup_and_replace(ctx, host, &patched).await?;
        report.step("access-log directives inserted");
        recreate_proxy(ctx, host).await?;
        report.step("proxy recreated");
        ctx.settle(10).await;
    }

    report.verifying();
    // One synthetic request guarantees a log line even on idle hosts.
    ctx.executor
        .probe(
            host,
            "synthetic-request",
            "curl -s -o /dev/null http://localhost || true",
        )
        .await?;
    ctx.settle(settings.reload_wait_secs).await;
    let probe = ctx
        .executor
        .probe(
            host,
            "verify-access-log",
            &format!(
                "docker exec {} ls -lh {ACCESS_LOG_CONTAINER_PATH} 2>&1",
                settings.proxy_container
            ),
        )
        .await?;
    if probe.combined().contains("No such file") {
        return Err(ComponentError::verification(
            component.to_string(),
            "verify-access-log",
            "access log file was not created after proxy recreate",
        ));
    }
    report.step("access log present");

    ctx.store.update_security(
        server_name,
        SecurityUpdate::default().traefik_logging_enabled(true),
    )?;
    report.step("server flags recorded");

    Ok(report.installed())
}

/// Adds capture directives for the detection-relevant headers and
/// verifies a tagged request actually lands in the log.
pub async fn enable_header_capture(
    ctx: &InstallContext,
    server_name: &str,
) -> Result<InstallReport, ComponentError> {
    let component = Component::HeaderCapture;
    let server = ctx.server(server_name, component)?;
    let host = &server.host;
    let settings = &ctx.settings;
    let mut report = InstallReport::begin(component);

    let compose = read_proxy_compose(ctx, host, component).await?;
    if compose.contains(HEADER_MARKER) {
        report.step("header directives already present");
        return Ok(report.installed());
    }

    let patched = insert_after_anchor(&compose, HEADER_ANCHOR, &header_args(), component)?;
    backup_and_replace(ctx, host, &patched).await?;
    report.step("header directives inserted");

    recreate_proxy(ctx, host).await?;
    report.step("proxy recreated");
    report.verifying();
    ctx.settle(10).await;

    ctx.executor
        .probe(
            host,
            "synthetic-request",
            "curl -s -A \"Test-Bot\" -o /dev/null http://localhost || true",
        )
        .await?;
    ctx.settle(settings.reload_wait_secs).await;

    let probe = ctx
        .executor
        .probe(
            host,
            "verify-header-capture",
            &format!(
                "tail -5 {} | grep -i user-agent || echo NOT_FOUND",
                settings.access_log_host_path()
            ),
        )
        .await?;
    if probe.stdout.contains("NOT_FOUND") {
        return Err(ComponentError::verification(
            component.to_string(),
            "verify-header-capture",
            "captured headers did not show up in the access log",
        ));
    }
    report.step("header capture verified");

    Ok(report.installed())
}
