//! Fleet-wide and per-server stack status.

use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::Tabled;
use warden_core::CrowdsecHealth;

use crate::cli::{GlobalOpts, StatusArgs};
use crate::error::CliError;
use crate::output;
use crate::session::Session;

use super::util;

/// One server's status: stored flags plus an agent probe (cached
/// unless `--refresh`).
#[derive(Serialize)]
#[allow(clippy::struct_excessive_bools)]
struct ServerStatus {
    server: String,
    address: String,
    health: CrowdsecHealth,
    crowdsec_installed: bool,
    traefik_logging_enabled: bool,
    traffic_logger_installed: bool,
    installation_validated: bool,
    last_validation_at: Option<DateTime<Utc>>,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Server")]
    server: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Agent")]
    agent: String,
    #[tabled(rename = "LAPI")]
    lapi: String,
    #[tabled(rename = "Bouncer")]
    bouncer: String,
    #[tabled(rename = "Logging")]
    logging: String,
    #[tabled(rename = "Sidecar")]
    sidecar: String,
    #[tabled(rename = "Validated")]
    validated: String,
}

pub async fn handle(
    session: &Session,
    args: StatusArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let colored = output::should_color(&global.color);

    match &args.server {
        Some(name) => {
            let status = collect(session, name, args.refresh).await?;
            let rendered = output::render_single(
                &global.output,
                &status,
                |s| status_detail(s, colored),
                |s| s.server.clone(),
            );
            output::print_output(&rendered, global.quiet);
            Ok(())
        }

        None => {
            let mut statuses = Vec::new();
            for server in session.store.servers().iter() {
                statuses.push(collect(session, &server.name, args.refresh).await?);
            }

            let rendered = output::render_list(
                &global.output,
                &statuses,
                |s| to_row(s, colored),
                |s| s.server.clone(),
            );
            output::print_output(&rendered, global.quiet);
            Ok(())
        }
    }
}

async fn collect(session: &Session, name: &str, refresh: bool) -> Result<ServerStatus, CliError> {
    let server = util::resolve_server(&session.store, name)?;
    let health = session.orchestrator.health().status(name, refresh).await?;

    Ok(ServerStatus {
        server: server.name.clone(),
        address: format!("{}:{}", server.host.address, server.host.port),
        health,
        crowdsec_installed: server.security.crowdsec_installed,
        traefik_logging_enabled: server.security.traefik_logging_enabled,
        traffic_logger_installed: server.security.traffic_logger_installed,
        installation_validated: server.security.installation_validated,
        last_validation_at: server.security.last_validation_at,
    })
}

fn to_row(status: &ServerStatus, colored: bool) -> StatusRow {
    StatusRow {
        server: status.server.clone(),
        address: status.address.clone(),
        agent: up_down(status.health.container_running, colored),
        lapi: up_down(status.health.lapi_responding, colored),
        bouncer: yes_no(status.health.bouncer_configured),
        logging: yes_no(status.traefik_logging_enabled),
        sidecar: yes_no(status.traffic_logger_installed),
        validated: yes_no(status.installation_validated),
    }
}

fn status_detail(status: &ServerStatus, colored: bool) -> String {
    let mut lines = vec![
        format!("Server:          {}", status.server),
        format!("Address:         {}", status.address),
        format!(
            "Agent:           {}",
            up_down(status.health.container_running, colored)
        ),
        format!(
            "LAPI:            {}",
            up_down(status.health.lapi_responding, colored)
        ),
        format!(
            "Bouncer:         {}",
            yes_no(status.health.bouncer_configured)
        ),
        format!(
            "Agent version:   {}",
            status.health.version.as_deref().unwrap_or("-")
        ),
        format!("Traefik logging: {}", yes_no(status.traefik_logging_enabled)),
        format!("Traffic logger:  {}", yes_no(status.traffic_logger_installed)),
        format!("Validated:       {}", yes_no(status.installation_validated)),
        format!(
            "Last validated:  {}",
            status
                .last_validation_at
                .map_or_else(|| "never".to_owned(), |at| at.to_rfc3339())
        ),
    ];
    if let Some(error) = &status.health.error {
        lines.push(format!("Probe error:     {error}"));
    }
    lines.join("\n")
}

fn up_down(up: bool, colored: bool) -> String {
    match (up, colored) {
        (true, true) => "up".green().to_string(),
        (true, false) => "up".to_owned(),
        (false, true) => "down".red().to_string(),
        (false, false) => "down".to_owned(),
    }
}

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_owned()
}
