//! Alert sync and inspection.

use std::sync::Arc;

use tabled::Tabled;
use warden_core::model::FirewallAlert;
use warden_core::SyncSummary;

use crate::cli::{AlertsArgs, AlertsCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;
use crate::session::Session;

use super::util;

#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Application")]
    application: String,
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "Type")]
    alert_type: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Status")]
    status: String,
}

pub async fn handle(
    session: &Session,
    args: AlertsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        AlertsCommand::Sync { server } => {
            let summary = match server {
                Some(name) => {
                    util::resolve_server(&session.store, &name)?;
                    session.orchestrator.alerts().sync_one(&name).await?
                }
                None => session.orchestrator.alerts().sync_all().await,
            };

            let rendered = output::render_single(&global.output, &summary, summary_detail, |s| {
                s.recorded.to_string()
            });
            output::print_output(&rendered, global.quiet);
            Ok(())
        }

        AlertsCommand::List { application, limit } => {
            let filter = match application {
                Some(identifier) => {
                    Some(util::resolve_application(&session.store, &identifier)?.uuid)
                }
                None => None,
            };

            let mut alerts: Vec<Arc<FirewallAlert>> = session
                .store
                .alerts()
                .iter()
                .filter(|alert| filter.is_none_or(|uuid| alert.application == uuid))
                .cloned()
                .collect();
            alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            alerts.truncate(limit);

            let rendered = output::render_list(
                &global.output,
                &alerts,
                |alert| to_row(session, alert),
                |alert| alert.id.to_string(),
            );
            output::print_output(&rendered, global.quiet);
            Ok(())
        }
    }
}

fn to_row(session: &Session, alert: &Arc<FirewallAlert>) -> AlertRow {
    let application = session
        .store
        .application(&alert.application)
        .map_or_else(|| alert.application.to_string(), |app| app.name.clone());

    AlertRow {
        time: alert.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        application,
        ip: alert.ip.clone(),
        alert_type: alert.alert_type.to_string(),
        severity: alert.severity.to_string(),
        status: alert.status.to_string(),
    }
}

fn summary_detail(summary: &SyncSummary) -> String {
    [
        format!("Servers swept:   {}", summary.servers),
        format!("Alerts fetched:  {}", summary.fetched),
        format!("Alerts recorded: {}", summary.recorded),
        format!("Failed servers:  {}", summary.failed_servers),
    ]
    .join("\n")
}
