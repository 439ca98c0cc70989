//! Per-application firewall management.

use std::sync::Arc;

use tabled::Tabled;
use warden_core::model::Application;

use crate::cli::{FirewallArgs, FirewallCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;
use crate::session::Session;

use super::util;

#[derive(Tabled)]
struct FirewallRow {
    #[tabled(rename = "UUID")]
    uuid: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Server")]
    server: String,
    #[tabled(rename = "Enabled")]
    enabled: String,
    #[tabled(rename = "AppSec")]
    appsec: String,
    #[tabled(rename = "Rules")]
    rules: usize,
}

impl From<&Arc<Application>> for FirewallRow {
    fn from(app: &Arc<Application>) -> Self {
        let (enabled, appsec, rules) = app.firewall.as_ref().map_or_else(
            || ("-".to_owned(), "-".to_owned(), 0),
            |fw| {
                (
                    yes_no(fw.enabled),
                    yes_no(fw.appsec_enabled),
                    fw.rules.len(),
                )
            },
        );

        Self {
            uuid: app.uuid.to_string(),
            name: app.name.clone(),
            server: app.server.clone(),
            enabled,
            appsec,
            rules,
        }
    }
}

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_owned()
}

pub async fn handle(
    session: &Session,
    args: FirewallArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        FirewallCommand::Enable { application } => {
            let app = util::resolve_application(&session.store, &application)?;
            let config = app.firewall.clone().unwrap_or_default();

            session.orchestrator.enable_firewall(&app.uuid, config).await?;
            util::drain_queue(
                session,
                global.quiet,
                &format!("arming firewall for {}", app.name),
            )
            .await;

            if !global.quiet {
                eprintln!("Firewall enabled for {}", app.name);
            }
            Ok(())
        }

        FirewallCommand::Disable { application } => {
            let app = util::resolve_application(&session.store, &application)?;
            if !util::confirm(
                &format!("Disable the firewall for {} and strip its deployed rules?", app.name),
                global.yes,
            )? {
                return Ok(());
            }

            session.orchestrator.disable_firewall(&app.uuid).await?;
            util::drain_queue(
                session,
                global.quiet,
                &format!("disarming firewall for {}", app.name),
            )
            .await;

            if !global.quiet {
                eprintln!("Firewall disabled for {}", app.name);
            }
            Ok(())
        }

        FirewallCommand::Status => {
            let apps = session.store.applications();
            let rendered =
                output::render_list(&global.output, &apps, |app| FirewallRow::from(app), |app| {
                    app.uuid.to_string()
                });
            output::print_output(&rendered, global.quiet);
            Ok(())
        }
    }
}
