//! Removal command handlers. All of these are destructive and gated
//! behind a confirmation prompt.

use warden_core::install;

use crate::cli::{GlobalOpts, RemoveArgs, RemoveCommand};
use crate::error::CliError;
use crate::output;
use crate::session::Session;

use super::util;

pub async fn handle(
    session: &Session,
    args: RemoveArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        RemoveCommand::Stack { server } => {
            util::resolve_server(&session.store, &server)?;
            if !util::confirm(
                &format!("Tear down the whole firewall stack on {server}?"),
                global.yes,
            )? {
                return Ok(());
            }

            let reports = session.orchestrator.remove_stack(&server).await?;
            let rendered =
                output::render_list(&global.output, &reports, |r| util::ReportRow::from(r), |r| {
                    format!("{}: {}", r.component, r.phase)
                });
            output::print_output(&rendered, global.quiet);
            if !global.quiet {
                eprintln!("Stack removed from {server}");
            }
            Ok(())
        }

        RemoveCommand::Crowdsec { server } => {
            util::resolve_server(&session.store, &server)?;
            if !util::confirm(
                &format!("Remove the CrowdSec agent from {server}?"),
                global.yes,
            )? {
                return Ok(());
            }

            let report = install::remove_crowdsec(&session.ctx, &server).await?;
            util::print_report(&report, global);
            Ok(())
        }

        RemoveCommand::TrafficLogger { server } => {
            util::resolve_server(&session.store, &server)?;
            if !util::confirm(
                &format!("Remove the traffic-logger sidecar from {server}?"),
                global.yes,
            )? {
                return Ok(());
            }

            let report = install::remove_traffic_logger(&session.ctx, &server).await?;
            util::print_report(&report, global);
            Ok(())
        }
    }
}
