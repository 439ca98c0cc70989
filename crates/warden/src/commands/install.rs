//! Install command handlers: full stack or individual components.

use warden_core::install;

use crate::cli::{FixAcquisArgs, GlobalOpts, InstallArgs, InstallCommand};
use crate::error::CliError;
use crate::output;
use crate::session::Session;

use super::util;

pub async fn handle(
    session: &Session,
    args: InstallArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        InstallCommand::Stack { server, force } => {
            install_stack(session, &server, force, global).await
        }

        InstallCommand::Crowdsec { server } => {
            util::resolve_server(&session.store, &server)?;
            let report = install::install_crowdsec(&session.ctx, &server).await?;
            util::print_report(&report, global);
            Ok(())
        }

        InstallCommand::AccessLogs { server } => {
            util::resolve_server(&session.store, &server)?;
            let report = install::enable_access_logs(&session.ctx, &server).await?;
            util::print_report(&report, global);
            Ok(())
        }

        InstallCommand::HeaderCapture { server } => {
            util::resolve_server(&session.store, &server)?;
            let report = install::enable_header_capture(&session.ctx, &server).await?;
            util::print_report(&report, global);
            Ok(())
        }

        InstallCommand::LogIntegration { server } => {
            util::resolve_server(&session.store, &server)?;
            let report = install::integrate_logs(&session.ctx, &server).await?;
            util::print_report(&report, global);
            Ok(())
        }

        InstallCommand::TrafficLogger { server } => {
            util::resolve_server(&session.store, &server)?;
            let report = install::install_traffic_logger(&session.ctx, &server).await?;
            util::print_report(&report, global);
            Ok(())
        }
    }
}

/// Full-stack install: dispatch the staged job schedule, drain it, then
/// report what validation concluded.
async fn install_stack(
    session: &Session,
    server: &str,
    force: bool,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let record = util::resolve_server(&session.store, server)?;
    if record.security.installation_validated && !force {
        return Err(CliError::AlreadyInstalled {
            server: server.to_owned(),
        });
    }

    session.orchestrator.install_stack(server);
    util::drain_queue(session, global.quiet, &format!("installing stack on {server}")).await;

    // The validation job ran last and wrote its verdict to the store.
    let record = util::resolve_server(&session.store, server)?;
    match &record.security.validation_details {
        Some(details) if details.all_passed() => {
            if !global.quiet {
                eprintln!("Stack installed and validated on {server}");
            }
            let rendered = output::render_single(
                &global.output,
                details,
                super::validate::validation_detail,
                |_| "pass".to_owned(),
            );
            output::print_output(&rendered, global.quiet);
            Ok(())
        }
        Some(details) => Err(CliError::StackUnhealthy {
            server: server.to_owned(),
            components: details.failed_components().join(", "),
        }),
        None => Err(CliError::StackUnhealthy {
            server: server.to_owned(),
            components: "validation never completed".to_owned(),
        }),
    }
}

/// `fix-acquis`: rebuild the log acquisition manifest wholesale from the
/// tracked inventory and restart the agent.
pub async fn handle_fix_acquis(
    session: &Session,
    args: FixAcquisArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    util::resolve_server(&session.store, &args.server)?;
    let report = install::rebuild_acquis(&session.ctx, &args.server).await?;
    util::print_report(&report, global);
    Ok(())
}
