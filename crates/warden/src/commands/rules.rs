//! Rule and ban deployment for a single application.

use crate::cli::{GlobalOpts, RulesArgs, RulesCommand};
use crate::error::CliError;
use crate::session::Session;

use super::util;

pub async fn handle(
    session: &Session,
    args: RulesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let engine = session.orchestrator.rules();

    match args.command {
        RulesCommand::Deploy { application } => {
            let app = util::resolve_application(&session.store, &application)?;
            let report = engine.deploy(&app.uuid).await?;
            util::print_report(&report, global);
            Ok(())
        }

        RulesCommand::Remove { application } => {
            let app = util::resolve_application(&session.store, &application)?;
            let report = engine.remove_rules(&app.uuid).await?;
            util::print_report(&report, global);
            Ok(())
        }

        RulesCommand::ApplyBans { application } => {
            let app = util::resolve_application(&session.store, &application)?;
            let report = engine.apply_ip_bans(&app.uuid).await?;
            util::print_report(&report, global);
            Ok(())
        }

        RulesCommand::RemoveBans { application } => {
            let app = util::resolve_application(&session.store, &application)?;
            let report = engine.remove_ip_bans(&app.uuid).await?;
            util::print_report(&report, global);
            Ok(())
        }
    }
}
