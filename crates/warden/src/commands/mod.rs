//! Command dispatch: CLI args in, stack operations out.

pub mod alerts;
pub mod countries;
pub mod firewall;
pub mod install;
pub mod remove;
pub mod rules;
pub mod status;
pub mod util;
pub mod validate;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;
use crate::session::Session;

pub async fn dispatch(
    cmd: Command,
    session: &Session,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Install(args) => install::handle(session, args, global).await,
        Command::Remove(args) => remove::handle(session, args, global).await,
        Command::Validate(args) => validate::handle(session, args, global).await,
        Command::FixAcquis(args) => install::handle_fix_acquis(session, args, global).await,
        Command::Alerts(args) => alerts::handle(session, args, global).await,
        Command::Firewall(args) => firewall::handle(session, args, global).await,
        Command::Rules(args) => rules::handle(session, args, global).await,
        Command::Status(args) => status::handle(session, args, global).await,
        // Handled in main before a session exists.
        Command::Countries | Command::Completions(_) => unreachable!(),
    }
}
