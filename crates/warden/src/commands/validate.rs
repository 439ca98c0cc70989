//! End-to-end stack validation, with optional automated repair.

use warden_core::ValidationDetails;

use crate::cli::{GlobalOpts, ValidateArgs};
use crate::error::CliError;
use crate::output;
use crate::session::Session;

use super::util;

pub async fn handle(
    session: &Session,
    args: ValidateArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    util::resolve_server(&session.store, &args.server)?;
    let health = session.orchestrator.health();

    let mut details = health.validate_server(&args.server).await?;

    if !details.all_passed() && args.fix {
        let outcome = health.repair(&args.server).await?;
        if !global.quiet {
            for action in &outcome.actions {
                eprintln!("repair: {action}");
            }
            for warning in &outcome.warnings {
                eprintln!("warning: {warning}");
            }
        }
        details = health.validate_server(&args.server).await?;
    }

    let rendered = output::render_single(&global.output, &details, validation_detail, |d| {
        if d.all_passed() { "pass" } else { "fail" }.to_owned()
    });
    output::print_output(&rendered, global.quiet);

    if details.all_passed() {
        Ok(())
    } else {
        Err(CliError::StackUnhealthy {
            server: args.server,
            components: details.failed_components().join(", "),
        })
    }
}

/// Multi-line check-by-check view for the table format.
pub fn validation_detail(details: &ValidationDetails) -> String {
    let check = |passed: bool| if passed { "pass" } else { "FAIL" };
    [
        format!(
            "CrowdSec:        {}  {}",
            check(details.crowdsec.passed),
            details.crowdsec.detail
        ),
        format!(
            "Traefik logging: {}  {}",
            check(details.traefik_logging.passed),
            details.traefik_logging.detail
        ),
        format!(
            "Traffic logger:  {}  {}",
            check(details.traffic_logger.passed),
            details.traffic_logger.detail
        ),
        format!("Validated at:    {}", details.validated_at.to_rfc3339()),
    ]
    .join("\n")
}
