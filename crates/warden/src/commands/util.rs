//! Shared helpers for command handlers.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use indicatif::ProgressBar;
use tabled::Tabled;
use warden_core::model::{Application, Server};
use warden_core::store::FleetStore;
use warden_core::InstallReport;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;
use crate::session::Session;

/// Resolve a server by its inventory name.
pub fn resolve_server(store: &FleetStore, name: &str) -> Result<Arc<Server>, CliError> {
    store.server(name).ok_or_else(|| CliError::NotFound {
        resource_type: "server".into(),
        identifier: name.into(),
        list_command: "status".into(),
    })
}

/// Resolve an application identifier (UUID or name) via store lookup.
pub fn resolve_application(
    store: &FleetStore,
    identifier: &str,
) -> Result<Arc<Application>, CliError> {
    let apps = store.applications();
    for app in apps.iter() {
        if app.uuid.to_string() == identifier || app.name == identifier {
            return Ok(Arc::clone(app));
        }
    }
    Err(CliError::NotFound {
        resource_type: "application".into(),
        identifier: identifier.into(),
        list_command: "firewall status".into(),
    })
}

/// Prompt for confirmation, auto-approving if `--yes` was passed.
/// Refuses outright when stdin is not a terminal, since the prompt
/// could never be answered.
pub fn confirm(message: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        return Err(CliError::NonInteractiveRequiresYes {
            action: message.into(),
        });
    }
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))?;
    Ok(confirmed)
}

/// Run every queued job to completion, with a spinner reporting how
/// much work is still outstanding. Stack installs dispatch on a spread
/// schedule, so this legitimately takes minutes.
pub async fn drain_queue(session: &Session, quiet: bool, label: &str) {
    let spinner = if quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new_spinner();
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    };
    spinner.set_message(label.to_owned());

    let queue = session.orchestrator.queue();
    tokio::select! {
        () = session.orchestrator.run_until_idle() => {}
        () = async {
            let mut tick = tokio::time::interval(Duration::from_millis(500));
            loop {
                tick.tick().await;
                spinner.set_message(format!("{label} ({} job(s) outstanding)", queue.pending()));
            }
        } => {}
    }
    spinner.finish_and_clear();
}

// ── Install report rendering ─────────────────────────────────────────

/// Table row for multi-report listings (`remove stack`).
#[derive(Tabled)]
pub struct ReportRow {
    #[tabled(rename = "Component")]
    pub component: String,
    #[tabled(rename = "Phase")]
    pub phase: String,
    #[tabled(rename = "Steps")]
    pub steps: usize,
    #[tabled(rename = "Warnings")]
    pub warnings: usize,
}

impl From<&InstallReport> for ReportRow {
    fn from(report: &InstallReport) -> Self {
        Self {
            component: report.component.to_string(),
            phase: report.phase.to_string(),
            steps: report.steps.len(),
            warnings: report.warnings.len(),
        }
    }
}

/// Multi-line detail view of one report.
pub fn report_detail(report: &InstallReport) -> String {
    let mut lines = vec![
        format!("Component: {}", report.component),
        format!("Phase:     {}", report.phase),
    ];
    if !report.steps.is_empty() {
        lines.push("Steps:".to_owned());
        lines.extend(report.steps.iter().map(|step| format!("  - {step}")));
    }
    for warning in &report.warnings {
        lines.push(format!("Warning:   {warning}"));
    }
    lines.join("\n")
}

/// Render and print one install report in the selected format.
pub fn print_report(report: &InstallReport, global: &GlobalOpts) {
    let rendered = output::render_single(&global.output, report, report_detail, |r| {
        format!("{}: {}", r.component, r.phase)
    });
    output::print_output(&rendered, global.quiet);
}
