//! CLI error types with miette diagnostics.
//!
//! Maps `ComponentError` variants into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use warden_config::ConfigError;
use warden_core::ComponentError;
use warden_remote::RemoteError;

/// Exit codes, stable for scripting.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const PRECONDITION: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const VERIFICATION: i32 = 5;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Cannot reach `{host}`: {detail}")]
    #[diagnostic(
        code(warden::unreachable),
        help(
            "Check SSH connectivity by hand: ssh <user>@{host}\n\
             Verify the address, port and identity_file in the server's config entry."
        )
    )]
    Unreachable { host: String, detail: String },

    #[error("Remote operation on `{host}` timed out after {seconds}s")]
    #[diagnostic(
        code(warden::timeout),
        help("Increase --timeout or ssh.command_timeout_secs in the config.")
    )]
    Timeout { host: String, seconds: u64 },

    #[error("Remote execution failed: {detail}")]
    #[diagnostic(
        code(warden::remote),
        help("Re-run with -vv to see each remote step as it executes.")
    )]
    Remote { detail: String },

    // ── Stack state ──────────────────────────────────────────────────

    #[error("Precondition not met for {component}: {reason}")]
    #[diagnostic(
        code(warden::precondition),
        help("Run: warden status <server> to see what is installed where.")
    )]
    Precondition { component: String, reason: String },

    #[error("Verification failed for {component} at {step}: {detail}")]
    #[diagnostic(
        code(warden::verification),
        help(
            "The change was applied but could not be confirmed on the host.\n\
             Run: warden validate <server> --fix to re-check and repair."
        )
    )]
    Verification {
        component: String,
        step: String,
        detail: String,
    },

    #[error("Conflict: {detail}")]
    #[diagnostic(code(warden::conflict))]
    Conflict { detail: String },

    #[error("Stack on `{server}` is already installed and validated")]
    #[diagnostic(
        code(warden::already_installed),
        help("Pass --force to run the installers again anyway.")
    )]
    AlreadyInstalled { server: String },

    #[error("Stack on `{server}` failed validation: {components}")]
    #[diagnostic(
        code(warden::stack_unhealthy),
        help(
            "Run: warden validate {server} --fix to attempt an automated repair,\n\
             or warden status {server} --refresh for a live health probe."
        )
    )]
    StackUnhealthy { server: String, components: String },

    // ── Resources ────────────────────────────────────────────────────

    #[error("{resource_type} `{identifier}` not found")]
    #[diagnostic(
        code(warden::not_found),
        help("Run: warden {list_command} to see what the config declares.")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── Agent API ────────────────────────────────────────────────────

    #[error("Agent API error: {detail}")]
    #[diagnostic(code(warden::api))]
    Api { detail: String },

    #[error("Could not parse {context}: {detail}")]
    #[diagnostic(code(warden::parse))]
    Parse { context: String, detail: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(warden::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Config file not found: {path}")]
    #[diagnostic(
        code(warden::no_config),
        help("Create it, or drop -c/--config to use the platform default location.")
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(warden::config))]
    Config(#[from] ConfigError),

    // ── Interactive ──────────────────────────────────────────────────

    #[error("Destructive operation '{action}' requires confirmation")]
    #[diagnostic(
        code(warden::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── IO ───────────────────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Unreachable { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Precondition { .. } => exit_code::PRECONDITION,
            Self::Verification { .. } | Self::StackUnhealthy { .. } => exit_code::VERIFICATION,
            Self::Conflict { .. } | Self::AlreadyInstalled { .. } => exit_code::CONFLICT,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. }
            | Self::NoConfig { .. }
            | Self::NonInteractiveRequiresYes { .. } => exit_code::USAGE,
            Self::Config(ConfigError::Validation { .. }) => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ComponentError → CliError mapping ────────────────────────────────

impl From<ComponentError> for CliError {
    fn from(err: ComponentError) -> Self {
        match err {
            ComponentError::Precondition { component, reason } => {
                CliError::Precondition { component, reason }
            }

            ComponentError::Verification {
                component,
                step,
                detail,
            } => CliError::Verification {
                component,
                step,
                detail,
            },

            ComponentError::Conflict(conflict) => CliError::Conflict {
                detail: conflict.to_string(),
            },

            ComponentError::Remote(remote) => remote.into(),

            ComponentError::Parse { context, detail } => CliError::Parse { context, detail },

            ComponentError::Lapi(api) => CliError::Api {
                detail: api.to_string(),
            },
        }
    }
}

impl From<RemoteError> for CliError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unreachable { host, detail } => CliError::Unreachable { host, detail },

            RemoteError::Timeout { host, timeout_secs } => CliError::Timeout {
                host,
                seconds: timeout_secs,
            },

            other => CliError::Remote {
                detail: other.to_string(),
            },
        }
    }
}
