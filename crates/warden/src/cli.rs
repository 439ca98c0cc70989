//! Clap derive structures for the `warden` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// warden -- firewall stack orchestration for Docker fleets
#[derive(Debug, Parser)]
#[command(
    name = "warden",
    version,
    about = "Manage CrowdSec firewall stacks on remote Docker hosts",
    long_about = "Installs, validates, and repairs the edge firewall stack\n\
        (CrowdSec agent, Traefik log plumbing, traffic-logger sidecar)\n\
        on remote Docker hosts over SSH, and keeps per-application\n\
        firewall rules and IP bans in sync.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config dir)
    #[arg(long, short = 'c', env = "WARDEN_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "WARDEN_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Per-command SSH timeout in seconds (overrides config)
    #[arg(long, env = "WARDEN_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Install stack components on a server
    #[command(alias = "i")]
    Install(InstallArgs),

    /// Remove stack components from a server
    #[command(alias = "rm")]
    Remove(RemoveArgs),

    /// Validate the installed stack end to end
    Validate(ValidateArgs),

    /// Rebuild a drifted or broken log acquisition manifest
    FixAcquis(FixAcquisArgs),

    /// Sync and inspect security alerts
    Alerts(AlertsArgs),

    /// Manage per-application firewalls
    #[command(alias = "fw")]
    Firewall(FirewallArgs),

    /// Deploy rules and IP bans for an application
    Rules(RulesArgs),

    /// Show fleet or per-server stack status
    #[command(alias = "st")]
    Status(StatusArgs),

    /// List country codes usable in geo rules
    Countries,

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  INSTALL
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct InstallArgs {
    #[command(subcommand)]
    pub command: InstallCommand,
}

#[derive(Debug, Subcommand)]
pub enum InstallCommand {
    /// Install the full stack (agent, logging, sidecar) in order
    Stack {
        /// Server name from the inventory
        server: String,

        /// Reinstall even if the stack is already validated
        #[arg(long, short = 'f')]
        force: bool,
    },

    /// Install only the CrowdSec agent with the AppSec component
    Crowdsec {
        /// Server name from the inventory
        server: String,
    },

    /// Switch the proxy to file-based JSON access logs
    AccessLogs {
        /// Server name from the inventory
        server: String,
    },

    /// Enable request/response header capture in the proxy logs
    HeaderCapture {
        /// Server name from the inventory
        server: String,
    },

    /// Point the agent at the proxy access log
    LogIntegration {
        /// Server name from the inventory
        server: String,
    },

    /// Install the traffic-logger sidecar
    TrafficLogger {
        /// Server name from the inventory
        server: String,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  REMOVE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct RemoveArgs {
    #[command(subcommand)]
    pub command: RemoveCommand,
}

#[derive(Debug, Subcommand)]
pub enum RemoveCommand {
    /// Tear down every managed component on a server
    Stack {
        /// Server name from the inventory
        server: String,
    },

    /// Remove the CrowdSec agent and its bouncer wiring
    Crowdsec {
        /// Server name from the inventory
        server: String,
    },

    /// Remove the traffic-logger sidecar
    TrafficLogger {
        /// Server name from the inventory
        server: String,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  VALIDATE / FIX
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Server name from the inventory
    pub server: String,

    /// Attempt an automated repair before reporting failures
    #[arg(long)]
    pub fix: bool,
}

#[derive(Debug, Args)]
pub struct FixAcquisArgs {
    /// Server name from the inventory
    pub server: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  ALERTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct AlertsArgs {
    #[command(subcommand)]
    pub command: AlertsCommand,
}

#[derive(Debug, Subcommand)]
pub enum AlertsCommand {
    /// Pull fresh agent decisions into the local alert log
    Sync {
        /// Sweep a single server instead of the whole fleet
        #[arg(long, short = 's')]
        server: Option<String>,
    },

    /// List recorded alerts, newest first
    #[command(alias = "ls")]
    List {
        /// Only alerts for this application (UUID or name)
        #[arg(long, short = 'a')]
        application: Option<String>,

        /// Max alerts to show
        #[arg(long, short = 'l', default_value = "50")]
        limit: usize,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  FIREWALL
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct FirewallArgs {
    #[command(subcommand)]
    pub command: FirewallCommand,
}

#[derive(Debug, Subcommand)]
pub enum FirewallCommand {
    /// Arm the firewall for an application and deploy its rules
    Enable {
        /// Application UUID or name
        application: String,
    },

    /// Disarm the firewall and strip deployed rules and bans
    Disable {
        /// Application UUID or name
        application: String,
    },

    /// Show firewall state for every application
    Status,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  RULES
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct RulesArgs {
    #[command(subcommand)]
    pub command: RulesCommand,
}

#[derive(Debug, Subcommand)]
pub enum RulesCommand {
    /// Compile and push the application's rule file to its agent
    Deploy {
        /// Application UUID or name
        application: String,
    },

    /// Delete the application's rule file from its agent
    Remove {
        /// Application UUID or name
        application: String,
    },

    /// Convert banned IPs into agent ban decisions
    ApplyBans {
        /// Application UUID or name
        application: String,
    },

    /// Delete this application's ban decisions from the agent
    RemoveBans {
        /// Application UUID or name
        application: String,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  STATUS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Show one server in detail instead of the fleet table
    pub server: Option<String>,

    /// Probe the agents now instead of serving cached health
    #[arg(long, short = 'r')]
    pub refresh: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
