//! Clap derive structures for the `dpmgmt` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// dpmgmt -- appliance XML management from the command line
#[derive(Debug, Parser)]
#[command(
    name = "dpmgmt",
    version,
    about = "Query appliances and collect error reports over XML management",
    long_about = "Talks to an appliance's XML management interface (port 5550 by default).\n\n\
        Reads status and files, lists the filestore, and drives error-report\n\
        generation through to download.",
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
    /// Appliance profile to use
    #[arg(long, short = 'p', env = "DPMGMT_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Appliance host (overrides profile)
    #[arg(long, short = 'H', env = "DPMGMT_HOST", global = true)]
    pub host: Option<String>,

    /// XML management port (overrides profile)
    #[arg(long, env = "DPMGMT_PORT", global = true)]
    pub port: Option<u16>,

    /// User name (overrides profile)
    #[arg(long, short = 'u', env = "DPMGMT_USER", global = true)]
    pub user: Option<String>,

    /// Application domain for domain-scoped requests
    #[arg(long, short = 'd', env = "DPMGMT_DOMAIN", global = true)]
    pub domain: Option<String>,

    /// Continue when the appliance certificate does not validate
    #[arg(long, short = 'k', env = "DPMGMT_ALLOW_UNTRUSTED", global = true)]
    pub allow_untrusted: bool,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "DPMGMT_OUTPUT",
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
    /// Show firmware version and capability tier
    Version,

    /// Fetch a raw status class (e.g. Version, CPUUsage)
    Status(StatusArgs),

    /// List files in a filestore location
    #[command(alias = "list")]
    Ls(LsArgs),

    /// Download a file from the appliance
    Get(GetArgs),

    /// Show the failure-notification history
    #[command(alias = "notif")]
    Notifications,

    /// Generate an error report and download it
    Report(ReportArgs),

    /// Manage trusted appliance certificates
    Trust(TrustArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Device commands ──────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Status class name
    pub class: String,
}

#[derive(Debug, Args)]
pub struct LsArgs {
    /// Filestore location
    #[arg(default_value = "temporary:")]
    pub location: String,
}

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Appliance file name, e.g. temporary:///error-report.txt.gz
    pub file: String,

    /// Local destination (file or directory)
    #[arg(default_value = ".")]
    pub dest: PathBuf,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Wait for a report already being generated instead of requesting one
    #[arg(long)]
    pub poll_only: bool,

    /// Where to save the report (file or directory)
    #[arg(long = "save-to", short = 's', default_value = ".")]
    pub save_to: PathBuf,

    /// Leave the report on the appliance
    #[arg(long, conflicts_with = "save_to")]
    pub no_download: bool,

    /// Polls before giving up (overrides config)
    #[arg(long)]
    pub retries: Option<u32>,
}

// ── Trust ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct TrustArgs {
    #[command(subcommand)]
    pub command: TrustCommand,
}

#[derive(Debug, Subcommand)]
pub enum TrustCommand {
    /// Validate a PEM certificate and trust it for the active profile
    Add {
        /// PEM file
        pem: PathBuf,
    },
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Display current resolved configuration (passwords redacted)
    Show,

    /// Store the active profile's password in the system keyring (read from stdin)
    SetPassword,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
