//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use dpmgmt_config::ConfigError;
use dpmgmt_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
    pub const REPORT_FAILED: i32 = 9;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the appliance: {message}")]
    #[diagnostic(
        code(dpmgmt::connection_failed),
        help("Check the host and port (XML management listens on 5550 by default).")
    )]
    ConnectionFailed { message: String },

    #[error("{message}")]
    #[diagnostic(
        code(dpmgmt::timeout),
        help("Raise connect_timeout_ms, response_timeout_ms or read_timeout_secs in the profile or [defaults].")
    )]
    Timeout { message: String },

    #[error("The appliance presented an untrusted certificate")]
    #[diagnostic(
        code(dpmgmt::untrusted_certificate),
        help(
            "{description}\n\n\
             Trust it with: dpmgmt trust add <pem>\n\
             Or pass --allow-untrusted (-k)."
        )
    )]
    UntrustedCertificate { description: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(dpmgmt::auth_failed),
        help("Verify the user name and password.\nRun: dpmgmt config set-password --profile <name>")
    )]
    AuthFailed { message: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(dpmgmt::no_credentials),
        help("Set username in the profile and DPMGMT_PASSWORD, or run: dpmgmt config set-password")
    )]
    NoCredentials { profile: String },

    // ── Appliance ────────────────────────────────────────────────────
    #[error("Appliance error: {message}")]
    #[diagnostic(code(dpmgmt::appliance))]
    Appliance { message: String },

    #[error("Error report failed on the appliance at {date}: {reason}")]
    #[diagnostic(
        code(dpmgmt::report_failed),
        help("Run `dpmgmt notifications` for the appliance's report history.")
    )]
    ReportFailed { date: String, reason: String },

    #[error("Error report was not ready after {attempts} polls")]
    #[diagnostic(
        code(dpmgmt::report_timeout),
        help("Generation may still be running. Retry with: dpmgmt report --poll-only")
    )]
    ReportTimeout { attempts: u32 },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(dpmgmt::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(dpmgmt::profile_not_found),
        help("Available profiles: {available}")
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No appliance configured")]
    #[diagnostic(
        code(dpmgmt::no_config),
        help(
            "Pass --host and --user, or add a profile to the config file.\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(dpmgmt::config))]
    Config { message: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::UntrustedCertificate { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::Timeout { .. } | Self::ReportTimeout { .. } => exit_code::TIMEOUT,
            Self::ReportFailed { .. } => exit_code::REPORT_FAILED,
            Self::Validation { .. } | Self::NoConfig { .. } | Self::ProfileNotFound { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── Api / Core → CliError mapping ────────────────────────────────────

impl From<dpmgmt_api::Error> for CliError {
    fn from(err: dpmgmt_api::Error) -> Self {
        use dpmgmt_api::Error as Api;

        match err {
            Api::Timeout { .. } => CliError::Timeout {
                message: err.to_string(),
            },
            Api::UnknownHost { .. }
            | Api::ConnectionRefused { .. }
            | Api::NoRouteToHost { .. }
            | Api::Transport { .. } => CliError::ConnectionFailed {
                message: err.to_string(),
            },
            Api::CertificateRejected { description } => CliError::UntrustedCertificate { description },
            Api::AuthenticationFailure { message } => CliError::AuthFailed { message },
            Api::Fault { message } => CliError::Appliance { message },
            Api::BadResult { result } => CliError::Appliance { message: result },
            Api::MalformedResponse { .. } | Api::File { .. } => CliError::Appliance {
                message: err.to_string(),
            },
            Api::Configuration { message } => CliError::Validation {
                field: "profile".into(),
                reason: message,
            },
            Api::TrustConfiguration { message } => CliError::Validation {
                field: "certificate".into(),
                reason: message,
            },
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Api(api) => api.into(),
            CoreError::ReportFailed { date, reason } => CliError::ReportFailed { date, reason },
            CoreError::ReportTimedOut { attempts } => CliError::ReportTimeout { attempts },
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::ProfileNotFound { name, available } => CliError::ProfileNotFound {
                name,
                available: if available.is_empty() {
                    "(none)".into()
                } else {
                    available.join(", ")
                },
            },
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config {
                message: other.to_string(),
            },
        }
    }
}
