// ── Core error types ──
//
// Protocol and transport errors from dpmgmt-api pass through unchanged
// inside `Api`; the report workflow adds its own terminal outcomes.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Protocol / transport (passed through) ───────────────────────
    #[error(transparent)]
    Api(#[from] dpmgmt_api::Error),

    // ── Report workflow ──────────────────────────────────────────────
    /// The appliance logged the report as failed (twice at the same date).
    #[error("Error report generation failed at {date}: {reason}")]
    ReportFailed { date: String, reason: String },

    /// The retry budget ran out before the report appeared.
    #[error("Error report did not complete after {attempts} polls")]
    ReportTimedOut { attempts: u32 },
}

impl CoreError {
    /// The underlying protocol error, if any.
    pub fn api(&self) -> Option<&dpmgmt_api::Error> {
        match self {
            Self::Api(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::Api(dpmgmt_api::Error::AuthenticationFailure { .. }))
    }

    pub fn is_bad_result(&self) -> bool {
        self.api().is_some_and(dpmgmt_api::Error::is_bad_result)
    }

    pub fn is_transport(&self) -> bool {
        self.api().is_some_and(dpmgmt_api::Error::is_transport)
    }
}
