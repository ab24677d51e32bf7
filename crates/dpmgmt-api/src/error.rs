use std::time::Duration;

use thiserror::Error;

/// Which bounded wait of a protocol exchange ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Phase {
    /// DNS, TCP connect, TLS handshake, HTTP handshake.
    Connect,
    /// Writing the request; bounds the gap between accepted writes.
    Send,
    /// Request flushed, waiting for the response head.
    Response,
    /// Streaming the response body; bounds the gap between chunks.
    Read,
}

/// I/O error payload for a stream that went idle for longer than `after`.
///
/// Carried inside `std::io::Error` through body readers and recovered
/// into [`Error::Timeout`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Stalled {
    pub phase: Phase,
    pub after: Duration,
}

impl std::fmt::Display for Stalled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no data for {}ms in {} phase", self.after.as_millis(), self.phase)
    }
}

impl std::error::Error for Stalled {}

impl From<Stalled> for Error {
    fn from(stalled: Stalled) -> Self {
        Self::Timeout {
            phase: stalled.phase,
            after: stalled.after,
        }
    }
}

impl Stalled {
    pub(crate) fn into_io(self) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::TimedOut, self)
    }

    /// The stall carried by `err`, if any.
    pub(crate) fn find(err: &std::io::Error) -> Option<Self> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<Self>())
            .copied()
    }
}

/// Top-level error type for the `dpmgmt-api` crate.
///
/// Covers every failure mode of a management exchange: profile
/// validation, transport, certificate trust, envelope protocol, and
/// local storage. `dpmgmt-core` maps these into poller-level errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Configuration ───────────────────────────────────────────────
    /// Bad profile data (out-of-range port, unparseable URL, bad version string).
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// A bounded wait elapsed before the worker finished.
    #[error("Timed out in {phase} phase after {}ms", .after.as_millis())]
    Timeout { phase: Phase, after: Duration },

    /// Host name could not be resolved.
    #[error("Unknown host: {host}")]
    UnknownHost { host: String },

    /// The appliance actively refused the connection.
    #[error("Connection refused by {address}")]
    ConnectionRefused { address: String },

    /// No route to the appliance (host or network unreachable).
    #[error("No route to host {address}")]
    NoRouteToHost { address: String },

    /// Any other transport failure (reset, HTTP framing, I/O).
    #[error("Transport error: {message}")]
    Transport { message: String },

    // ── Trust ───────────────────────────────────────────────────────
    /// Peer chain failed validation and the profile forbids untrusted peers.
    ///
    /// `description` is the full chain diagnostic, suitable for display.
    #[error("Untrusted certificate presented by the appliance:\n{description}")]
    CertificateRejected { description: String },

    /// A certificate could not be parsed or added to the trust store.
    #[error("Trust configuration error: {message}")]
    TrustConfiguration { message: String },

    // ── Protocol ────────────────────────────────────────────────────
    /// The response stream did not have the expected envelope shape.
    #[error("Malformed response: {message}")]
    MalformedResponse { message: String },

    /// The appliance returned a SOAP fault.
    #[error("Appliance fault: {message}")]
    Fault { message: String },

    /// Credentials were rejected (HTTP 401 or an authentication-failure result).
    #[error("Authentication failure: {message}")]
    AuthenticationFailure { message: String },

    /// The result element carried something other than `OK`.
    #[error("Unexpected result from appliance: {result}")]
    BadResult { result: String },

    // ── Local storage ───────────────────────────────────────────────
    /// Reading or writing a local file failed.
    #[error("File error on {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Returns `true` for connection-level failures.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::UnknownHost { .. }
                | Self::ConnectionRefused { .. }
                | Self::NoRouteToHost { .. }
                | Self::Transport { .. }
        )
    }

    /// Returns `true` for envelope-level failures.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::MalformedResponse { .. }
                | Self::Fault { .. }
                | Self::AuthenticationFailure { .. }
                | Self::BadResult { .. }
        )
    }

    /// Returns `true` if the result element was present but not `OK`.
    pub fn is_bad_result(&self) -> bool {
        matches!(self, Self::BadResult { .. })
    }

    /// Returns `true` if the peer certificate was rejected by the trust store.
    pub fn is_certificate_rejected(&self) -> bool {
        matches!(self, Self::CertificateRejected { .. })
    }

    pub(crate) fn file(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::File {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }
}
