// Management client
//
// Owns one device profile, its trust cache and transport deadlines. Every
// call is one `Session`: open, send, frame, close. Typed operations live in
// the sibling modules as inherent methods, keeping this file to the
// exchange plumbing.

pub mod actions;
mod files;
pub mod status;

use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use crate::envelope::{Request, ResponsePayload, ResponseResult};
use crate::error::Error;
use crate::profile::DeviceProfile;
use crate::transport::{Credentials, Session, TransportConfig};
use crate::trust::{TrustCache, TrustDecision};

/// Result text the appliance returns for a successful command.
pub const RESULT_OK: &str = "OK";

const AUTHENTICATION_FAILURE: &str = "Authentication failure";

/// Client for one appliance's XML management interface.
pub struct ManagementClient {
    profile: DeviceProfile,
    url: Url,
    credentials: Credentials,
    trust: Arc<TrustCache>,
    transport: TransportConfig,
}

impl ManagementClient {
    /// Client with a fresh trust cache seeded from the profile.
    pub fn new(profile: DeviceProfile, transport: TransportConfig) -> Result<Self, Error> {
        let trust = Arc::new(TrustCache::for_profile(&profile)?);
        Self::with_trust(profile, transport, trust)
    }

    /// Client sharing an existing trust cache.
    pub fn with_trust(
        profile: DeviceProfile,
        transport: TransportConfig,
        trust: Arc<TrustCache>,
    ) -> Result<Self, Error> {
        let url = profile.management_url()?;
        let credentials = Credentials::from(&profile);
        Ok(Self {
            profile,
            url,
            credentials,
            trust,
            transport,
        })
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn trust(&self) -> &Arc<TrustCache> {
        &self.trust
    }

    pub fn transport(&self) -> &TransportConfig {
        &self.transport
    }

    // ── Exchange helpers ─────────────────────────────────────────────

    /// One request/response exchange on a fresh session.
    ///
    /// A rejected peer certificate invalidates the cached TLS
    /// configuration before the error is returned.
    pub async fn exchange(&self, request: &Request) -> Result<ResponseResult, Error> {
        let session = match Session::open(&self.url, &self.trust, &self.transport).await {
            Ok(session) => session,
            Err(err) => {
                if err.is_certificate_rejected() {
                    warn!(host = %self.profile.host, "peer certificate rejected");
                    self.trust.invalidate();
                }
                return Err(err);
            }
        };
        if let Some(TrustDecision::UntrustedAllowed { description, .. }) = session.trust_decision() {
            debug!(host = %self.profile.host, "untrusted peer accepted by policy\n{description}");
        }
        session.send(request, &self.credentials).await
    }

    /// Request scoped to the profile's default domain when unscoped.
    pub(crate) fn scoped(&self, request: Request) -> Request {
        request.or_domain(self.profile.domain.as_deref())
    }

    /// Exchange expecting a content payload.
    ///
    /// A result element instead of content becomes `BadResult`, or
    /// `AuthenticationFailure` when it says so.
    pub(crate) async fn exchange_payload(&self, request: &Request) -> Result<ResponsePayload, Error> {
        self.exchange(request)
            .await?
            .into_payload()
            .map_err(|err| match err {
                Error::BadResult { result } if is_authentication_failure(&result) => {
                    Error::AuthenticationFailure { message: result }
                }
                other => other,
            })
    }

    /// Exchange expecting the result element; returns its raw text.
    pub async fn exchange_result(&self, request: &Request) -> Result<String, Error> {
        self.exchange(request).await?.into_text()
    }

    /// Exchange expecting the result text `OK`.
    pub(crate) async fn exchange_ok(&self, request: &Request) -> Result<(), Error> {
        check_result(self.exchange_result(request).await?)
    }
}

/// Map result text to success, authentication failure or `BadResult`.
pub fn check_result(result: String) -> Result<(), Error> {
    if result == RESULT_OK {
        Ok(())
    } else if is_authentication_failure(&result) {
        Err(Error::AuthenticationFailure { message: result })
    } else {
        Err(Error::BadResult { result })
    }
}

fn is_authentication_failure(result: &str) -> bool {
    result.contains(AUTHENTICATION_FAILURE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_text_classification() {
        assert!(check_result("OK".into()).is_ok());
        assert!(matches!(
            check_result("Authentication failure".into()),
            Err(Error::AuthenticationFailure { .. })
        ));
        assert!(matches!(
            check_result("Bad request".into()),
            Err(Error::BadResult { ref result }) if result == "Bad request"
        ));
    }
}
