// rustls verifier that enforces a TrustStore snapshot during the handshake.
//
// The handshake never learns anything the store would not: the decision is
// `TrustStore::decide`, host names are ignored, and a rejected chain travels
// back to the transport inside the rustls error so the caller gets the full
// chain description without any shared mutable state.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::{CertificateError, DigitallySignedStruct, OtherError, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tracing::warn;

use super::{TrustDecision, TrustStore};

/// Carried inside `CertificateError::Other` when the store rejects a chain.
#[derive(Debug, thiserror::Error)]
#[error("certificate chain rejected by trust store")]
pub(crate) struct RejectedChain {
    pub description: String,
}

#[derive(Debug)]
pub(super) struct PolicyVerifier {
    store: TrustStore,
}

impl PolicyVerifier {
    pub(super) fn new(store: TrustStore) -> Self {
        Self { store }
    }
}

impl ServerCertVerifier for PolicyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self.store.decide(end_entity, intermediates, now) {
            TrustDecision::Trusted => Ok(ServerCertVerified::assertion()),
            TrustDecision::UntrustedAllowed { description, .. } => {
                warn!(
                    server = %server_name.to_str(),
                    "accepting untrusted appliance certificate\n{description}"
                );
                Ok(ServerCertVerified::assertion())
            }
            TrustDecision::Rejected { description, .. } => Err(rustls::Error::InvalidCertificate(
                CertificateError::Other(OtherError(Arc::new(RejectedChain { description }))),
            )),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.store
            .inner_verifier()
            .verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.store
            .inner_verifier()
            .verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.store.inner_verifier().supported_verify_schemes()
    }
}
