//! Certificate trust policy for appliance connections.
//!
//! The appliance usually presents a self-signed identity certificate, and
//! its certificates rarely carry a usable host name. Trust is therefore
//! decided here, by chain validation against an accumulating anchor set,
//! and never by host name matching.
//!
//! - [`TrustStore`] holds the anchors and evaluates a peer chain into a
//!   [`TrustDecision`].
//! - [`TrustCache`] owns a store plus the TLS client configuration derived
//!   from it, and is invalidated whenever a certificate is added or a peer
//!   is rejected.

mod anchors;
mod cache;
mod verifier;

use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::ServerCertVerifier;
use rustls::crypto::CryptoProvider;
use rustls::{CertificateError, ClientConfig, RootCertStore};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tracing::debug;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::Error;
use crate::profile::DeviceProfile;

pub use cache::TrustCache;
pub(crate) use verifier::RejectedChain;

/// Outcome of evaluating a peer certificate chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustDecision {
    /// The chain validates against an accumulated anchor.
    Trusted,
    /// The chain is invalid but the profile accepts untrusted peers.
    UntrustedAllowed {
        certificate: CertificateDer<'static>,
        description: String,
    },
    /// The chain is invalid and the profile forbids untrusted peers.
    Rejected {
        certificate: CertificateDer<'static>,
        description: String,
    },
}

impl TrustDecision {
    pub fn is_trusted(&self) -> bool {
        matches!(self, Self::Trusted)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Chain diagnostic text, empty for trusted chains.
    pub fn description(&self) -> &str {
        match self {
            Self::Trusted => "",
            Self::UntrustedAllowed { description, .. } | Self::Rejected { description, .. } => {
                description
            }
        }
    }
}

/// Accumulating set of trust anchors plus the untrusted-peer policy.
///
/// Starts with the platform default anchors and whichever appliance
/// default certificates were embedded at build time. Grows through [`add_certificate`](Self::add_certificate);
/// nothing is ever removed.
#[derive(Debug, Clone)]
pub struct TrustStore {
    roots: RootCertStore,
    added: Vec<CertificateDer<'static>>,
    verifier: Arc<WebPkiServerVerifier>,
    provider: Arc<CryptoProvider>,
    allow_untrusted: bool,
}

impl TrustStore {
    /// Platform anchors plus the embedded appliance defaults.
    pub fn new(allow_untrusted: bool) -> Result<Self, Error> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        for &(label, pem) in anchors::BUNDLED {
            let der = parse_pem(pem)?;
            roots.add(der).map_err(|e| Error::TrustConfiguration {
                message: format!("bundled anchor {label} rejected: {e}"),
            })?;
        }

        let verifier = build_verifier(&roots, &provider)?;
        debug!(anchors = roots.len(), "trust store initialised");

        Ok(Self {
            roots,
            added: Vec::new(),
            verifier,
            provider,
            allow_untrusted,
        })
    }

    /// Store for a device profile: defaults plus the profile certificate, if any.
    pub fn for_profile(profile: &DeviceProfile) -> Result<Self, Error> {
        let mut store = Self::new(profile.allow_untrusted)?;
        if let Some(ref pem) = profile.certificate_pem {
            store.add_certificate(pem)?;
        }
        Ok(store)
    }

    /// Parse one PEM certificate, trust it, and rebuild the verifier.
    pub fn add_certificate(&mut self, pem: &str) -> Result<(), Error> {
        let der = parse_pem(pem.as_bytes())?;
        self.roots
            .add(der.clone())
            .map_err(|e| Error::TrustConfiguration {
                message: format!("certificate cannot be used as a trust anchor: {e}"),
            })?;
        self.verifier = build_verifier(&self.roots, &self.provider)?;
        self.added.push(der);
        debug!(anchors = self.roots.len(), "certificate added to trust store");
        Ok(())
    }

    /// Whether invalid chains are accepted (and flagged) instead of rejected.
    pub fn allow_untrusted(&self) -> bool {
        self.allow_untrusted
    }

    /// Number of anchors, platform defaults included.
    pub fn anchor_count(&self) -> usize {
        self.roots.len()
    }

    /// Certificates added after construction, in insertion order.
    pub fn added_certificates(&self) -> &[CertificateDer<'static>] {
        &self.added
    }

    /// Validate a peer chain (end entity first) against the anchors.
    pub fn evaluate(&self, chain: &[CertificateDer<'_>]) -> TrustDecision {
        let Some((end_entity, intermediates)) = chain.split_first() else {
            return TrustDecision::Rejected {
                certificate: CertificateDer::from(Vec::new()),
                description: "peer presented no certificates".into(),
            };
        };
        self.decide(end_entity, intermediates, UnixTime::now())
    }

    pub(crate) fn decide(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> TrustDecision {
        let Err(err) = self.verify_chain(end_entity, intermediates, now) else {
            return TrustDecision::Trusted;
        };

        let mut chain = Vec::with_capacity(intermediates.len() + 1);
        chain.push(end_entity.clone().into_owned());
        chain.extend(intermediates.iter().map(|c| c.clone().into_owned()));
        let description = describe_chain(&chain, &err.to_string());
        let certificate = end_entity.clone().into_owned();

        if self.allow_untrusted {
            TrustDecision::UntrustedAllowed {
                certificate,
                description,
            }
        } else {
            TrustDecision::Rejected {
                certificate,
                description,
            }
        }
    }

    /// Chain validation with the host name check neutralised.
    fn verify_chain(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<(), rustls::Error> {
        let placeholder = ServerName::from(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        match self
            .verifier
            .verify_server_cert(end_entity, intermediates, &placeholder, &[], now)
        {
            Ok(_) => Ok(()),
            Err(err) if is_name_mismatch(&err) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub(crate) fn inner_verifier(&self) -> &Arc<WebPkiServerVerifier> {
        &self.verifier
    }

    /// TLS client configuration enforcing this store's policy.
    pub(crate) fn client_config(&self) -> Result<ClientConfig, Error> {
        let verifier = Arc::new(verifier::PolicyVerifier::new(self.clone()));
        let config = ClientConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::TrustConfiguration {
                message: format!("unsupported TLS protocol set: {e}"),
            })?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();
        Ok(config)
    }
}

fn build_verifier(
    roots: &RootCertStore,
    provider: &Arc<CryptoProvider>,
) -> Result<Arc<WebPkiServerVerifier>, Error> {
    WebPkiServerVerifier::builder_with_provider(Arc::new(roots.clone()), Arc::clone(provider))
        .build()
        .map_err(|e| Error::TrustConfiguration {
            message: format!("failed to build certificate verifier: {e}"),
        })
}

fn parse_pem(pem: &[u8]) -> Result<CertificateDer<'static>, Error> {
    CertificateDer::from_pem_slice(pem).map_err(|e| Error::TrustConfiguration {
        message: format!("failed to parse PEM certificate: {e}"),
    })
}

fn is_name_mismatch(err: &rustls::Error) -> bool {
    matches!(
        err,
        rustls::Error::InvalidCertificate(
            CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. }
        )
    )
}

/// Human-readable chain dump: subject, issuer, validity window and serial
/// for every certificate, preceded by the validation failure.
pub fn describe_chain(chain: &[CertificateDer<'_>], reason: &str) -> String {
    let mut out = format!("Reason: {reason}\n");
    let total = chain.len();
    for (index, der) in chain.iter().enumerate() {
        let _ = writeln!(out, "Certificate {} of {total}", index + 1);
        match X509Certificate::from_der(der.as_ref()) {
            Ok((_, cert)) => {
                let tbs = &cert.tbs_certificate;
                let _ = writeln!(out, "  Subject:    {}", tbs.subject);
                let _ = writeln!(out, "  Issuer:     {}", tbs.issuer);
                let _ = writeln!(out, "  Not before: {}", tbs.validity.not_before);
                let _ = writeln!(out, "  Not after:  {}", tbs.validity.not_after);
                let _ = writeln!(out, "  Serial:     {}", tbs.raw_serial_as_string());
            }
            Err(e) => {
                let _ = writeln!(out, "  <unparseable certificate: {e}>");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};

    use super::*;

    struct Issued {
        ca_pem: String,
        leaf: CertificateDer<'static>,
    }

    fn issue(common_name: &str) -> Issued {
        let mut ca_params = CertificateParams::default();
        ca_params
            .distinguished_name
            .push(DnType::CommonName, format!("{common_name} CA"));
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca_key = KeyPair::generate().unwrap();
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let mut leaf_params = CertificateParams::new(vec!["appliance.local".to_string()]).unwrap();
        leaf_params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        let leaf_key = KeyPair::generate().unwrap();
        let leaf = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key).unwrap();

        Issued {
            ca_pem: ca_cert.pem(),
            leaf: leaf.der().clone(),
        }
    }

    #[test]
    fn starts_with_platform_and_bundled_anchors() {
        let store = TrustStore::new(false).unwrap();
        assert_eq!(
            store.anchor_count(),
            webpki_roots::TLS_SERVER_ROOTS.len() + anchors::BUNDLED.len()
        );
        assert!(store.added_certificates().is_empty());
    }

    #[test]
    fn added_certificate_makes_chain_trusted() {
        let issued = issue("xi52");
        let mut store = TrustStore::new(false).unwrap();
        assert!(store.evaluate(std::slice::from_ref(&issued.leaf)).is_rejected());

        store.add_certificate(&issued.ca_pem).unwrap();
        assert_eq!(
            store.evaluate(std::slice::from_ref(&issued.leaf)),
            TrustDecision::Trusted
        );
        assert_eq!(store.added_certificates().len(), 1);
    }

    #[test]
    fn host_name_is_not_checked() {
        // leaf is issued for appliance.local, evaluation never supplies that name
        let issued = issue("renamed");
        let mut store = TrustStore::new(false).unwrap();
        store.add_certificate(&issued.ca_pem).unwrap();
        assert!(store.evaluate(&[issued.leaf]).is_trusted());
    }

    #[test]
    fn untrusted_policy_flags_instead_of_rejecting() {
        let issued = issue("flagged");

        let strict = TrustStore::new(false).unwrap();
        let TrustDecision::Rejected {
            certificate: rejected,
            ..
        } = strict.evaluate(std::slice::from_ref(&issued.leaf))
        else {
            panic!("expected Rejected");
        };

        let lenient = TrustStore::new(true).unwrap();
        match lenient.evaluate(std::slice::from_ref(&issued.leaf)) {
            TrustDecision::UntrustedAllowed {
                certificate,
                description,
            } => {
                assert_eq!(certificate, rejected);
                assert!(description.contains("CN=flagged"), "{description}");
                assert!(description.contains("Issuer:"));
                assert!(description.contains("Serial:"));
            }
            other => panic!("expected UntrustedAllowed, got {other:?}"),
        }
    }

    #[test]
    fn empty_chain_is_rejected() {
        let store = TrustStore::new(true).unwrap();
        assert!(store.evaluate(&[]).is_rejected());
    }

    #[test]
    fn malformed_pem_is_a_configuration_error() {
        let mut store = TrustStore::new(false).unwrap();
        let err = store.add_certificate("-----BEGIN NOTHING-----").unwrap_err();
        assert!(matches!(err, Error::TrustConfiguration { .. }));
    }

    #[test]
    fn profile_certificate_is_added() {
        let issued = issue("profiled");
        let mut profile = DeviceProfile::new(
            "10.0.0.1",
            5550,
            "admin",
            secrecy::SecretString::from("x".to_string()),
        );
        profile.certificate_pem = Some(issued.ca_pem);
        let store = TrustStore::for_profile(&profile).unwrap();
        assert!(store.evaluate(&[issued.leaf]).is_trusted());
    }
}
