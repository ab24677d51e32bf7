// Transport tests against a local TLS appliance stub.
//
// The stub presents a leaf issued by a throwaway CA, answers one HTTP/1.1
// request per connection with a fixed envelope, then closes.
#![allow(clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use rustls::ServerConfig;
use rustls_pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use secrecy::SecretString;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use dpmgmt_api::{
    DeviceProfile, Error, ManagementClient, Phase, Request, ResponseResult, Session, TransportConfig,
    TrustCache, TrustDecision,
};

const OK_ENVELOPE: &str = "<env:Envelope xmlns:env=\"http://schemas.xmlsoap.org/soap/envelope/\">\
    <env:Body><dp:response xmlns:dp=\"http://www.datapower.com/schemas/management\">\
    <dp:result>OK</dp:result></dp:response></env:Body></env:Envelope>";

struct Appliance {
    addr: SocketAddr,
    ca_pem: String,
}

fn server_config() -> (Arc<ServerConfig>, String) {
    let mut ca_params = CertificateParams::default();
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "Stub Appliance CA");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca_key = KeyPair::generate().unwrap();
    let ca = ca_params.self_signed(&ca_key).unwrap();

    let mut leaf_params = CertificateParams::new(vec!["appliance.lab".to_string()]).unwrap();
    leaf_params
        .distinguished_name
        .push(DnType::CommonName, "stub-appliance");
    let leaf_key = KeyPair::generate().unwrap();
    let leaf = leaf_params.signed_by(&leaf_key, &ca, &ca_key).unwrap();

    let config = ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(
            vec![leaf.der().clone()],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der())),
        )
        .unwrap();
    (Arc::new(config), ca.pem())
}

async fn spawn_appliance() -> Appliance {
    let (config, ca_pem) = server_config();
    let acceptor = TlsAcceptor::from(config);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((tcp, _)) = listener.accept().await else {
                return;
            };
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                // a client that rejects the chain aborts the handshake here
                let Ok(mut tls) = acceptor.accept(tcp).await else {
                    return;
                };
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    let n = tls.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        return;
                    }
                    request.extend_from_slice(&buf[..n]);
                    if request_complete(&request) {
                        break;
                    }
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{OK_ENVELOPE}",
                    OK_ENVELOPE.len()
                );
                let _ = tls.write_all(response.as_bytes()).await;
                let _ = tls.shutdown().await;
            });
        }
    });

    Appliance { addr, ca_pem }
}

fn request_complete(raw: &[u8]) -> bool {
    let text = String::from_utf8_lossy(raw);
    let Some(head_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let length = text[..head_end]
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    raw.len() >= head_end + 4 + length
}

fn profile(addr: SocketAddr) -> DeviceProfile {
    DeviceProfile::new(
        addr.ip().to_string(),
        addr.port(),
        "admin",
        SecretString::from("secret".to_string()),
    )
}

fn transport() -> TransportConfig {
    TransportConfig {
        connect_timeout: Duration::from_secs(5),
        response_timeout: Duration::from_secs(5),
        ..TransportConfig::default()
    }
}

// ── Trust ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_added_anchor_is_trusted() {
    let appliance = spawn_appliance().await;
    let mut profile = profile(appliance.addr);
    profile.certificate_pem = Some(appliance.ca_pem.clone());

    let trust = TrustCache::for_profile(&profile).unwrap();
    let url = profile.management_url().unwrap();
    let session = Session::open(&url, &trust, &transport()).await.unwrap();
    assert_eq!(session.trust_decision(), Some(&TrustDecision::Trusted));

    let result = session
        .send(&Request::do_action("<SaveConfig/>"), &(&profile).into())
        .await
        .unwrap();
    assert!(matches!(result, ResponseResult::Text(ref t) if t == "OK"));
}

#[tokio::test]
async fn test_unknown_chain_is_rejected_and_cache_invalidated() {
    let appliance = spawn_appliance().await;
    let client = ManagementClient::new(profile(appliance.addr), transport()).unwrap();

    let err = client.save_config().await.unwrap_err();
    match err {
        Error::CertificateRejected { description } => {
            assert!(description.contains("CN=stub-appliance"), "{description}");
            assert!(description.contains("Not after"));
        }
        other => panic!("expected CertificateRejected, got {other:?}"),
    }
    assert!(!client.trust().is_cached());

    // trusting the CA afterwards makes the next exchange succeed
    client.trust().add_certificate(&appliance.ca_pem).unwrap();
    client.save_config().await.unwrap();
}

#[tokio::test]
async fn test_untrusted_allowed_by_policy() {
    let appliance = spawn_appliance().await;
    let mut profile = profile(appliance.addr);
    profile.allow_untrusted = true;

    let trust = TrustCache::for_profile(&profile).unwrap();
    let session = Session::open(&profile.management_url().unwrap(), &trust, &transport())
        .await
        .unwrap();
    match session.trust_decision() {
        Some(TrustDecision::UntrustedAllowed { description, .. }) => {
            assert!(description.contains("Stub Appliance CA"));
        }
        other => panic!("expected UntrustedAllowed, got {other:?}"),
    }

    let client = ManagementClient::new(profile, transport()).unwrap();
    client.save_config().await.unwrap();
}

// ── Connection failures ─────────────────────────────────────────────

#[tokio::test]
async fn test_silent_endpoint_times_out_in_connect_phase() {
    // accepts TCP via the backlog but never speaks TLS
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let client = ManagementClient::new(
        profile(addr),
        TransportConfig {
            connect_timeout: Duration::from_millis(300),
            ..TransportConfig::default()
        },
    )
    .unwrap();

    let started = Instant::now();
    let err = client.save_config().await.unwrap_err();
    assert!(
        matches!(err, Error::Timeout { phase: Phase::Connect, after } if after == Duration::from_millis(300)),
        "{err:?}"
    );
    assert!(started.elapsed() < Duration::from_secs(2));
    drop(listener);
}

#[tokio::test]
async fn test_closed_port_is_connection_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = ManagementClient::new(profile(addr), transport()).unwrap();
    let err = client.save_config().await.unwrap_err();
    assert!(matches!(err, Error::ConnectionRefused { .. }), "{err:?}");
    assert!(err.is_transport());
}
