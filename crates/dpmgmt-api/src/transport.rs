// Connection and exchange mechanics.
//
// One `Session` per exchange: open a connection (DNS, TCP, TLS, HTTP/1.1
// handshake), send one POST, frame one response, close. The connect and
// response-head waits each run on a spawned worker that is joined under a
// deadline. On expiry the worker is detached, not cancelled, and its result
// is only ever delivered through the join handle. The connect worker bounds
// itself by `read_timeout`; the exchange worker ends when the session drops
// the connection driver.
//
// The response-head deadline starts once the request has been flushed.
// Writing the request and streaming the response body are bounded by
// `read_timeout` as idle gaps, so large transfers on a slow but live link
// are not cut off.

mod upload;

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::header::{AUTHORIZATION, CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::client::conn::http1::SendRequest;
use hyper_util::rt::TokioIo;
use rustls::{CertificateError, ClientConfig};
use rustls_pki_types::{CertificateDer, ServerName};
use secrecy::SecretString;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};
use url::Url;

use crate::codec;
use crate::envelope::{Request, RequestEnvelope, ResponseFrame, ResponseResult};
use crate::error::{Error, Phase, Stalled};
use crate::profile::DeviceProfile;
use crate::trust::{RejectedChain, TrustCache, TrustDecision};

use self::upload::{Progress, RequestBody, Tracked, UploadTracker};

const USER_AGENT_VALUE: &str = concat!("dpmgmt/", env!("CARGO_PKG_VERSION"));

/// Deadlines and scratch storage for management exchanges.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Bound on DNS + TCP + TLS + HTTP handshake.
    pub connect_timeout: Duration,
    /// Bound on waiting for the response head once the request is flushed.
    pub response_timeout: Duration,
    /// Longest gap between request writes or response body chunks. Also
    /// bounds a detached connect worker.
    pub read_timeout: Duration,
    /// Directory for spooled response payloads. System temp dir if unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(1200),
            response_timeout: Duration::from_millis(1200),
            read_timeout: Duration::from_secs(60),
            scratch_dir: None,
        }
    }
}

impl TransportConfig {
    fn frame(&self) -> ResponseFrame {
        self.scratch_dir
            .as_ref()
            .map_or_else(ResponseFrame::default, ResponseFrame::new)
    }
}

/// Username and password sent as HTTP basic authentication.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl From<&DeviceProfile> for Credentials {
    fn from(profile: &DeviceProfile) -> Self {
        Self {
            username: profile.username.clone(),
            password: profile.password.clone(),
        }
    }
}

// ── Session ──────────────────────────────────────────────────────────

/// Aborts the HTTP connection driver when dropped.
struct DriverGuard(JoinHandle<()>);

impl Drop for DriverGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Connection {
    sender: SendRequest<RequestBody>,
    driver: DriverGuard,
    upload: UploadTracker,
    peer_chain: Option<Vec<CertificateDer<'static>>>,
}

/// An open connection to one appliance, good for exactly one exchange.
///
/// Dropping the session closes the connection.
pub struct Session {
    url: Url,
    connection: Connection,
    trust_decision: Option<TrustDecision>,
    config: TransportConfig,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("url", &self.url.as_str())
            .field("trust_decision", &self.trust_decision)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Connect to the management endpoint at `url`.
    ///
    /// `https` URLs handshake with the TLS configuration from `trust`;
    /// `http` URLs connect in the clear.
    pub async fn open(url: &Url, trust: &TrustCache, config: &TransportConfig) -> Result<Self, Error> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::config(format!("management URL {url} has no host")))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_owned();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::config(format!("management URL {url} has no port")))?;
        let tls = match url.scheme() {
            "https" => Some(trust.client_config()?),
            "http" => None,
            other => return Err(Error::config(format!("unsupported scheme '{other}'"))),
        };

        debug!(%host, port, tls = tls.is_some(), "connecting");
        let self_limit = config.read_timeout;
        let worker = tokio::spawn(async move {
            tokio::time::timeout(self_limit, establish(host, port, tls))
                .await
                .unwrap_or(Err(Error::Timeout {
                    phase: Phase::Connect,
                    after: self_limit,
                }))
        });
        let connection = bounded(Phase::Connect, config.connect_timeout, worker).await?;

        let trust_decision = connection.peer_chain.as_deref().map(|chain| trust.evaluate(chain));
        if let Some(TrustDecision::UntrustedAllowed { .. }) = trust_decision {
            warn!(url = %url, "session established with an untrusted certificate");
        }

        Ok(Self {
            url: url.clone(),
            connection,
            trust_decision,
            config: config.clone(),
        })
    }

    /// Trust decision for the peer chain, `None` for plain HTTP.
    pub fn trust_decision(&self) -> Option<&TrustDecision> {
        self.trust_decision.as_ref()
    }

    /// Send one request and frame its response. Consumes the session.
    pub async fn send(self, request: &Request, credentials: &Credentials) -> Result<ResponseResult, Error> {
        let Self {
            url,
            connection,
            config,
            ..
        } = self;
        let Connection {
            sender,
            driver: _driver,
            upload,
            ..
        } = connection;

        let envelope = RequestEnvelope::build(request);
        let authority = match url.port() {
            Some(port) => format!("{}:{port}", url.host_str().unwrap_or_default()),
            None => url.host_str().unwrap_or_default().to_owned(),
        };
        let http_request = http::Request::builder()
            .method(Method::POST)
            .uri(url.path())
            .header(HOST, authority)
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header(AUTHORIZATION, codec::basic_auth(&credentials.username, &credentials.password))
            .header(USER_AGENT, USER_AGENT_VALUE)
            .body(RequestBody::new(envelope, upload.clone()))
            .map_err(|e| Error::Transport {
                message: format!("building request: {e}"),
            })?;

        debug!(operation = %request.operation(), domain = ?request.domain(), "sending request");
        let mut progress = upload.subscribe();
        let mut worker = tokio::spawn(exchange_head(sender, http_request));
        let head = match wait_for_upload(&mut progress, &mut worker, config.read_timeout).await? {
            Some(early) => early,
            None => bounded(Phase::Response, config.response_timeout, worker).await?,
        };
        let (_sender, response) = head;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::AuthenticationFailure {
                message: "appliance rejected the credentials (HTTP 401)".into(),
            });
        }
        debug!(%status, "response head received");

        let body = StreamReader::new(Box::pin(idle_bounded(
            response.into_body().into_data_stream(),
            config.read_timeout,
        )));
        let framed = config.frame().parse(body).await;

        match framed {
            Err(Error::MalformedResponse { message }) if !status.is_success() => Err(Error::Transport {
                message: format!("HTTP {status} without a management envelope ({message})"),
            }),
            other => other,
        }
    }
}

/// Join `worker` under `deadline`. On expiry the worker is detached.
async fn bounded<T>(phase: Phase, deadline: Duration, worker: JoinHandle<Result<T, Error>>) -> Result<T, Error> {
    match tokio::time::timeout(deadline, worker).await {
        Ok(joined) => joined_outcome(phase, joined),
        Err(_) => {
            debug!(%phase, deadline_ms = deadline.as_millis(), "bounded wait expired");
            Err(Error::Timeout { phase, after: deadline })
        }
    }
}

fn joined_outcome<T>(phase: Phase, joined: Result<Result<T, Error>, tokio::task::JoinError>) -> Result<T, Error> {
    joined.unwrap_or_else(|join| {
        Err(Error::Transport {
            message: format!("{phase} worker failed: {join}"),
        })
    })
}

/// Wait until every request byte has been flushed.
///
/// Returns the worker's outcome instead when the exchange finishes first
/// (the appliance may answer before reading the whole body). Fails with a
/// `Send` timeout when no write is accepted for `idle`.
async fn wait_for_upload<T>(
    progress: &mut watch::Receiver<Progress>,
    worker: &mut JoinHandle<Result<T, Error>>,
    idle: Duration,
) -> Result<Option<T>, Error> {
    loop {
        let state = *progress.borrow_and_update();
        if state.sent {
            debug!(bytes = state.written, "request flushed");
            return Ok(None);
        }
        tokio::select! {
            joined = &mut *worker => return joined_outcome(Phase::Send, joined).map(Some),
            changed = tokio::time::timeout(idle, progress.changed()) => match changed {
                Ok(Ok(())) => {}
                // tracker gone with the connection; the worker reports why
                Ok(Err(_)) => return Ok(None),
                Err(_) => {
                    debug!(bytes = state.written, idle_ms = idle.as_millis(), "request upload stalled");
                    return Err(Error::Timeout {
                        phase: Phase::Send,
                        after: idle,
                    });
                }
            },
        }
    }
}

async fn exchange_head(
    mut sender: SendRequest<RequestBody>,
    request: http::Request<RequestBody>,
) -> Result<(SendRequest<RequestBody>, http::Response<Incoming>), Error> {
    sender.ready().await.map_err(hyper_error)?;
    let response = sender.send_request(request).await.map_err(hyper_error)?;
    Ok((sender, response))
}

/// Body chunks as an I/O stream that fails once no chunk arrives for `idle`.
fn idle_bounded<S, E>(body: S, idle: Duration) -> impl Stream<Item = io::Result<Bytes>>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    futures_util::stream::unfold(Some(body), move |state| async move {
        let mut body = state?;
        match tokio::time::timeout(idle, body.next()).await {
            Ok(Some(chunk)) => Some((chunk.map_err(io::Error::other), Some(body))),
            Ok(None) => None,
            Err(_) => {
                let stalled = Stalled {
                    phase: Phase::Read,
                    after: idle,
                };
                Some((Err(stalled.into_io()), None))
            }
        }
    })
}

// ── Connection setup ─────────────────────────────────────────────────

async fn establish(host: String, port: u16, tls: Option<Arc<ClientConfig>>) -> Result<Connection, Error> {
    let address = format!("{host}:{port}");
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|e| {
            debug!(%host, error = %e, "lookup failed");
            Error::UnknownHost { host: host.clone() }
        })?
        .collect();
    if addrs.is_empty() {
        return Err(Error::UnknownHost { host });
    }

    let tcp = connect_any(&addrs).await.map_err(|e| classify_io(&address, e))?;
    if let Err(e) = tcp.set_nodelay(true) {
        debug!(%address, error = %e, "could not disable Nagle's algorithm");
    }

    let Some(config) = tls else {
        return handshake(tcp, None).await;
    };
    let server_name = ServerName::try_from(host).map_err(|e| Error::config(format!("invalid server name: {e}")))?;
    let stream = TlsConnector::from(config)
        .connect(server_name, tcp)
        .await
        .map_err(|e| classify_tls(&address, e))?;
    let chain: Vec<CertificateDer<'static>> = stream
        .get_ref()
        .1
        .peer_certificates()
        .map(|certs| certs.iter().map(|c| c.clone().into_owned()).collect())
        .unwrap_or_default();
    handshake(stream, Some(chain)).await
}

async fn connect_any(addrs: &[SocketAddr]) -> io::Result<TcpStream> {
    let mut last = io::Error::new(io::ErrorKind::NotFound, "no addresses");
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(%addr, error = %e, "connect attempt failed");
                last = e;
            }
        }
    }
    Err(last)
}

async fn handshake<S>(stream: S, peer_chain: Option<Vec<CertificateDer<'static>>>) -> Result<Connection, Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let upload = UploadTracker::new();
    let stream = Tracked::new(stream, upload.clone());
    let (sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(hyper_error)?;
    let driver = tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!(error = %e, "connection closed with error");
        }
    });
    Ok(Connection {
        sender,
        driver: DriverGuard(driver),
        upload,
        peer_chain,
    })
}

// ── Error classification ─────────────────────────────────────────────

fn classify_io(address: &str, err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => Error::ConnectionRefused {
            address: address.to_owned(),
        },
        io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => Error::NoRouteToHost {
            address: address.to_owned(),
        },
        _ => Error::Transport {
            message: format!("{address}: {err}"),
        },
    }
}

fn classify_tls(address: &str, err: io::Error) -> Error {
    let Some(tls) = err.get_ref().and_then(|inner| inner.downcast_ref::<rustls::Error>()) else {
        return classify_io(address, err);
    };
    if let rustls::Error::InvalidCertificate(CertificateError::Other(other)) = tls {
        if let Some(rejected) = other.0.downcast_ref::<RejectedChain>() {
            return Error::CertificateRejected {
                description: rejected.description.clone(),
            };
        }
    }
    Error::Transport {
        message: format!("TLS handshake with {address} failed: {tls}"),
    }
}

fn hyper_error(err: hyper::Error) -> Error {
    Error::Transport {
        message: format!("HTTP: {err}"),
    }
}
