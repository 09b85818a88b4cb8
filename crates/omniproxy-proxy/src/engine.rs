//! The proxy engine: accept loop, request dispatch, CONNECT handling.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_LENGTH, HOST};
use http::uri::{PathAndQuery, Uri};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use parking_lot::RwLock;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, info, warn};

use omniproxy_capture::{Capturer, Record};
use omniproxy_observability::Metrics;

use crate::ca::Ca;
use crate::cert_cache::{CertCache, LeafCert};
use crate::error::{ProxyError, Result};
use crate::match_skip_host;
use crate::tls::insecure_client_config;
use crate::upstream::Upstream;

/// How long the server waits for a request head.
const READ_HEADER_TIMEOUT: Duration = Duration::from_secs(10);

/// Headers stripped before forwarding in either direction.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Proxy engine configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to bind the listener to.
    pub listen: SocketAddr,
    /// Whether CONNECT traffic is decrypted. When false, every CONNECT is
    /// tunneled unchanged.
    pub mitm_enabled: bool,
    /// Hosts never decrypted; `*.suffix` matches any subdomain.
    pub skip_hosts: Vec<String>,
    /// Optional parent proxy URL (`http://host:port`).
    pub upstream: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], crate::DEFAULT_PROXY_PORT)),
            mitm_enabled: true,
            skip_hosts: Vec::new(),
            upstream: None,
        }
    }
}

struct EngineInner {
    ca: Ca,
    cert_cache: Arc<dyn CertCache>,
    capturer: Option<Arc<Capturer>>,
    metrics: Option<Arc<Metrics>>,
    skip_hosts: RwLock<Vec<String>>,
    mitm_enabled: bool,
    upstream: Option<Upstream>,
    client_tls: Arc<tokio_rustls::rustls::ClientConfig>,
}

/// The intercepting forward proxy.
#[derive(Clone)]
pub struct ProxyEngine {
    listen: SocketAddr,
    inner: Arc<EngineInner>,
}

impl ProxyEngine {
    /// Creates an engine from configuration, a CA, and a leaf cache.
    pub fn new(config: ProxyConfig, ca: Ca, cert_cache: Arc<dyn CertCache>) -> Result<Self> {
        let upstream = match &config.upstream {
            Some(url) => Some(Upstream::parse(url)?),
            None => None,
        };

        Ok(Self {
            listen: config.listen,
            inner: Arc::new(EngineInner {
                ca,
                cert_cache,
                capturer: None,
                metrics: None,
                skip_hosts: RwLock::new(config.skip_hosts),
                mitm_enabled: config.mitm_enabled,
                upstream,
                client_tls: insecure_client_config(),
            }),
        })
    }

    /// Attaches the capturer. Must be called before `start`.
    pub fn with_capturer(mut self, capturer: Arc<Capturer>) -> Self {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("with_capturer must be called before the engine is started");
        inner.capturer = Some(capturer);
        self
    }

    /// Attaches the metrics registry. Must be called before `start`.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("with_metrics must be called before the engine is started");
        inner.metrics = Some(metrics);
        self
    }

    /// Atomically replaces the skip-host list; takes effect for new
    /// CONNECT sessions.
    pub fn reload_skip_hosts(&self, skip_hosts: Vec<String>) {
        *self.inner.skip_hosts.write() = skip_hosts;
        info!("skip-host list reloaded");
    }

    /// Binds the listener and runs until the shutdown channel fires.
    pub async fn run(&self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        let listener = TcpListener::bind(self.listen).await?;
        info!(addr = %listener.local_addr()?, mitm = self.inner.mitm_enabled, "proxy listening");
        self.accept_loop(listener, shutdown).await;
        Ok(())
    }

    /// Binds the listener and serves in a background task, returning a
    /// handle carrying the bound address.
    pub async fn start(&self) -> Result<ProxyHandle> {
        let listener = TcpListener::bind(self.listen).await?;
        let addr = listener.local_addr()?;
        info!(%addr, mitm = self.inner.mitm_enabled, "proxy listening");

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            engine.accept_loop(listener, shutdown_rx).await;
        });

        Ok(ProxyHandle {
            shutdown_tx,
            addr,
            handle,
        })
    }

    async fn accept_loop(&self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("proxy shutdown signal received");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            debug!("accept failed: {e}");
                            continue;
                        }
                    };
                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move {
                        if let Some(m) = &inner.metrics {
                            m.connection_opened();
                        }
                        serve_client(Arc::clone(&inner), stream, peer).await;
                        if let Some(m) = &inner.metrics {
                            m.connection_closed();
                        }
                    });
                }
            }
        }
    }
}

/// Handle for a running proxy.
pub struct ProxyHandle {
    shutdown_tx: broadcast::Sender<()>,
    addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl ProxyHandle {
    /// The bound listener address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signals shutdown; in-flight exchanges finish and connections exit.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Waits for the accept loop to exit.
    pub async fn wait(self) {
        let _ = self.handle.await;
    }

    /// Shuts down and waits.
    pub async fn stop(self) {
        self.shutdown();
        self.wait().await;
    }
}

async fn serve_client(inner: Arc<EngineInner>, stream: TcpStream, peer: SocketAddr) {
    let io = TokioIo::new(stream);
    let svc_inner = Arc::clone(&inner);
    let service = service_fn(move |req: Request<Incoming>| {
        let inner = Arc::clone(&svc_inner);
        async move { Ok::<_, std::convert::Infallible>(dispatch(inner, req).await) }
    });

    let conn = hyper::server::conn::http1::Builder::new()
        .timer(TokioTimer::new())
        .header_read_timeout(READ_HEADER_TIMEOUT)
        .serve_connection(io, service)
        .with_upgrades();

    if let Err(e) = conn.await {
        debug!(%peer, "client connection ended: {e}");
    }
}

async fn dispatch(inner: Arc<EngineInner>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    if req.method() == Method::CONNECT {
        return handle_connect(inner, req);
    }

    // Plain forward requires an absolute-form URI or at least a Host
    // header to find the origin.
    let (host, port) = match target_of(&req) {
        Some(target) => target,
        None => return simple_response(StatusCode::BAD_REQUEST, "missing target host"),
    };

    forward(inner, req, "http", host, port).await
}

/// Extracts (host, port) for a plain-forward request.
fn target_of<B>(req: &Request<B>) -> Option<(String, u16)> {
    if let Some(host) = req.uri().host() {
        return Some((host.to_string(), req.uri().port_u16().unwrap_or(80)));
    }
    let raw = req.headers().get(HOST)?.to_str().ok()?;
    match raw.rsplit_once(':') {
        Some((h, p)) => Some((h.to_string(), p.parse().unwrap_or(80))),
        None => Some((raw.to_string(), 80)),
    }
}

/// Responds `200 Connection established` and takes over the socket: either
/// an opaque splice (skip-hosts, MITM disabled) or TLS termination with a
/// minted leaf.
fn handle_connect(inner: Arc<EngineInner>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let authority = match req.uri().authority() {
        Some(a) => a.clone(),
        None => return simple_response(StatusCode::BAD_REQUEST, "CONNECT requires authority"),
    };
    let host = authority.host().to_string();
    let port = authority.port_u16().unwrap_or(443);

    let tunnel_only = {
        let skip = inner.skip_hosts.read();
        !inner.mitm_enabled || skip.iter().any(|p| match_skip_host(p, &host))
    };

    tokio::spawn(async move {
        let upgraded = match hyper::upgrade::on(req).await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                debug!(%host, "CONNECT upgrade failed: {e}");
                return;
            }
        };
        let io = TokioIo::new(upgraded);

        if tunnel_only {
            if let Err(e) = tunnel(&inner, io, &host, port).await {
                debug!(%host, "tunnel ended: {e}");
            }
        } else if let Err(e) = mitm(&inner, io, host.clone(), port).await {
            debug!(%host, "mitm session ended: {e}");
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Splices bytes between the client and the origin without decryption.
/// No records are emitted for tunneled traffic.
async fn tunnel(
    inner: &EngineInner,
    client: TokioIo<hyper::upgrade::Upgraded>,
    host: &str,
    port: u16,
) -> Result<()> {
    let mut origin = match &inner.upstream {
        Some(up) => up.connect_tunnel(host, port).await?,
        None => TcpStream::connect((host, port)).await?,
    };

    let mut client = client;
    tokio::io::copy_bidirectional(&mut client, &mut origin).await?;
    Ok(())
}

/// Terminates TLS with a minted leaf and serves the inner HTTP requests.
/// A failed handshake closes the session without emitting a record.
async fn mitm(
    inner: &Arc<EngineInner>,
    client: TokioIo<hyper::upgrade::Upgraded>,
    host: String,
    port: u16,
) -> Result<()> {
    let leaf = leaf_for(inner, &host)?;
    let server_config = leaf.server_config()?;
    let acceptor = TlsAcceptor::from(Arc::new(server_config));

    let tls_stream = match acceptor.accept(client).await {
        Ok(s) => s,
        Err(e) => {
            debug!(%host, "tls handshake failed: {e}");
            return Ok(());
        }
    };

    let svc_inner = Arc::clone(inner);
    let svc_host = host.clone();
    let service = service_fn(move |req: Request<Incoming>| {
        let inner = Arc::clone(&svc_inner);
        let host = svc_host.clone();
        async move {
            Ok::<_, std::convert::Infallible>(forward(inner, req, "https", host, port).await)
        }
    });

    hyper::server::conn::http1::Builder::new()
        .timer(TokioTimer::new())
        .header_read_timeout(READ_HEADER_TIMEOUT)
        .serve_connection(TokioIo::new(tls_stream), service)
        .await?;

    Ok(())
}

/// Fetches a leaf from the cache, minting on miss. Two concurrent misses
/// may both mint; either result may win the cache slot.
fn leaf_for(inner: &EngineInner, host: &str) -> Result<Arc<LeafCert>> {
    if let Some(leaf) = inner.cert_cache.get(host) {
        return Ok(leaf);
    }

    let leaf = Arc::new(inner.ca.mint_leaf_der(host)?);
    if let Some(m) = &inner.metrics {
        m.record_cert_generated();
    }
    inner.cert_cache.set(host, Arc::clone(&leaf));
    Ok(leaf)
}

/// Forwards one exchange to the origin and captures it.
async fn forward(
    inner: Arc<EngineInner>,
    req: Request<Incoming>,
    scheme: &str,
    host: String,
    port: u16,
) -> Response<Full<Bytes>> {
    if let Some(m) = &inner.metrics {
        m.request_start();
    }
    let response = forward_inner(&inner, req, scheme, &host, port).await;
    if let Some(m) = &inner.metrics {
        m.request_end();
    }
    response
}

async fn forward_inner(
    inner: &Arc<EngineInner>,
    req: Request<Incoming>,
    scheme: &str,
    host: &str,
    port: u16,
) -> Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();

    let body_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!(%host, "client closed while sending body: {e}");
            if let Some(capturer) = &inner.capturer {
                let mut rec =
                    capturer.start(&parts.method, &parts.uri, scheme, host, &parts.headers, None);
                rec.error = Some("client_closed".to_string());
                let _ = capturer.finish_with_status(rec, 0, 0);
            }
            return simple_response(StatusCode::BAD_REQUEST, "request body aborted");
        }
    };

    let record = inner.capturer.as_ref().map(|capturer| {
        let capture_body = request_body_for_capture(&parts.headers, &body_bytes, capturer);
        capturer.start(
            &parts.method,
            &parts.uri,
            scheme,
            host,
            &parts.headers,
            capture_body,
        )
    });

    let outbound = build_outbound(&parts, host, scheme, inner.upstream.is_some(), &body_bytes);

    let started = std::time::Instant::now();
    let result = send_upstream(inner, scheme, host, port, outbound).await;

    match result {
        Ok(resp) => {
            let (rparts, rbody) = resp.into_parts();
            let status = rparts.status;

            let resp_bytes = match rbody.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    warn!(%host, "upstream body failed: {e}");
                    return fail_exchange(
                        inner,
                        record,
                        "upstream_body",
                        host,
                        &parts.method,
                        started,
                    );
                }
            };

            if let Some(capturer) = &inner.capturer {
                if let Some(rec) = record {
                    if let Err(e) = capturer.finish(rec, status, &rparts.headers, Some(&resp_bytes))
                    {
                        debug!("capture write failed: {e}");
                    }
                }
            }
            if let Some(m) = &inner.metrics {
                m.record_request(
                    parts.method.as_str(),
                    host,
                    status.as_u16(),
                    started.elapsed().as_secs_f64() * 1000.0,
                    resp_bytes.len() as i64,
                );
            }

            let mut response = Response::new(Full::new(resp_bytes));
            *response.status_mut() = status;
            *response.headers_mut() = strip_hop_by_hop(&rparts.headers);
            response
        }
        Err(e) => {
            warn!(%host, "upstream dial failed: {e}");
            fail_exchange(inner, record, "upstream_error", host, &parts.method, started)
        }
    }
}

/// Emits a 502 record and response for a failed exchange.
fn fail_exchange(
    inner: &Arc<EngineInner>,
    record: Option<Record>,
    error: &str,
    host: &str,
    method: &Method,
    started: std::time::Instant,
) -> Response<Full<Bytes>> {
    if let Some(capturer) = &inner.capturer {
        if let Some(mut rec) = record {
            rec.error = Some(error.to_string());
            let _ = capturer.finish(
                rec,
                StatusCode::BAD_GATEWAY,
                &HeaderMap::new(),
                None,
            );
        }
    }
    if let Some(m) = &inner.metrics {
        m.record_request(
            method.as_str(),
            host,
            502,
            started.elapsed().as_secs_f64() * 1000.0,
            0,
        );
    }
    simple_response(StatusCode::BAD_GATEWAY, "upstream unreachable")
}

/// Request bodies are captured only when the declared length is known and
/// within the cap; responses are handled separately by the capturer.
fn request_body_for_capture<'a>(
    headers: &HeaderMap,
    body: &'a Bytes,
    capturer: &Capturer,
) -> Option<&'a Bytes> {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())?;
    if declared == 0 || declared > capturer.config().max_body_size || body.is_empty() {
        return None;
    }
    Some(body)
}

/// Builds the outbound request: hop-by-hop headers stripped, URI in
/// origin form (absolute form when chaining plain HTTP through a parent
/// proxy), Host header ensured.
fn build_outbound(
    parts: &http::request::Parts,
    host: &str,
    scheme: &str,
    via_upstream: bool,
    body: &Bytes,
) -> Request<Full<Bytes>> {
    let path_and_query = parts
        .uri
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));

    let uri = if scheme == "http" && via_upstream {
        // Parent proxies expect plain requests in absolute form.
        if parts.uri.scheme().is_some() {
            parts.uri.clone()
        } else {
            Uri::builder()
                .scheme("http")
                .authority(host)
                .path_and_query(path_and_query.clone())
                .build()
                .unwrap_or_else(|_| parts.uri.clone())
        }
    } else {
        Uri::from(path_and_query)
    };

    let mut builder = Request::builder().method(parts.method.clone()).uri(uri);
    if let Some(headers) = builder.headers_mut() {
        *headers = strip_hop_by_hop(&parts.headers);
        if !headers.contains_key(HOST) {
            if let Ok(value) = HeaderValue::from_str(host) {
                headers.insert(HOST, value);
            }
        }
    }

    builder
        .body(Full::new(body.clone()))
        .expect("request reassembly from valid parts")
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut connection_named: Vec<String> = Vec::new();
    for value in headers.get_all(http::header::CONNECTION) {
        if let Ok(v) = value.to_str() {
            connection_named.extend(v.split(',').map(|s| s.trim().to_ascii_lowercase()));
        }
    }

    let mut out = HeaderMap::new();
    for (name, value) in headers {
        let lower = name.as_str().to_ascii_lowercase();
        if HOP_BY_HOP_HEADERS.contains(&lower.as_str()) || connection_named.contains(&lower) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Dials the origin (directly or through the parent proxy), performs the
/// HTTP/1.1 exchange, and returns the raw response.
async fn send_upstream(
    inner: &Arc<EngineInner>,
    scheme: &str,
    host: &str,
    port: u16,
    req: Request<Full<Bytes>>,
) -> Result<Response<Incoming>> {
    if scheme == "https" {
        let stream = match &inner.upstream {
            Some(up) => up.connect_tunnel(host, port).await?,
            None => TcpStream::connect((host, port)).await?,
        };

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| ProxyError::Upstream(format!("invalid server name: {host}")))?;
        let connector = TlsConnector::from(Arc::clone(&inner.client_tls));
        let tls = connector.connect(server_name, stream).await?;

        exchange(TokioIo::new(tls), req).await
    } else {
        let stream = match &inner.upstream {
            Some(up) => up.connect().await?,
            None => TcpStream::connect((host, port)).await?,
        };
        exchange(TokioIo::new(stream), req).await
    }
}

async fn exchange<T>(io: T, req: Request<Full<Bytes>>) -> Result<Response<Incoming>>
where
    T: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("upstream connection ended: {e}");
        }
    });
    Ok(sender.send_request(req).await?)
}

fn simple_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(message.to_string())))
        .unwrap()
}
