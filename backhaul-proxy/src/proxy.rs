use crate::credentials::{ProxyCredentials, REALM};
use backhaul_common::constants::DEFAULT_BIND_ADDRESS;
use backhaul_common::{Result, TunnelError};
use backhaul_core::governor::AcceptGovernor;
use backhaul_core::relay::relay;
use backhaul_core::transport::{configure_socket_silent, TcpTransport};
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, HOST, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Why a single proxied request failed
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("request has no target host")]
    MissingHost,

    #[error("upstream unreachable: {0}")]
    Upstream(#[from] TunnelError),

    #[error("origin request failed: {0}")]
    Origin(#[from] hyper::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingHost => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) | ProxyError::Origin(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

/// HTTP/1 forward proxy gated by basic credentials.
///
/// `CONNECT` requests become raw byte relays; absolute-form requests are
/// forwarded to the origin with the proxy credentials removed.
#[derive(Debug, Clone)]
pub struct ForwardProxy {
    credentials: Arc<ProxyCredentials>,
}

impl ForwardProxy {
    pub fn new(credentials: ProxyCredentials) -> Self {
        Self {
            credentials: Arc::new(credentials),
        }
    }

    /// Generate credentials for this process and report them to the operator.
    pub fn with_generated_credentials() -> Self {
        let credentials = ProxyCredentials::generate();
        info!(
            realm = REALM,
            username = credentials.username(),
            password = credentials.password(),
            "Proxy credentials"
        );
        Self::new(credentials)
    }

    pub fn credentials(&self) -> &ProxyCredentials {
        &self.credentials
    }

    /// Bind `0.0.0.0:<port>`. Failure is fatal.
    pub async fn bind(port: u16) -> Result<TcpListener> {
        TcpTransport::bind(DEFAULT_BIND_ADDRESS, port).await
    }

    pub async fn run(self, port: u16) -> Result<()> {
        let listener = Self::bind(port).await?;
        self.serve(listener).await
    }

    /// Serve proxy connections until the accept loop gives up.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!(addr = %listener.local_addr()?, "Forward proxy listening");
        let mut governor = AcceptGovernor::new("proxy");

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    governor.on_error(&e)?;
                    continue;
                }
            };
            configure_socket_silent(&stream);

            let credentials = Arc::clone(&self.credentials);
            tokio::spawn(async move {
                let service =
                    service_fn(move |req| handle_request(req, Arc::clone(&credentials), peer));
                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .with_upgrades()
                    .await
                {
                    debug!(peer = %peer, "Proxy connection ended: {}", e);
                }
            });
        }
    }
}

async fn handle_request(
    req: Request<Incoming>,
    credentials: Arc<ProxyCredentials>,
    peer: SocketAddr,
) -> std::result::Result<Response<BoxBody>, Infallible> {
    let authorized = req
        .headers()
        .get(PROXY_AUTHORIZATION)
        .is_some_and(|value| credentials.verify(value));
    if !authorized {
        debug!(peer = %peer, "Proxy authentication required");
        return Ok(auth_required());
    }

    let result = if req.method() == Method::CONNECT {
        tunnel(req).await
    } else {
        forward(req).await
    };

    Ok(result.unwrap_or_else(|e| {
        warn!(peer = %peer, "Proxy request failed: {}", e);
        error_response(e.status(), &e.to_string())
    }))
}

/// Dial the CONNECT target, answer 200, then relay the upgraded connection.
async fn tunnel(req: Request<Incoming>) -> std::result::Result<Response<BoxBody>, ProxyError> {
    let target = req
        .uri()
        .authority()
        .map(ToString::to_string)
        .ok_or(ProxyError::MissingHost)?;
    let upstream = TcpTransport::connect(&target).await?;

    tokio::spawn(async move {
        let upgraded = match hyper::upgrade::on(req).await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                warn!(target = %target, "CONNECT upgrade failed: {}", e);
                return;
            }
        };

        #[cfg(feature = "metrics")]
        backhaul_observability::metrics::relay_started();

        let stats = relay(TokioIo::new(upgraded), upstream).await;

        #[cfg(feature = "metrics")]
        backhaul_observability::metrics::relay_finished(stats.a_to_b, stats.b_to_a);

        debug!(
            target = %target,
            inbound = stats.a_to_b,
            outbound = stats.b_to_a,
            "CONNECT relay finished"
        );
    });

    Ok(Response::new(empty()))
}

/// Send an absolute-form request to its origin and stream the response back.
async fn forward(mut req: Request<Incoming>) -> std::result::Result<Response<BoxBody>, ProxyError> {
    let host = req.uri().host().ok_or(ProxyError::MissingHost)?;
    let port = req.uri().port_u16().unwrap_or(80);
    let target = format!("{host}:{port}");

    let stream = TcpTransport::connect(&target).await?;
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Origin connection ended: {}", e);
        }
    });

    into_origin_form(&mut req);
    let res = sender.send_request(req).await?;
    Ok(res.map(BodyExt::boxed))
}

/// Strip proxy-only headers and rewrite the target to origin form.
fn into_origin_form<B>(req: &mut Request<B>) {
    let authority = req.uri().authority().cloned();
    let origin: Option<Uri> = req
        .uri()
        .path_and_query()
        .map_or("/", |p| p.as_str())
        .parse()
        .ok();

    let headers = req.headers_mut();
    headers.remove(PROXY_AUTHORIZATION);
    headers.remove("proxy-connection");
    if let Some(authority) = authority {
        if !headers.contains_key(HOST) {
            if let Ok(value) = HeaderValue::from_str(authority.as_str()) {
                headers.insert(HOST, value);
            }
        }
    }

    if let Some(origin) = origin {
        *req.uri_mut() = origin;
    }
}

fn empty() -> BoxBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

fn error_response(status: StatusCode, msg: &str) -> Response<BoxBody> {
    let body = Full::new(Bytes::copy_from_slice(msg.as_bytes()))
        .map_err(|never| match never {})
        .boxed();
    let mut res = Response::new(body);
    *res.status_mut() = status;
    res
}

fn auth_required() -> Response<BoxBody> {
    let mut res = error_response(
        StatusCode::PROXY_AUTHENTICATION_REQUIRED,
        "Proxy authentication required",
    );
    res.headers_mut()
        .insert(PROXY_AUTHENTICATE, ProxyCredentials::challenge());
    res
}
