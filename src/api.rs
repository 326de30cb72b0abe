//! HTTP API for dashboard queries and live WebSocket updates

use crate::error::{json_error_response, ApiErrorCode};
use crate::events::shutdown_requested;
use crate::identity::ServiceId;
use crate::state::{AtomicGauge, StateCache};
use crate::subscribers::SubscriberRegistry;
use crate::ws::{self, SessionOptions};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONNECTION, CONTENT_TYPE, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, UPGRADE};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Helper to create a simple response - infallible with valid StatusCode
fn response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum")
}

/// Helper to create a JSON response
fn json_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum and static header")
}

/// Everything a request handler reads from
struct ApiContext {
    cache: Arc<StateCache>,
    subscribers: Arc<SubscriberRegistry>,
    gauge: Arc<AtomicGauge>,
    session: SessionOptions,
    shutdown_rx: watch::Receiver<bool>,
}

/// API server exposing the state cache to the dashboard
pub struct ApiServer {
    bind_addr: SocketAddr,
    context: Arc<ApiContext>,
}

impl ApiServer {
    pub fn new(
        bind_addr: SocketAddr,
        cache: Arc<StateCache>,
        subscribers: Arc<SubscriberRegistry>,
        gauge: Arc<AtomicGauge>,
        session: SessionOptions,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            context: Arc::new(ApiContext {
                cache,
                subscribers,
                gauge,
                session,
                shutdown_rx,
            }),
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.run_with_listener(listener).await
    }

    /// Serve on an already bound listener
    pub async fn run_with_listener(self, listener: TcpListener) -> anyhow::Result<()> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "API server listening");

        let mut shutdown_rx = self.context.shutdown_rx.clone();

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown_rx) => {
                    info!("API server shutting down");
                    break;
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let context = Arc::clone(&self.context);
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(stream, context).await {
                                    debug!(addr = %addr, error = %e, "API connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept API connection");
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

async fn serve_connection<S>(stream: S, context: Arc<ApiContext>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let context = Arc::clone(&context);
        async move { handle_request(req, context).await }
    });

    // WebSocket upgrades need HTTP/1.1
    AutoBuilder::new(TokioExecutor::new())
        .serve_connection_with_upgrades(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("API connection error: {}", e))?;

    Ok(())
}

async fn handle_request(
    req: Request<Incoming>,
    context: Arc<ApiContext>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!(%method, %path, "API request");

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/health") => response(StatusCode::OK, "ok"),

        (&Method::GET, "/version") => {
            let version_info = serde_json::json!({
                "name": PKG_NAME,
                "version": VERSION,
            });
            json_response(StatusCode::OK, version_info.to_string())
        }

        (&Method::GET, "/services") => {
            let services = context.cache.list();
            let running = services.iter().filter(|s| s.is_running()).count();
            let body = serde_json::json!({
                "count": services.len(),
                "running": running,
                "services": services,
            });
            json_response(StatusCode::OK, body.to_string())
        }

        (&Method::GET, path) if path.starts_with("/services/") => {
            let raw_id = path.trim_start_matches("/services/");
            match raw_id.parse::<ServiceId>() {
                Ok(id) => match context.cache.get(id) {
                    Some(state) => match serde_json::to_string(&state) {
                        Ok(body) => json_response(StatusCode::OK, body),
                        Err(e) => json_error_response(ApiErrorCode::InternalError, e.to_string()),
                    },
                    None => json_error_response(
                        ApiErrorCode::ServiceNotFound,
                        format!("no state recorded for service {}", id),
                    ),
                },
                Err(_) => json_error_response(
                    ApiErrorCode::InvalidServiceId,
                    format!("invalid service id: {}", raw_id),
                ),
            }
        }

        (&Method::GET, "/metrics") => {
            let body = serde_json::json!({
                "running_services": context.gauge.get(),
                "tracked_services": context.cache.len(),
                "subscribers": context.subscribers.len(),
            });
            json_response(StatusCode::OK, body.to_string())
        }

        (&Method::GET, "/ws") => websocket_upgrade(req, context),

        _ => json_error_response(ApiErrorCode::NotFound, "not found"),
    };

    Ok(response)
}

fn header_contains(req: &Request<Incoming>, name: hyper::header::HeaderName, token: &str) -> bool {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains(token))
        .unwrap_or(false)
}

/// Accept a WebSocket handshake and hand the connection to a subscriber task
fn websocket_upgrade(req: Request<Incoming>, context: Arc<ApiContext>) -> Response<Full<Bytes>> {
    let is_websocket = header_contains(&req, CONNECTION, "upgrade")
        && header_contains(&req, UPGRADE, "websocket");
    let version_ok = req
        .headers()
        .get(SEC_WEBSOCKET_VERSION)
        .map(|v| v == "13")
        .unwrap_or(false);
    let key = req
        .headers()
        .get(SEC_WEBSOCKET_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let key = match key {
        Some(key) if is_websocket && version_ok => key,
        _ => {
            return json_error_response(
                ApiErrorCode::UpgradeRequired,
                "expected a WebSocket upgrade (version 13)",
            )
        }
    };

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                ws::serve_subscriber(
                    TokioIo::new(upgraded),
                    Arc::clone(&context.subscribers),
                    context.session.clone(),
                    context.shutdown_rx.clone(),
                )
                .await;
            }
            Err(e) => debug!(error = %e, "WebSocket upgrade failed"),
        }
    });

    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(UPGRADE, "websocket")
        .header(CONNECTION, "Upgrade")
        .header(SEC_WEBSOCKET_ACCEPT, ws::accept_key(&key))
        .body(Full::new(Bytes::new()))
        .expect("valid response with StatusCode enum and static headers")
}
