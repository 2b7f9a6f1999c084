//! HTTP health server for Kubernetes liveness and readiness checks.
//!
//! `/healthz` answers as soon as the process is up. `/readyz` answers 200
//! only after the reconcile workers have started, and 503 before that.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Readiness flag shared between the controller and the health server.
#[derive(Debug, Default)]
pub struct HealthState {
    ready: AtomicBool,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

fn respond(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

/// Routes a health check request.
pub async fn health_handler<B>(
    req: Request<B>,
    state: Arc<HealthState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/healthz" => respond(StatusCode::OK, "ok"),
        "/readyz" if state.is_ready() => respond(StatusCode::OK, "ok"),
        "/readyz" => respond(StatusCode::SERVICE_UNAVAILABLE, "not ready"),
        _ => respond(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(response)
}

/// Serves health checks on an already bound listener until `cancel` fires.
pub async fn serve_health(
    listener: TcpListener,
    state: Arc<HealthState>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    loop {
        let (stream, _) = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted?,
        };
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| health_handler(req, state.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %e, "health connection error");
            }
        });
    }
}

/// Binds `addr` and serves health checks until `cancel` fires.
pub async fn start_health_server(
    addr: SocketAddr,
    state: Arc<HealthState>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "health server listening");
    serve_health(listener, state, cancel).await
}
