pub mod api;
pub mod ws;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use checkup_core::cache::UpdateCache;
use checkup_core::logwatch::LogWatcher;
use http::{Method, Request, Response, StatusCode, header};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub use api::{ApiQuery, ApiResponse};
pub use ws::WsSettings;

pub type HttpResponse = Response<Full<Bytes>>;

/// Everything request handlers share.
pub struct AppState {
    pub cache: Arc<UpdateCache>,
    pub watcher: Option<Arc<LogWatcher>>,
    /// Tracks connections, websocket sessions and background refreshes so
    /// shutdown can wait for them.
    pub tracker: TaskTracker,
    pub shutdown: CancellationToken,
    pub ws: WsSettings,
}

impl AppState {
    pub fn new(cache: Arc<UpdateCache>, shutdown: CancellationToken) -> Self {
        Self {
            cache,
            watcher: None,
            tracker: TaskTracker::new(),
            shutdown,
            ws: WsSettings::default(),
        }
    }

    pub fn with_watcher(mut self, watcher: Arc<LogWatcher>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    pub fn with_ws_settings(mut self, settings: WsSettings) -> Self {
        self.ws = settings;
        self
    }
}

/// Accepts connections until `state.shutdown` fires. Open connections are
/// asked to finish their current request; callers wait on `state.tracker`.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) {
    if let Ok(address) = listener.local_addr() {
        tracing::info!(%address, "listening");
    }

    loop {
        let (stream, remote) = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(error) => {
                    tracing::warn!(error = %error, "cannot accept connection");
                    continue;
                }
            },
        };

        let connection_state = Arc::clone(&state);
        state.tracker.spawn(async move {
            let shutdown = connection_state.shutdown.clone();
            let service = service_fn(move |request: Request<Incoming>| {
                let state = Arc::clone(&connection_state);
                async move { Ok::<_, Infallible>(route(request, state, remote).await) }
            });

            let connection = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .with_upgrades();
            tokio::pin!(connection);

            let result = tokio::select! {
                result = connection.as_mut() => result,
                _ = shutdown.cancelled() => {
                    connection.as_mut().graceful_shutdown();
                    connection.await
                }
            };
            if let Err(error) = result {
                tracing::debug!(%remote, error = %error, "connection error");
            }
        });
    }

    tracing::info!("stopped accepting connections");
}

async fn route(request: Request<Incoming>, state: Arc<AppState>, remote: SocketAddr) -> HttpResponse {
    let start = std::time::Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/api") => {
            let query = ApiQuery::parse(request.uri().query());
            let (status, body) = api::handle(&query, &state).await;
            json_response(status, &body)
        }
        (&Method::GET, "/ws") => ws::upgrade(request, &state, remote),
        (_, "/api" | "/ws") => {
            let mut response = error_response(
                StatusCode::METHOD_NOT_ALLOWED,
                format!("method {method} not allowed for {path}"),
            );
            response
                .headers_mut()
                .insert(header::ALLOW, header::HeaderValue::from_static("GET"));
            response
        }
        _ => error_response(StatusCode::NOT_FOUND, format!("no route found for {path}")),
    };

    tracing::debug!(
        method = %method,
        path = %path,
        %remote,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );
    response
}

pub(crate) fn json_response<T: Serialize>(status: StatusCode, body: &T) -> HttpResponse {
    let (status, bytes) = match serde_json::to_vec(body) {
        Ok(bytes) => (status, bytes),
        Err(error) => {
            tracing::error!(error = %error, "cannot encode response");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                br#"{"error":"cannot encode response"}"#.to_vec(),
            )
        }
    };

    let mut response = Response::new(Full::new(Bytes::from(bytes)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> HttpResponse {
    json_response(status, &ApiResponse::error(message))
}
