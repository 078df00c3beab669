use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use checkup_core::cache::UpdateCache;
use checkup_core::models::Snapshot;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use http::{HeaderMap, Method, Request, Response, StatusCode, header};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::{Role, WebSocketConfig};
use tokio_util::sync::CancellationToken;

use crate::http::{AppState, HttpResponse, error_response};

/// Timing and size limits of a websocket session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WsSettings {
    /// A peer that sends no pong for this long is dropped.
    pub pong_wait: Duration,
    /// Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    pub write_wait: Duration,
    pub max_message_size: usize,
}

impl Default for WsSettings {
    fn default() -> Self {
        Self::with_pong_wait(Duration::from_secs(60))
    }
}

impl WsSettings {
    /// Pings at nine tenths of `pong_wait`.
    pub fn with_pong_wait(pong_wait: Duration) -> Self {
        Self {
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            write_wait: Duration::from_secs(10),
            max_message_size: 512,
        }
    }

    fn protocol_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config.max_frame_size = Some(self.max_message_size);
        config
    }
}

#[derive(Error, Debug)]
pub enum WsError {
    #[error("invalid websocket upgrade request: {0}")]
    InvalidUpgrade(String),

    #[error("no pong received within {0:?}")]
    PongTimeout(Duration),

    #[error("write did not finish within {0:?}")]
    WriteTimeout(Duration),

    #[error("cannot encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("websocket error: {0}")]
    Protocol(#[from] tokio_tungstenite::tungstenite::Error),
}

impl WsError {
    fn invalid_upgrade(message: impl Into<String>) -> Self {
        Self::InvalidUpgrade(message.into())
    }
}

/// Checks the handshake headers and returns the client's key.
pub(crate) fn validate_upgrade_request(
    method: &Method,
    headers: &HeaderMap,
) -> Result<String, WsError> {
    if method != Method::GET {
        return Err(WsError::invalid_upgrade("method must be GET"));
    }

    let header_value = |name: header::HeaderName| {
        headers
            .get(&name)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| WsError::invalid_upgrade(format!("missing {name} header")))
    };

    if !header_value(header::UPGRADE)?.eq_ignore_ascii_case("websocket") {
        return Err(WsError::invalid_upgrade("upgrade header must be 'websocket'"));
    }

    let upgrades_connection = header_value(header::CONNECTION)?
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    if !upgrades_connection {
        return Err(WsError::invalid_upgrade(
            "connection header must contain 'upgrade'",
        ));
    }

    if header_value(header::SEC_WEBSOCKET_VERSION)? != "13" {
        return Err(WsError::invalid_upgrade("websocket version must be 13"));
    }

    header_value(header::SEC_WEBSOCKET_KEY).map(str::to_owned)
}

/// Answers the handshake and hands the upgraded connection to a tracked
/// session task.
pub(crate) fn upgrade(
    mut request: Request<Incoming>,
    state: &Arc<AppState>,
    remote: SocketAddr,
) -> HttpResponse {
    let key = match validate_upgrade_request(request.method(), request.headers()) {
        Ok(key) => key,
        Err(error) => {
            tracing::debug!(%remote, error = %error, "rejected websocket upgrade");
            return error_response(StatusCode::BAD_REQUEST, error.to_string());
        }
    };

    let on_upgrade = hyper::upgrade::on(&mut request);
    let cache = Arc::clone(&state.cache);
    let settings = state.ws;
    let cancel = state.shutdown.child_token();

    state.tracker.spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let stream = WebSocketStream::from_raw_socket(
                    TokioIo::new(upgraded),
                    Role::Server,
                    Some(settings.protocol_config()),
                )
                .await;
                serve_session(stream, cache, settings, cancel, remote).await;
            }
            Err(error) => tracing::warn!(%remote, error = %error, "websocket upgrade failed"),
        }
    });

    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(header::UPGRADE, header::HeaderValue::from_static("websocket"));
    headers.insert(header::CONNECTION, header::HeaderValue::from_static("Upgrade"));
    if let Ok(accept) = header::HeaderValue::from_str(&derive_accept_key(key.as_bytes())) {
        headers.insert(header::SEC_WEBSOCKET_ACCEPT, accept);
    }
    response
}

type WsSink<S> = Mutex<SplitSink<WebSocketStream<S>, Message>>;

/// Runs the reader and writer of one connection until either of them stops
/// or `cancel` fires, then closes the socket.
pub async fn serve_session<S>(
    stream: WebSocketStream<S>,
    cache: Arc<UpdateCache>,
    settings: WsSettings,
    cancel: CancellationToken,
    remote: SocketAddr,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tracing::debug!(%remote, "websocket connected");
    let (sink, source) = stream.split();
    let sink: WsSink<S> = Mutex::new(sink);

    let (read_result, write_result) = tokio::join!(
        read_loop(source, &settings, cancel.clone()),
        write_loop(&sink, &cache, &settings, cancel.clone()),
    );

    for (task, result) in [("reader", read_result), ("writer", write_result)] {
        if let Err(error) = result {
            tracing::debug!(%remote, task, error = %error, "websocket task stopped");
        }
    }

    let mut sink = sink.lock().await;
    match tokio::time::timeout(settings.write_wait, sink.close()).await {
        Ok(Ok(())) => tracing::debug!(%remote, "websocket closed"),
        Ok(Err(error)) => tracing::debug!(%remote, error = %error, "websocket close failed"),
        Err(_) => tracing::debug!(%remote, "websocket close timed out"),
    }
}

/// Drains inbound frames. Only pongs extend the deadline; data frames are
/// ignored.
async fn read_loop<S>(
    mut source: SplitStream<WebSocketStream<S>>,
    settings: &WsSettings,
    cancel: CancellationToken,
) -> Result<(), WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _cancel_on_exit = cancel.clone().drop_guard();
    let mut deadline = Instant::now() + settings.pong_wait;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = tokio::time::timeout_at(deadline, source.next()) => next,
        };

        match next {
            Err(_) => return Err(WsError::PongTimeout(settings.pong_wait)),
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => return Ok(()),
            Ok(Some(Err(error))) => return Err(error.into()),
            Ok(Some(Ok(Message::Pong(_)))) => deadline = Instant::now() + settings.pong_wait,
            Ok(Some(Ok(_))) => {}
        }
    }
}

/// Sends the snapshot whenever it changes, plus periodic pings.
async fn write_loop<S>(
    sink: &WsSink<S>,
    cache: &UpdateCache,
    settings: &WsSettings,
    cancel: CancellationToken,
) -> Result<(), WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _cancel_on_exit = cancel.clone().drop_guard();
    let mut subscription = cache.subscribe();

    let heartbeat = async {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + settings.ping_period, settings.ping_period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok::<(), WsError>(()),
                _ = ticker.tick() => send(sink, Message::Ping(Vec::new()), settings.write_wait).await?,
            }
        }
    };

    let messages = async {
        let mut last_sent: Option<Snapshot> = None;
        loop {
            if let Ok(snapshot) = cache.read().await
                && !snapshot.is_empty()
                && last_sent.as_ref() != Some(&snapshot)
            {
                let text = serde_json::to_string(&snapshot)?;
                send(sink, Message::Text(text), settings.write_wait).await?;
                last_sent = Some(snapshot);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok::<(), WsError>(()),
                woken = subscription.recv() => if woken.is_none() {
                    return Ok(());
                },
            }
        }
    };

    tokio::try_join!(heartbeat, messages).map(|_| ())
}

async fn send<S>(sink: &WsSink<S>, message: Message, write_wait: Duration) -> Result<(), WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut sink = sink.lock().await;
    tokio::time::timeout(write_wait, sink.send(message))
        .await
        .map_err(|_| WsError::WriteTimeout(write_wait))??;
    Ok(())
}
