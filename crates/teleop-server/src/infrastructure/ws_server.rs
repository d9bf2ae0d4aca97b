//! WebSocket server: accept loop and per-operator session tasks.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Upgrading each accepted connection to a WebSocket session.
//! 3. Registering the session with the [`TeleopService`] as a subscriber.
//! 4. Running two concurrent tasks per session:
//!    - **Events → Operator**: drains the subscriber queue and writes each
//!      event as a JSON text frame.
//!    - **Operator → Service**: reads JSON requests and handles each one on
//!      its own task, writing the `reply` straight back to the socket.
//! 5. Unregistering the session when either task ends.
//!
//! Replies bypass the subscriber queue.  That queue drops events when it is
//! full, which is fine for video frames but not for answers to requests.
//!
//! Handling every request on its own task means a servo command waiting out
//! its response window never delays a `motors_off` sent right after it.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message as WsMessage},
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::application::control::TeleopService;
use crate::domain::messages::{ClientRequest, CommandReply, ServerEvent};

type WsSink = Arc<Mutex<SplitSink<WebSocketStream<TcpStream>, WsMessage>>>;

/// How often the accept loop re-checks the `running` flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds `bind_addr` and serves operators until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound.
pub async fn run_server(
    bind_addr: SocketAddr,
    service: Arc<TeleopService>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {bind_addr}"))?;

    info!("teleop server listening on ws://{bind_addr}");
    serve(listener, service, running).await
}

/// Runs the accept loop on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    service: Arc<TeleopService>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                info!("new operator connection from {peer_addr}");
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    handle_operator_session(stream, peer_addr, service).await;
                });
            }
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {}
        }
    }

    Ok(())
}

// ── Per-session handler ───────────────────────────────────────────────────────

async fn handle_operator_session(stream: TcpStream, peer_addr: SocketAddr, service: Arc<TeleopService>) {
    match run_session(stream, peer_addr, service).await {
        Ok(()) => info!("session {peer_addr} closed normally"),
        Err(e) => warn!("session {peer_addr} closed with error: {e:#}"),
    }
}

async fn run_session(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    service: Arc<TeleopService>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(raw_stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let (ws_tx, ws_rx) = ws_stream.split();
    let ws_tx: WsSink = Arc::new(Mutex::new(ws_tx));

    let mut subscription = service.client_connected().await;
    let client_id = subscription.id;
    let session = peer_addr.to_string();
    info!(%client_id, "session {session} established");

    // ── Task A: events → operator ─────────────────────────────────────────────
    let ws_tx_events = Arc::clone(&ws_tx);
    let session_events = session.clone();
    let mut forward_task = tokio::spawn(async move {
        while let Some(event) = subscription.events.recv().await {
            if !send_event(&ws_tx_events, &event).await {
                debug!("session {session_events}: send failed (operator disconnected)");
                break;
            }
        }
    });

    // ── Task B: operator → service ────────────────────────────────────────────
    let mut reader_task = tokio::spawn(read_requests(
        ws_rx,
        session.clone(),
        Arc::clone(&service),
        Arc::clone(&ws_tx),
    ));

    tokio::select! {
        _ = &mut forward_task => debug!("session {session}: event forwarder ended"),
        _ = &mut reader_task => debug!("session {session}: request reader ended"),
    }
    forward_task.abort();
    reader_task.abort();

    service.client_disconnected(client_id).await;
    Ok(())
}

async fn read_requests(
    mut ws_rx: futures_util::stream::SplitStream<WebSocketStream<TcpStream>>,
    session: String,
    service: Arc<TeleopService>,
    ws_tx: WsSink,
) {
    loop {
        let ws_msg = match ws_rx.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) => {
                debug!("session {session}: WebSocket closed");
                break;
            }
            Some(Err(e)) => {
                warn!("session {session}: WebSocket error: {e}");
                break;
            }
            None => {
                debug!("session {session}: stream ended");
                break;
            }
        };

        match ws_msg {
            WsMessage::Text(text) => {
                let (id, request) = ClientRequest::parse(&text);
                let request = match request {
                    Ok(request) => request,
                    Err(e) => {
                        warn!("session {session}: invalid request: {e}");
                        let reply = CommandReply::failed(format!("invalid request: {e}"));
                        send_event(&ws_tx, &ServerEvent::Reply { id, reply }).await;
                        continue;
                    }
                };

                debug!("session {session}: request {request:?}");
                let service = Arc::clone(&service);
                let ws_tx = Arc::clone(&ws_tx);
                tokio::spawn(async move {
                    let reply = service.handle(request).await;
                    send_event(&ws_tx, &ServerEvent::Reply { id, reply }).await;
                });
            }
            WsMessage::Binary(_) => {
                warn!("session {session}: unexpected binary WebSocket frame (ignored)");
            }
            WsMessage::Ping(data) => {
                debug!("session {session}: WebSocket ping ({} bytes)", data.len());
            }
            WsMessage::Pong(_) => {}
            WsMessage::Close(_) => {
                debug!("session {session}: WebSocket Close frame received");
                break;
            }
            WsMessage::Frame(_) => {}
        }
    }
}

/// Serializes `event` and writes it as a text frame.  Returns `false` once the
/// socket is gone.
async fn send_event(ws_tx: &WsSink, event: &ServerEvent) -> bool {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            error!(event = event.name(), "JSON serialization error: {e}");
            return true;
        }
    };
    ws_tx.lock().await.send(WsMessage::Text(json)).await.is_ok()
}
