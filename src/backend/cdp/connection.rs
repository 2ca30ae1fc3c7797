//! DevTools WebSocket plumbing.
//!
//! One WebSocket carries every protocol exchange with the browser:
//! command/response pairs are correlated by id through a pending map, and
//! events are routed to per-session channels by their `sessionId`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use super::super::error::BackendError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

type PendingMap = HashMap<u64, oneshot::Sender<Result<Value, BackendError>>>;
type RouteMap = HashMap<String, mpsc::UnboundedSender<CdpEvent>>;

/// Outgoing protocol command.
#[derive(Debug, Serialize)]
struct CdpRequest<'a> {
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

/// Incoming protocol message: either a command response (has `id`) or an
/// event (has `method`).
#[derive(Debug, Deserialize)]
pub(crate) struct CdpMessage {
    pub id: Option<u64>,
    pub method: Option<String>,
    #[serde(default)]
    pub params: Value,
    pub result: Option<Value>,
    pub error: Option<CdpRemoteError>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// Error object attached to a rejected command.
#[derive(Debug, Deserialize)]
pub(crate) struct CdpRemoteError {
    pub code: i64,
    pub message: String,
}

/// A protocol event delivered to a page session.
#[derive(Debug, Clone)]
pub(crate) struct CdpEvent {
    pub method: String,
    pub params: Value,
}

/// Aborts the receive task when the last connection clone is dropped.
struct RecvTask(JoinHandle<()>);

impl Drop for RecvTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Shared handle to one DevTools WebSocket.
///
/// Cloning is cheap; all clones drive the same socket. The receive task is
/// aborted when the last clone goes away.
#[derive(Clone)]
pub(crate) struct CdpConnection {
    ws_tx: Arc<tokio::sync::Mutex<WsSink>>,
    next_id: Arc<AtomicU64>,
    pending: Arc<Mutex<PendingMap>>,
    routes: Arc<Mutex<RouteMap>>,
    call_timeout: Duration,
    _recv_task: Arc<RecvTask>,
}

impl CdpConnection {
    /// Connects to the browser's WebSocket debugger URL.
    pub(crate) async fn connect(
        ws_url: &str,
        call_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| BackendError::launch(format!("DevTools WebSocket: {e}")))?;

        let (ws_sink, ws_source) = ws_stream.split();
        let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));
        let routes: Arc<Mutex<RouteMap>> = Arc::new(Mutex::new(HashMap::new()));

        let recv_task = {
            let pending = Arc::clone(&pending);
            let routes = Arc::clone(&routes);
            tokio::spawn(async move {
                receive_loop(ws_source, pending, routes).await;
            })
        };

        debug!(ws_url = %ws_url, "DevTools connection established");

        Ok(Self {
            ws_tx: Arc::new(tokio::sync::Mutex::new(ws_sink)),
            next_id: Arc::new(AtomicU64::new(1)),
            pending,
            routes,
            call_timeout,
            _recv_task: Arc::new(RecvTask(recv_task)),
        })
    }

    /// Sends a command and waits for its response.
    pub(crate) async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        session_id: Option<&str>,
    ) -> Result<Value, BackendError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = CdpRequest {
            id,
            method,
            params,
            session_id,
        };
        let json = serde_json::to_string(&request)
            .map_err(|e| BackendError::protocol(method, e.to_string()))?;
        trace!(send = %json, "DevTools send");

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        {
            let mut ws = self.ws_tx.lock().await;
            ws.send(Message::Text(json.into()))
                .await
                .map_err(|e| BackendError::protocol(method, e.to_string()))?;
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BackendError::protocol(method, "connection closed")),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(BackendError::protocol(method, "timed out"))
            }
        }
    }

    /// Registers an event channel for `session_id` and returns its receiver.
    pub(crate) fn subscribe(&self, session_id: &str) -> mpsc::UnboundedReceiver<CdpEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.lock().insert(session_id.to_string(), tx);
        rx
    }

    /// Drops the event channel for `session_id`.
    pub(crate) fn unsubscribe(&self, session_id: &str) {
        self.routes.lock().remove(session_id);
    }
}

/// Reads the socket until it closes, completing pending commands and
/// routing events.
async fn receive_loop(
    mut ws_source: WsSource,
    pending: Arc<Mutex<PendingMap>>,
    routes: Arc<Mutex<RouteMap>>,
) {
    while let Some(msg) = ws_source.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                trace!(recv = %text, "DevTools recv");
                let parsed: CdpMessage = match serde_json::from_str(&text) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!(error = %e, "unparseable DevTools message");
                        continue;
                    }
                };
                dispatch(parsed, &pending, &routes);
            }
            Ok(Message::Close(_)) => {
                debug!("DevTools WebSocket closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "DevTools WebSocket error");
                break;
            }
            _ => {}
        }
    }
}

fn dispatch(message: CdpMessage, pending: &Mutex<PendingMap>, routes: &Mutex<RouteMap>) {
    if let Some(id) = message.id {
        let Some(tx) = pending.lock().remove(&id) else {
            return;
        };
        let result = match message.error {
            Some(error) => Err(BackendError::protocol(
                "devtools",
                format!("{} (code {})", error.message, error.code),
            )),
            None => Ok(message.result.unwrap_or(Value::Null)),
        };
        let _ = tx.send(result);
    } else if let Some(method) = message.method {
        let session_key = message.session_id.unwrap_or_default();
        let routes = routes.lock();
        if let Some(tx) = routes.get(&session_key) {
            let _ = tx.send(CdpEvent {
                method,
                params: message.params,
            });
        }
    }
}
