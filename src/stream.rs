//! Event stream boundary.
//!
//! The client only starts and stops a stream handler and watches the
//! [`StreamStatus`] flag the handler writes into the session. Frame parsing
//! belongs to the handler. [`WebSocketStream`] is the stock handler: it
//! connects to the controller's `socket<token>` endpoint and forwards each
//! text frame as JSON.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;
use tokio_util::sync::CancellationToken;

use crate::session::{SessionState, StreamStatus};

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// What a handler is given when the client builds it.
#[derive(Clone)]
pub struct StreamContext {
    pub session: Arc<SessionState>,
    /// `ws[s]://<host>/socket<token>` for the current session.
    pub socket_url: String,
    /// Cancelled when the session resets or the client stops the stream.
    pub cancel: CancellationToken,
}

/// A push channel tied to one session.
pub trait EventStream: Send + Sync {
    /// Begin connecting. Must not block; progress is reported through the
    /// session's stream status.
    fn start(&self);

    /// Ask the handler to close. Safe to call more than once.
    fn stop(&self);
}

/// WebSocket handler delivering each text frame as a JSON value.
///
/// The receiver returned by [`WebSocketStream::new`] yields `None` once the
/// connection is over, however it ended.
pub struct WebSocketStream {
    ctx: StreamContext,
    /// Handed to the connection task on start.
    events_tx: Mutex<Option<mpsc::Sender<serde_json::Value>>>,
}

impl WebSocketStream {
    /// Build a handler and the receiver its events arrive on.
    pub fn new(
        ctx: StreamContext,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<serde_json::Value>) {
        let (events_tx, events_rx) = mpsc::channel(capacity);
        let stream = Arc::new(Self {
            ctx,
            events_tx: Mutex::new(Some(events_tx)),
        });
        (stream, events_rx)
    }
}

impl EventStream for WebSocketStream {
    fn start(&self) {
        let Some(events_tx) = self.events_tx.lock().take() else {
            return;
        };
        self.ctx.session.set_stream_status(StreamStatus::Opening);
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let connect = tokio::select! {
                _ = ctx.cancel.cancelled() => return,
                r = tokio_tungstenite::connect_async(ctx.socket_url.as_str()) => r,
            };
            match connect {
                Ok((ws, _)) => {
                    ctx.session.set_stream_status(StreamStatus::Open);
                    tracing::info!(host = %ctx.session.host(), "event stream open");
                    run_stream(ws, &events_tx, &ctx.cancel).await;
                }
                Err(e) => {
                    tracing::warn!(host = %ctx.session.host(), error = %e, "event stream connect failed");
                }
            }
            // When cancelled, whoever cancelled already owns the status.
            if !ctx.cancel.is_cancelled() {
                ctx.session.set_stream_status(StreamStatus::Closed);
                tracing::warn!(host = %ctx.session.host(), "event stream closed by controller");
            }
        });
    }

    fn stop(&self) {
        // A handler stopped before it started must still end the receiver.
        self.events_tx.lock().take();
        if !self.ctx.cancel.is_cancelled() {
            self.ctx.cancel.cancel();
            self.ctx.session.set_stream_status(StreamStatus::Closed);
            tracing::debug!("event stream stopped");
        }
    }
}

async fn run_stream(
    ws: WsStream,
    events_tx: &mpsc::Sender<serde_json::Value>,
    cancel: &CancellationToken,
) {
    let (mut sink, mut stream) = ws.split();
    let mut ping_interval = tokio::time::interval(Duration::from_secs(30));
    ping_interval.tick().await; // Skip the first immediate tick.

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<serde_json::Value>(text.as_str()) {
                            Ok(event) => {
                                if events_tx.send(event).await.is_err() {
                                    // Nobody is listening any more.
                                    break;
                                }
                            }
                            Err(e) => tracing::debug!(error = %e, "dropping non-JSON frame"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            _ = ping_interval.tick() => {
                if sink.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

/// Derive the event socket URL from the REST base URL and session token.
pub fn socket_url(base_url: &str, token: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("wss://{base}")
    };
    format!("{ws_base}/socket{token}")
}
