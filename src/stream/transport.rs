//! Session transport
//!
//! Owns the one WebSocket session to the perception device.
//!
//! ```text
//!  Disconnected ──connect──► Connecting ──ok──► Connected ──close/disconnect──► Disconnected
//!        ▲                       │                  │
//!        │                       └──err/timeout──► Failed ◄──stream error──┘
//!        └────────── disconnect (from any state) ───┘
//! ```
//!
//! All state sits behind one `parking_lot::Mutex`. Every event is emitted while
//! that lock is held and only after checking the attempt number, so events from
//! a superseded attempt never reach the consumer.

use std::sync::{Arc, Once};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::error::ConnectionError;
use crate::settings::Endpoint;
use crate::stream::protocol::TrackingCommand;

type DeviceSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Event delivered to the transport's consumer, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected { session_id: String },
    Disconnected { reason: Option<String> },
    Message(String),
}

/// Point-in-time view of the session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub endpoint: Option<String>,
    pub last_error: Option<String>,
    pub session_id: Option<String>,
}

struct TransportInner {
    state: SessionState,
    endpoint: Option<Endpoint>,
    last_error: Option<String>,
    session_id: Option<String>,
    /// Bumped on every connect and disconnect; work tagged with an older
    /// value is stale
    attempt: u64,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    connect_timeout: Duration,
}

impl TransportInner {
    fn emit(&self, events: &mpsc::UnboundedSender<TransportEvent>, attempt: u64, event: TransportEvent) {
        if self.attempt == attempt {
            let _ = events.send(event);
        }
    }
}

static CRYPTO_PROVIDER: Once = Once::new();

/// rustls needs a process-wide crypto provider before the first `wss://`
/// handshake. An embedding app may already have installed its own.
fn install_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("rustls crypto provider already installed");
        }
    });
}

pub struct SessionTransport {
    inner: Arc<Mutex<TransportInner>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl SessionTransport {
    /// Create a transport and the receiver its events are delivered on.
    pub fn new(connect_timeout: Duration) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        install_crypto_provider();
        let (events, rx) = mpsc::unbounded_channel();
        let inner = TransportInner {
            state: SessionState::Disconnected,
            endpoint: None,
            last_error: None,
            session_id: None,
            attempt: 0,
            outbound: None,
            connect_timeout,
        };
        (
            Self {
                inner: Arc::new(Mutex::new(inner)),
                events,
            },
            rx,
        )
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn status(&self) -> SessionStatus {
        let inner = self.inner.lock();
        SessionStatus {
            state: inner.state,
            endpoint: inner.endpoint.as_ref().map(|e| e.to_string()),
            last_error: inner.last_error.clone(),
            session_id: inner.session_id.clone(),
        }
    }

    /// Applies from the next connection attempt on
    pub fn set_connect_timeout(&self, timeout: Duration) {
        self.inner.lock().connect_timeout = timeout;
    }

    /// Open a session to `endpoint`.
    ///
    /// Does nothing while already connected or connecting. If `disconnect`
    /// runs before the handshake finishes, the new socket is closed and no
    /// `Connected` event is emitted; this still returns `Ok`.
    pub async fn connect(&self, endpoint: &Endpoint) -> Result<(), ConnectionError> {
        let (attempt, timeout) = {
            let mut inner = self.inner.lock();
            if matches!(
                inner.state,
                SessionState::Connected | SessionState::Connecting
            ) {
                tracing::debug!("Connect ignored, session is {:?}", inner.state);
                return Ok(());
            }
            inner.attempt += 1;
            inner.state = SessionState::Connecting;
            inner.endpoint = Some(endpoint.clone());
            inner.last_error = None;
            inner.session_id = None;
            (inner.attempt, inner.connect_timeout)
        };

        tracing::info!("Connecting to {} (attempt {})", endpoint, attempt);
        if !endpoint.is_secure() {
            tracing::warn!("{} is unencrypted, allowed in development builds only", endpoint);
        }

        let result = match tokio::time::timeout(timeout, connect_async(endpoint.as_str())).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => Err(ConnectionError::Handshake {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(ConnectionError::Timeout {
                endpoint: endpoint.to_string(),
                after_ms: timeout.as_millis() as u64,
            }),
        };

        let mut inner = self.inner.lock();
        if inner.attempt != attempt {
            tracing::debug!("Connection attempt {} was superseded", attempt);
            return Ok(());
        }

        match result {
            Ok(ws) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let session_id = uuid::Uuid::new_v4().to_string();
                inner.state = SessionState::Connected;
                inner.outbound = Some(tx);
                inner.session_id = Some(session_id.clone());

                // The task has to take the lock before it can emit, so
                // `Connected` always goes out first.
                tokio::spawn(run_session(
                    ws,
                    rx,
                    Arc::clone(&self.inner),
                    self.events.clone(),
                    attempt,
                ));
                inner.emit(&self.events, attempt, TransportEvent::Connected { session_id });
                tracing::info!("Connected to {}", endpoint);
                Ok(())
            }
            Err(e) => {
                tracing::error!("{}", e);
                inner.state = SessionState::Failed;
                inner.last_error = Some(e.to_string());
                inner.emit(
                    &self.events,
                    attempt,
                    TransportEvent::Disconnected {
                        reason: Some(e.to_string()),
                    },
                );
                Err(e)
            }
        }
    }

    /// Close the session. Safe from any state; a second call is a no-op.
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Disconnected {
            return;
        }

        let previous = inner.state;
        inner.attempt += 1;
        // Dropping the sender makes the session task send a close frame
        inner.outbound = None;
        inner.session_id = None;
        inner.state = SessionState::Disconnected;
        let _ = self
            .events
            .send(TransportEvent::Disconnected { reason: None });
        tracing::info!("Disconnected (was {:?})", previous);
    }

    /// Queue a command for the device. Dropped when not connected.
    pub fn send(&self, command: &TrackingCommand) {
        let inner = self.inner.lock();
        let outbound = match (&inner.outbound, inner.state) {
            (Some(tx), SessionState::Connected) => tx,
            _ => {
                tracing::debug!("Dropping {:?}, session is {:?}", command, inner.state);
                return;
            }
        };

        match command.to_json() {
            Ok(json) => {
                if outbound.send(Message::Text(json)).is_err() {
                    tracing::debug!("Session task already gone, dropping {:?}", command);
                }
            }
            Err(e) => tracing::warn!("Failed to encode {:?}: {}", command, e),
        }
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        inner.attempt += 1;
        inner.outbound = None;
    }
}

enum SessionEnd {
    Closed,
    Failed(String),
}

/// Pump one socket until it closes, fails, or the transport lets go of it
async fn run_session(
    mut ws: DeviceSocket,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    inner: Arc<Mutex<TransportInner>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    attempt: u64,
) {
    let end = loop {
        tokio::select! {
            msg = ws.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        inner.lock().emit(&events, attempt, TransportEvent::Message(text));
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => {
                            inner.lock().emit(&events, attempt, TransportEvent::Message(text));
                        }
                        Err(_) => tracing::warn!("Ignoring non-UTF-8 binary message"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break SessionEnd::Closed,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break SessionEnd::Failed(e.to_string()),
                }
            }

            out = outbound.recv() => {
                match out {
                    Some(msg) => {
                        if let Err(e) = ws.send(msg).await {
                            break SessionEnd::Failed(e.to_string());
                        }
                    }
                    None => {
                        let _ = ws.close(None).await;
                        tracing::debug!("Session {} closed locally", attempt);
                        return;
                    }
                }
            }
        }
    };

    let mut guard = inner.lock();
    if guard.attempt != attempt {
        return;
    }
    guard.outbound = None;
    guard.session_id = None;

    match end {
        SessionEnd::Closed => {
            tracing::info!("Device closed the session");
            guard.state = SessionState::Disconnected;
            guard.emit(&events, attempt, TransportEvent::Disconnected { reason: None });
        }
        SessionEnd::Failed(message) => {
            let error = ConnectionError::Stream { message };
            tracing::error!("{}", error);
            guard.state = SessionState::Failed;
            guard.last_error = Some(error.to_string());
            guard.emit(
                &events,
                attempt,
                TransportEvent::Disconnected {
                    reason: Some(error.to_string()),
                },
            );
        }
    }
}
