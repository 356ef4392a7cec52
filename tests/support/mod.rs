//! Loopback perception device for integration tests
//!
//! `FakeDevice` is a WebSocket server on an ephemeral port. Tests push JSON to
//! the connected client and read back the commands the client sent.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::{accept_async, tungstenite::Message};

use edgesight::{BuildProfile, ClientUpdate, DetectionClient, MemorySettingsStore, Settings};

pub const WAIT: Duration = Duration::from_secs(3);

enum Control {
    Send(String),
    Close,
}

pub struct FakeDevice {
    pub url: String,
    control: mpsc::UnboundedSender<Control>,
    commands: mpsc::UnboundedReceiver<String>,
}

impl FakeDevice {
    /// Accepts any number of sequential connections
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (control, mut control_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let Ok(mut ws) = accept_async(stream).await else {
                    continue;
                };

                loop {
                    tokio::select! {
                        msg = ws.next() => match msg {
                            Some(Ok(Message::Text(text))) => {
                                let _ = commands_tx.send(text);
                            }
                            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                            Some(Ok(_)) => {}
                        },
                        ctl = control_rx.recv() => match ctl {
                            Some(Control::Send(text)) => {
                                if ws.send(Message::Text(text)).await.is_err() {
                                    break;
                                }
                            }
                            Some(Control::Close) => {
                                let _ = ws.close(None).await;
                                break;
                            }
                            None => return,
                        },
                    }
                }
            }
        });

        Self {
            url,
            control,
            commands,
        }
    }

    pub fn send(&self, json: impl Into<String>) {
        let _ = self.control.send(Control::Send(json.into()));
    }

    pub fn close(&self) {
        let _ = self.control.send(Control::Close);
    }

    /// Next command the client sent, if one arrives within `within`
    pub async fn next_command(&mut self, within: Duration) -> Option<serde_json::Value> {
        let text = tokio::time::timeout(within, self.commands.recv())
            .await
            .ok()??;
        serde_json::from_str(&text).ok()
    }
}

/// Listener that accepts TCP but holds the WebSocket handshake until released
pub struct StalledDevice {
    pub url: String,
    release: Option<oneshot::Sender<()>>,
}

impl StalledDevice {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (release, released) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            if released.await.is_err() {
                return;
            }
            if let Ok(mut ws) = accept_async(stream).await {
                // Keep the socket open until the client goes away
                while let Some(Ok(_)) = ws.next().await {}
            }
        });

        Self {
            url,
            release: Some(release),
        }
    }

    pub fn release(&mut self) {
        if let Some(tx) = self.release.take() {
            let _ = tx.send(());
        }
    }
}

pub fn client_for(url: &str) -> Arc<DetectionClient> {
    client_with(Settings {
        server_url: url.to_string(),
        ..Settings::default()
    })
}

pub fn client_with(settings: Settings) -> Arc<DetectionClient> {
    let store = Arc::new(MemorySettingsStore::with_settings(settings));
    Arc::new(DetectionClient::with_profile(store, BuildProfile::Development))
}

/// Wait for the first update matching `want`, skipping the rest
pub async fn wait_for<F>(updates: &mut broadcast::Receiver<ClientUpdate>, mut want: F) -> ClientUpdate
where
    F: FnMut(&ClientUpdate) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match updates.recv().await {
                Ok(update) if want(&update) => return update,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("update channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for client update")
}

/// Collect every update that arrives within `window`
pub async fn drain(updates: &mut broadcast::Receiver<ClientUpdate>, window: Duration) -> Vec<ClientUpdate> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Ok(update)) = tokio::time::timeout_at(deadline, updates.recv()).await {
        seen.push(update);
    }
    seen
}

pub fn person_batch() -> &'static str {
    r#"{"type":"detections","objects":[{"id":"1","label":"Person","confidence":0.92,"bbox":{"x":0.2,"y":0.3,"width":0.2,"height":0.4},"depth":2.5}]}"#
}
