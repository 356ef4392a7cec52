//! Detection client
//!
//! Owns one session transport and one tracking registry and is the only thing
//! that writes to either.
//!
//! ```text
//!  device ──ws──► SessionTransport ──TransportEvent──► event loop ──► Decoder
//!                        ▲                                 │
//!                        │ TrackingCommand                 ▼
//!                 CommandEmitter ◄── select/track ── Mutex<TrackingRegistry> ──► snapshot()
//! ```
//!
//! Inbound events are applied by a single spawned task in arrival order. User
//! intents take the same registry mutex, so the two never interleave inside a
//! mutation. Observers get [`ClientUpdate`]s over a broadcast channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::commands::CommandEmitter;
use crate::error::Result;
use crate::lifecycle::{AppPhase, LifecycleAction, LifecycleCoordinator};
use crate::registry::{RegistrySnapshot, Sighting, TrackingRegistry};
use crate::settings::{load_settings_or_default, BuildProfile, Settings, SettingsStore};
use crate::stream::decoder::{Decoder, DecoderStats, StreamEvent};
use crate::stream::transport::{SessionState, SessionStatus, SessionTransport, TransportEvent};

/// How often the stale-object check runs
const EXPIRY_TICK: Duration = Duration::from_millis(250);

/// Something observers may want to re-render for
#[derive(Debug, Clone, PartialEq)]
pub enum ClientUpdate {
    Connected { session_id: String },
    Disconnected { reason: Option<String> },
    FrameUpdated,
    ObjectsUpdated { count: usize },
    ObjectsExpired,
    SelectionChanged { selected_id: Option<String> },
    TrackingChanged { enabled: bool },
}

pub struct DetectionClient {
    transport: Arc<SessionTransport>,
    registry: Arc<Mutex<TrackingRegistry>>,
    emitter: CommandEmitter,
    settings: RwLock<Settings>,
    store: Arc<dyn SettingsStore>,
    profile: BuildProfile,
    lifecycle: Mutex<LifecycleCoordinator>,
    updates: broadcast::Sender<ClientUpdate>,
    decoder_stats: Arc<Mutex<DecoderStats>>,
    stale_after_ms: Arc<AtomicU64>,
    event_loop: JoinHandle<()>,
}

impl DetectionClient {
    /// Build a client for the running binary's profile.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self::with_profile(store, BuildProfile::current())
    }

    pub fn with_profile(store: Arc<dyn SettingsStore>, profile: BuildProfile) -> Self {
        let settings = load_settings_or_default(store.as_ref());
        let (transport, events) =
            SessionTransport::new(Duration::from_millis(settings.connect_timeout_ms));
        let transport = Arc::new(transport);
        let emitter = CommandEmitter::new(transport.clone());

        let registry = Arc::new(Mutex::new(TrackingRegistry::new()));
        let (updates, _) = broadcast::channel(256);
        let decoder_stats = Arc::new(Mutex::new(DecoderStats::default()));
        let stale_after_ms = Arc::new(AtomicU64::new(settings.stale_after_ms));

        let event_loop = tokio::spawn(run_event_loop(
            events,
            Arc::clone(&registry),
            updates.clone(),
            Arc::clone(&decoder_stats),
            Arc::clone(&stale_after_ms),
        ));

        Self {
            transport,
            registry,
            emitter,
            settings: RwLock::new(settings),
            store,
            profile,
            lifecycle: Mutex::new(LifecycleCoordinator::default()),
            updates,
            decoder_stats,
            stale_after_ms,
            event_loop,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientUpdate> {
        self.updates.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        self.transport.status()
    }

    pub fn session_state(&self) -> SessionState {
        self.transport.state()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.registry.lock().snapshot()
    }

    /// Every object id seen by this client, most recently seen first.
    /// Kept across sessions.
    pub fn sightings(&self) -> Vec<(String, Sighting)> {
        self.registry.lock().sightings()
    }

    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    pub fn decoder_stats(&self) -> DecoderStats {
        *self.decoder_stats.lock()
    }

    /// Connect to the configured server.
    ///
    /// The URL is validated first; an invalid one never reaches the transport.
    pub async fn connect(&self) -> Result<()> {
        let (endpoint, timeout) = {
            let settings = self.settings.read();
            (
                settings.validate(self.profile)?,
                Duration::from_millis(settings.connect_timeout_ms),
            )
        };
        self.transport.set_connect_timeout(timeout);
        self.transport.connect(&endpoint).await?;
        Ok(())
    }

    pub fn disconnect(&self) {
        self.transport.disconnect();
        let mut registry = self.registry.lock();
        let before = Observed::of(&registry);
        registry.clear();
        before.publish_changes(&registry, &self.updates);
    }

    /// Select an object by id, or clear the selection
    pub fn select(&self, id: Option<&str>) -> bool {
        let mut registry = self.registry.lock();
        let before = Observed::of(&registry);
        let accepted = registry.select(id, &self.emitter);
        before.publish_changes(&registry, &self.updates);
        accepted
    }

    pub fn start_tracking(&self) -> bool {
        let mut registry = self.registry.lock();
        let before = Observed::of(&registry);
        let started = registry.start_tracking(&self.emitter);
        before.publish_changes(&registry, &self.updates);
        started
    }

    pub fn stop_tracking(&self) {
        let mut registry = self.registry.lock();
        let before = Observed::of(&registry);
        registry.stop_tracking(&self.emitter);
        before.publish_changes(&registry, &self.updates);
    }

    /// Validate, persist and adopt new settings.
    ///
    /// Invalid settings are rejected before anything is written. A failure to
    /// persist is logged and the new settings still apply for this run.
    pub fn update_settings(&self, settings: Settings) -> Result<()> {
        settings.validate(self.profile)?;

        if let Err(e) = self.store.save(&settings) {
            tracing::warn!("Failed to save settings: {}", e);
        }

        self.transport
            .set_connect_timeout(Duration::from_millis(settings.connect_timeout_ms));
        self.stale_after_ms
            .store(settings.stale_after_ms, Ordering::Relaxed);
        *self.settings.write() = settings;
        Ok(())
    }

    /// React to the host app changing visibility.
    ///
    /// Reconnecting is best effort: a failure is logged and left visible in
    /// [`DetectionClient::status`].
    pub async fn set_app_phase(&self, phase: AppPhase) -> Option<LifecycleAction> {
        let action = self
            .lifecycle
            .lock()
            .transition(phase, self.transport.state());

        match action {
            Some(LifecycleAction::Connect) => {
                tracing::debug!("App is in the foreground, reconnecting");
                if let Err(e) = self.connect().await {
                    tracing::warn!("Reconnect on resume failed: {}", e);
                }
            }
            Some(LifecycleAction::Disconnect) => {
                tracing::debug!("App left the foreground, disconnecting");
                self.disconnect();
            }
            None => {}
        }
        action
    }
}

impl Drop for DetectionClient {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

/// Selection state before a mutation, to diff against afterwards
struct Observed {
    selected_id: Option<String>,
    tracking_enabled: bool,
}

impl Observed {
    fn of(registry: &TrackingRegistry) -> Self {
        Self {
            selected_id: registry.selected_id().map(str::to_string),
            tracking_enabled: registry.tracking_enabled(),
        }
    }

    fn publish_changes(self, registry: &TrackingRegistry, updates: &broadcast::Sender<ClientUpdate>) {
        if self.selected_id.as_deref() != registry.selected_id() {
            let _ = updates.send(ClientUpdate::SelectionChanged {
                selected_id: registry.selected_id().map(str::to_string),
            });
        }
        if self.tracking_enabled != registry.tracking_enabled() {
            let _ = updates.send(ClientUpdate::TrackingChanged {
                enabled: registry.tracking_enabled(),
            });
        }
    }
}

async fn run_event_loop(
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    registry: Arc<Mutex<TrackingRegistry>>,
    updates: broadcast::Sender<ClientUpdate>,
    decoder_stats: Arc<Mutex<DecoderStats>>,
    stale_after_ms: Arc<AtomicU64>,
) {
    let mut decoder = Decoder::new();
    let mut expiry = tokio::time::interval(EXPIRY_TICK);
    expiry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                handle_transport_event(event, &mut decoder, &registry, &updates);
                *decoder_stats.lock() = decoder.stats();
            }

            _ = expiry.tick() => {
                let max_age = stale_after_ms.load(Ordering::Relaxed);
                if max_age == 0 {
                    continue;
                }
                let mut registry = registry.lock();
                let before = Observed::of(&registry);
                if registry.expire_stale(Instant::now(), Duration::from_millis(max_age)) {
                    let _ = updates.send(ClientUpdate::ObjectsExpired);
                    before.publish_changes(&registry, &updates);
                }
            }
        }
    }

    tracing::debug!("Transport event stream ended");
}

fn handle_transport_event(
    event: TransportEvent,
    decoder: &mut Decoder,
    registry: &Mutex<TrackingRegistry>,
    updates: &broadcast::Sender<ClientUpdate>,
) {
    match event {
        TransportEvent::Connected { session_id } => {
            let _ = updates.send(ClientUpdate::Connected { session_id });
        }
        TransportEvent::Disconnected { reason } => {
            let mut registry = registry.lock();
            let before = Observed::of(&registry);
            registry.clear();
            before.publish_changes(&registry, updates);
            let _ = updates.send(ClientUpdate::Disconnected { reason });
        }
        TransportEvent::Message(text) => {
            let Some(event) = decoder.decode(&text) else {
                return;
            };
            let mut registry = registry.lock();
            match event {
                StreamEvent::Frame(frame) => {
                    registry.apply_frame(frame);
                    let _ = updates.send(ClientUpdate::FrameUpdated);
                }
                StreamEvent::Detections { batch, frame } => {
                    if let Some(frame) = frame {
                        registry.apply_frame(frame);
                        let _ = updates.send(ClientUpdate::FrameUpdated);
                    }
                    let before = Observed::of(&registry);
                    registry.apply_detections(batch);
                    let _ = updates.send(ClientUpdate::ObjectsUpdated {
                        count: registry.len(),
                    });
                    before.publish_changes(&registry, updates);
                }
            }
        }
    }
}
