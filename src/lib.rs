//! edgesight: live detection-stream client for remote perception devices
//!
//! An edge device (a Jetson-class host) runs detection, depth and tracking and
//! streams the results over a WebSocket. This crate keeps that session alive,
//! decodes the stream, and maintains a consistent view of the objects in
//! view, the user's selection and whether the device is tracking it.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use edgesight::{DetectionClient, TomlSettingsStore};
//!
//! # async fn demo() -> edgesight::Result<()> {
//! let client = DetectionClient::new(Arc::new(TomlSettingsStore::at_default_path()));
//! client.connect().await?;
//!
//! let mut updates = client.subscribe();
//! while updates.recv().await.is_ok() {
//!     let snapshot = client.snapshot();
//!     if let Some(first) = snapshot.objects.first() {
//!         client.select(Some(&first.id));
//!         client.start_tracking();
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod client;
pub mod commands;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod schema;
pub mod settings;
pub mod stream;

// Re-export commonly used types
pub use client::{ClientUpdate, DetectionClient};
pub use commands::{CommandEmitter, CommandLog, CommandSink};
pub use error::{
    ConfigurationError, ConnectionError, EdgeSightError, ProtocolError, Result, ValidationError,
};
pub use lifecycle::{AppPhase, LifecycleAction, LifecycleCoordinator};
pub use registry::{RegistrySnapshot, Sighting, TrackingRegistry};
pub use schema::{BoundingBox, DetectedObject, DetectionBatch, Frame};
pub use settings::{
    BuildProfile, Endpoint, MemorySettingsStore, Settings, SettingsStore, TomlSettingsStore,
};
pub use stream::{
    Decoder, SessionState, SessionStatus, SessionTransport, StreamEvent, TrackingCommand,
    TransportEvent,
};
