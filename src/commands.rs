//! Outbound tracking commands
//!
//! Commands are fire-and-forget: nothing waits for the device to acknowledge
//! them, and a command issued while disconnected is simply lost.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::stream::protocol::TrackingCommand;
use crate::stream::transport::SessionTransport;

/// Anything that can carry a command to the device
pub trait CommandSink: Send + Sync {
    fn send_command(&self, command: &TrackingCommand);
}

impl CommandSink for SessionTransport {
    fn send_command(&self, command: &TrackingCommand) {
        self.send(command);
    }
}

/// Builds tracking commands and hands them to a [`CommandSink`]
#[derive(Clone)]
pub struct CommandEmitter {
    sink: Arc<dyn CommandSink>,
}

impl CommandEmitter {
    pub fn new(sink: Arc<dyn CommandSink>) -> Self {
        Self { sink }
    }

    pub fn emit_start_tracking(&self, object_id: &str) {
        tracing::info!("Start tracking object {}", object_id);
        self.sink.send_command(&TrackingCommand::StartTracking {
            object_id: object_id.to_string(),
        });
    }

    pub fn emit_stop_tracking(&self) {
        tracing::info!("Stop tracking");
        self.sink.send_command(&TrackingCommand::StopTracking);
    }
}

impl std::fmt::Debug for CommandEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandEmitter").finish_non_exhaustive()
    }
}

/// Sink that only records what it was given
#[derive(Debug, Default)]
pub struct CommandLog {
    sent: Mutex<Vec<TrackingCommand>>,
}

impl CommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<TrackingCommand> {
        self.sent.lock().clone()
    }
}

impl CommandSink for CommandLog {
    fn send_command(&self, command: &TrackingCommand) {
        self.sent.lock().push(command.clone());
    }
}
