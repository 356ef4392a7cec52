//! App lifecycle handling
//!
//! The session is closed while the app is not visible and reopened when it
//! comes back to the foreground.

use crate::stream::transport::SessionState;

/// Visibility phase reported by the host app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppPhase {
    #[default]
    Active,
    Inactive,
    Background,
}

impl AppPhase {
    pub fn is_foreground(self) -> bool {
        self == Self::Active
    }
}

/// What the session owner should do after a phase change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Connect,
    Disconnect,
}

#[derive(Debug, Default)]
pub struct LifecycleCoordinator {
    phase: AppPhase,
}

impl LifecycleCoordinator {
    pub fn new(initial: AppPhase) -> Self {
        Self { phase: initial }
    }

    pub fn phase(&self) -> AppPhase {
        self.phase
    }

    /// Record the new phase and decide what to do with the session.
    ///
    /// Only edges between foreground and not-foreground act; moving between
    /// `Inactive` and `Background` does nothing.
    pub fn transition(&mut self, next: AppPhase, session: SessionState) -> Option<LifecycleAction> {
        let previous = std::mem::replace(&mut self.phase, next);
        match (previous.is_foreground(), next.is_foreground()) {
            (false, true) => match session {
                SessionState::Connected | SessionState::Connecting => None,
                SessionState::Disconnected | SessionState::Failed => Some(LifecycleAction::Connect),
            },
            (true, false) => Some(LifecycleAction::Disconnect),
            _ => None,
        }
    }
}
