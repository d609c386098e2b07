//! System Events
//!
//! Broadcast events the orchestration layer emits and the control plane
//! turns into status-stream frames. Producers never block on slow
//! consumers; the channel drops the oldest events instead.

use crate::core::model::{PhaseKind, PhaseStatus, RunStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Buffered events before the broadcast channel starts dropping
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// One significant transition somewhere in the system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SystemEvent {
    RunStarted {
        run_id: String,
        scraper_id: String,
    },
    RunFinished {
        run_id: String,
        scraper_id: String,
        status: RunStatus,
        records_new: i64,
        records_updated: i64,
    },
    PhaseChanged {
        session_id: String,
        phase: PhaseKind,
        status: PhaseStatus,
    },
    Alert {
        message: String,
    },
}

/// Shared broadcast bus for system events
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Emit an event; silently dropped when nobody listens
    pub fn emit(&self, event: SystemEvent) {
        let _ = self.sender.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
