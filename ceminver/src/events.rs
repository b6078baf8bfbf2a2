//! Progress events emitted during a search session.
//!
//! The orchestrator publishes these on a Tokio broadcast channel; the
//! presentation layer subscribes and renders them however it likes. The
//! core never depends on any UI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::{CompilerTarget, TaskSnapshot, TaskStatus};

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// All session progress events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchEvent {
    /// A session started with one task per target
    SessionStarted {
        session_id: String,
        targets: usize,
        timestamp: DateTime<Utc>,
    },

    /// A task's latest snapshot (emitted after every probe)
    TaskUpdated {
        session_id: String,
        snapshot: TaskSnapshot,
        timestamp: DateTime<Utc>,
    },

    /// A task reached a terminal state
    TaskFinished {
        session_id: String,
        target: CompilerTarget,
        status: TaskStatus,
        probes_issued: u32,
        timestamp: DateTime<Utc>,
    },

    /// Every task of the session reached a terminal state
    SessionFinished {
        session_id: String,
        completed: usize,
        timestamp: DateTime<Utc>,
    },
}

impl SearchEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::TaskUpdated { .. } => "task_updated",
            Self::TaskFinished { .. } => "task_finished",
            Self::SessionFinished { .. } => "session_finished",
        }
    }

    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::SessionStarted { timestamp, .. } => *timestamp,
            Self::TaskUpdated { timestamp, .. } => *timestamp,
            Self::TaskFinished { timestamp, .. } => *timestamp,
            Self::SessionFinished { timestamp, .. } => *timestamp,
        }
    }

    /// Get the session this event belongs to
    pub fn session_id(&self) -> &str {
        match self {
            Self::SessionStarted { session_id, .. } => session_id,
            Self::TaskUpdated { session_id, .. } => session_id,
            Self::TaskFinished { session_id, .. } => session_id,
            Self::SessionFinished { session_id, .. } => session_id,
        }
    }
}

/// Broadcast bus for session progress events.
///
/// Cloning shares the underlying channel. Publishing never fails: events
/// with no subscribers are simply dropped.
#[derive(Clone)]
pub struct ProgressBus {
    sender: broadcast::Sender<SearchEvent>,
}

impl ProgressBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: SearchEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "event published"),
            Err(_) => debug!(event_type, "event published (no receivers)"),
        }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<SearchEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}
