//! Event bus for inter-component communication
//!
//! Uses tokio::sync::broadcast for pub/sub pattern.
//! Components publish at their observation points (connected, subsystem
//! changed, song changed, playcount written); nothing on the protocol path
//! depends on anyone listening.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Event types that can be published on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BusEvent {
    /// A command connection to the daemon was established
    MpdConnected { addr: String, version: String },

    /// The idle loop reported a subsystem change
    SubsystemChanged { subsystem: String },

    /// The tracker saw a new song id
    SongChanged {
        previous_file: Option<String>,
        played: bool,
    },

    /// A playcount sticker was written
    PlaycountIncremented {
        file: String,
        title: Option<String>,
        playcount: u64,
    },

    /// A service returned from its run loop
    ServiceStopped { service: String },

    /// System is shutting down
    ShuttingDown { reason: Option<String> },
}

impl BusEvent {
    /// Get the event type as a string (for logging/filtering)
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MpdConnected { .. } => "mpd_connected",
            Self::SubsystemChanged { .. } => "subsystem_changed",
            Self::SongChanged { .. } => "song_changed",
            Self::PlaycountIncremented { .. } => "playcount_incremented",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::ShuttingDown { .. } => "shutting_down",
        }
    }
}

/// Event bus handle for publishing and subscribing
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
}

impl EventBus {
    /// Create a new event bus with specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: BusEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Shared event bus wrapped in Arc for thread-safe sharing
pub type SharedBus = Arc<EventBus>;

/// Create a new shared event bus
pub fn create_bus() -> SharedBus {
    Arc::new(EventBus::default())
}
