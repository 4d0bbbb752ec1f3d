//! Event bus for session coordination.
//!
//! Pub/sub messaging over a Tokio broadcast channel. Publishing is
//! fire-and-forget: subscribers receive on their own tasks and can never
//! block the publisher. There is no persistence and no replay — a component
//! that needs history must consume and store events itself (the context
//! store exists for exactly that reason).

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::types::SessionEvent;

/// Channel capacity for broadcast.
const CHANNEL_CAPACITY: usize = 512;

/// Error type for event bus operations.
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Failed to send event: {0}")]
    SendFailed(String),

    #[error("Channel closed")]
    ChannelClosed,
}

/// Result type for event bus operations.
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Shared reference to EventBus.
pub type SharedEventBus = Arc<EventBus>;

/// Broadcast-backed event bus.
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    /// Create a new event bus.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this event bus.
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all current subscribers.
    ///
    /// Delivery order is the publish order for every subscriber. An event
    /// with no receivers is not an error.
    pub fn publish(&self, event: SessionEvent) -> EventBusResult<()> {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => {
                debug!(event_type, receivers = count, "Event published");
                Ok(())
            }
            Err(_) => {
                debug!(event_type, "Event published (no receivers)");
                Ok(())
            }
        }
    }

    /// Subscribe to receive all events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by agent id.
    pub agent_id: Option<String>,
    /// Filter by exchange id.
    pub exchange_id: Option<String>,
    /// Filter by event types.
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Create a new empty filter (matches all events).
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by agent id.
    pub fn agent(mut self, agent_id: &str) -> Self {
        self.agent_id = Some(agent_id.to_string());
        self
    }

    /// Filter by exchange id.
    pub fn exchange(mut self, exchange_id: &str) -> Self {
        self.exchange_id = Some(exchange_id.to_string());
        self
    }

    /// Filter by event types.
    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    /// Check if an event matches this filter.
    pub fn matches(&self, event: &SessionEvent) -> bool {
        if let Some(ref aid) = self.agent_id {
            if event.agent_id() != Some(aid.as_str()) {
                return false;
            }
        }

        if let Some(ref eid) = self.exchange_id {
            if event.exchange_id() != Some(eid.as_str()) {
                return false;
            }
        }

        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        true
    }
}

/// Filtered event receiver that only yields matching events.
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<SessionEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    /// Create a new filtered receiver.
    pub fn new(receiver: broadcast::Receiver<SessionEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next matching event.
    pub async fn recv(&mut self) -> Result<SessionEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// Extension trait for subscribing with filters.
pub trait EventBusExt {
    /// Subscribe with a filter.
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver;
}

impl EventBusExt for EventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

impl EventBusExt for SharedEventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

/// Run a handler for every event on its own task.
///
/// Handler errors are caught and logged here, at the bus boundary — they
/// never reach the publisher or any other subscriber. A lagged receiver is
/// logged and resumes from the oldest retained event.
pub fn spawn_handler<F>(bus: &EventBus, name: &str, mut handler: F) -> JoinHandle<()>
where
    F: FnMut(SessionEvent) -> anyhow::Result<()> + Send + 'static,
{
    let mut receiver = bus.subscribe();
    let name = name.to_string();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let event_type = event.event_type();
                    if let Err(e) = handler(event) {
                        warn!(handler = %name, event_type, "Event handler failed: {:#}", e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(handler = %name, skipped, "Event handler lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
