//! Event-driven communication between the daemon's services.

use anyhow::Result;
use tokio::sync::broadcast;

use crate::status::StatusSnapshot;

/// Application events for inter-service communication.
#[derive(Debug, Clone)]
pub enum Event {
    /// A control cycle finished; carries the resulting status.
    CycleCompleted(StatusSnapshot),
    /// The control loop hit a fatal error and stopped.
    ControlFailed(String),
}

/// Event bus for publish-subscribe messaging between services.
///
/// # Example
///
/// ```no_run
/// use hwfand::event::{Event, EventBus};
///
/// let event_bus = EventBus::new();
/// let mut subscriber = event_bus.subscribe();
///
/// event_bus.publish(Event::ControlFailed("pwm1 vanished".into())).unwrap();
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Creates a new EventBus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns an error if there are no active subscribers.
    pub fn publish(&self, event: Event) -> Result<()> {
        self.sender.send(event)?;
        Ok(())
    }

    /// Each subscriber receives all events published after subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
