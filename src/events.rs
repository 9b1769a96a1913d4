use crate::error::EventBusError;
use crate::guard::{SuppressReason, TriggerSource};
use crate::recognition::CycleOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur at the door
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DoorEvent {
    /// Presence state flipped
    PresenceChanged {
        near: bool,
        distance_cm: Option<f64>,
        timestamp: DateTime<Utc>,
    },
    /// Physical or virtual doorbell pressed
    DoorbellPressed {
        source: TriggerSource,
        timestamp: DateTime<Utc>,
    },
    /// A recognition cycle took the trigger guard
    CycleStarted {
        cycle_id: Uuid,
        source: TriggerSource,
        timestamp: DateTime<Utc>,
    },
    /// A recognition cycle released the trigger guard
    CycleCompleted {
        cycle_id: Uuid,
        source: TriggerSource,
        outcome: CycleOutcome,
        timestamp: DateTime<Utc>,
    },
    /// A trigger was dropped instead of starting a cycle
    TriggerSuppressed {
        source: TriggerSource,
        reason: SuppressReason,
        timestamp: DateTime<Utc>,
    },
    /// The lock was released for a recognised visitor
    DoorUnlocked {
        identity: String,
        duration_secs: u64,
        timestamp: DateTime<Utc>,
    },
    /// Message handed to the visitor
    Feedback {
        message: String,
        timestamp: DateTime<Utc>,
    },
    /// A hardware component became available or unavailable
    HardwareStatusChanged {
        component: String,
        available: bool,
        timestamp: DateTime<Utc>,
    },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
    /// System shutdown requested
    ShutdownRequested {
        timestamp: DateTime<Utc>,
        reason: String,
    },
}

impl DoorEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DoorEvent::PresenceChanged { timestamp, .. } => *timestamp,
            DoorEvent::DoorbellPressed { timestamp, .. } => *timestamp,
            DoorEvent::CycleStarted { timestamp, .. } => *timestamp,
            DoorEvent::CycleCompleted { timestamp, .. } => *timestamp,
            DoorEvent::TriggerSuppressed { timestamp, .. } => *timestamp,
            DoorEvent::DoorUnlocked { timestamp, .. } => *timestamp,
            DoorEvent::Feedback { timestamp, .. } => *timestamp,
            DoorEvent::HardwareStatusChanged { timestamp, .. } => *timestamp,
            DoorEvent::SystemError { .. } => Utc::now(),
            DoorEvent::ShutdownRequested { timestamp, .. } => *timestamp,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            DoorEvent::PresenceChanged {
                near, distance_cm, ..
            } => match (near, distance_cm) {
                (true, Some(distance)) => format!("Visitor near ({:.1} cm)", distance),
                (true, None) => "Visitor near".to_string(),
                (false, _) => "Visitor left".to_string(),
            },
            DoorEvent::DoorbellPressed { source, .. } => format!("Doorbell pressed ({})", source),
            DoorEvent::CycleStarted {
                cycle_id, source, ..
            } => format!("Recognition cycle {} started by {}", cycle_id, source),
            DoorEvent::CycleCompleted {
                cycle_id, outcome, ..
            } => format!("Recognition cycle {} finished: {}", cycle_id, outcome),
            DoorEvent::TriggerSuppressed { source, reason, .. } => {
                format!("{} trigger suppressed: {:?}", source, reason)
            }
            DoorEvent::DoorUnlocked {
                identity,
                duration_secs,
                ..
            } => format!("Door unlocked for {} ({}s)", identity, duration_secs),
            DoorEvent::Feedback { message, .. } => format!("Feedback: {}", message),
            DoorEvent::HardwareStatusChanged {
                component,
                available,
                ..
            } => format!(
                "{} {}",
                component,
                if *available { "available" } else { "unavailable" }
            ),
            DoorEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
            DoorEvent::ShutdownRequested { reason, .. } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            DoorEvent::PresenceChanged { .. } => "presence_changed",
            DoorEvent::DoorbellPressed { .. } => "doorbell_pressed",
            DoorEvent::CycleStarted { .. } => "cycle_started",
            DoorEvent::CycleCompleted { .. } => "cycle_completed",
            DoorEvent::TriggerSuppressed { .. } => "trigger_suppressed",
            DoorEvent::DoorUnlocked { .. } => "door_unlocked",
            DoorEvent::Feedback { .. } => "feedback",
            DoorEvent::HardwareStatusChanged { .. } => "hardware_status_changed",
            DoorEvent::SystemError { .. } => "system_error",
            DoorEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Event bus for component coordination using broadcast channels.
/// Publishing never blocks, so it is safe from interrupt callbacks.
pub struct EventBus {
    sender: broadcast::Sender<DoorEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: true,
        }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<DoorEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter
    pub fn subscribe_filtered(&self, filter: EventFilter, name: &str) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.to_string())
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: DoorEvent) -> Result<usize, EventBusError> {
        if self.debug_logging {
            debug!("Publishing event: {}", event.description());
        }

        // Log important events at appropriate levels
        match &event {
            DoorEvent::DoorUnlocked { identity, .. } => {
                info!("Door unlocked for {}", identity);
            }
            DoorEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            DoorEvent::HardwareStatusChanged {
                component,
                available,
                ..
            } => {
                if *available {
                    info!("{} available", component);
                } else {
                    warn!("{} unavailable", component);
                }
            }
            DoorEvent::ShutdownRequested { reason, .. } => {
                info!("Shutdown requested: {}", reason);
            }
            _ => {
                if self.debug_logging {
                    debug!("Event: {}", event.description());
                }
            }
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            debug_logging: self.debug_logging,
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Accept events from specific components (for SystemError events)
    Components(Vec<String>),
    /// Custom filter function
    Custom(fn(&DoorEvent) -> bool),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &DoorEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Components(components) => match event {
                DoorEvent::SystemError { component, .. }
                | DoorEvent::HardwareStatusChanged { component, .. } => {
                    components.contains(component)
                }
                _ => false,
            },
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<DoorEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    /// Create a new event receiver with a filter
    pub fn new(receiver: broadcast::Receiver<DoorEvent>, filter: EventFilter, name: String) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<DoorEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                    // Continue loop to get next event if this one doesn't match filter
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<DoorEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => {
                    return Ok(None);
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let event = DoorEvent::DoorbellPressed {
            source: TriggerSource::Doorbell,
            timestamp: Utc::now(),
        };

        let subscriber_count = event_bus.publish(event).unwrap();
        assert_eq!(subscriber_count, 1);

        let received_event = receiver.recv().await.unwrap();
        match received_event {
            DoorEvent::DoorbellPressed { source, .. } => {
                assert_eq!(source, TriggerSource::Doorbell);
            }
            _ => panic!("Unexpected event type"),
        }
    }

    #[tokio::test]
    async fn test_debug_bus_clone_shares_channel() {
        let event_bus = EventBus::with_debug_logging(4);
        let publisher = event_bus.clone();
        let mut receiver = event_bus.subscribe();

        publisher
            .publish(DoorEvent::Feedback {
                message: "Welcome alice".to_string(),
                timestamp: Utc::now(),
            })
            .unwrap();

        assert!(matches!(
            receiver.recv().await.unwrap(),
            DoorEvent::Feedback { .. }
        ));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_fails() {
        let event_bus = EventBus::new(10);
        assert!(!event_bus.has_subscribers());

        let result = event_bus.publish(DoorEvent::ShutdownRequested {
            timestamp: Utc::now(),
            reason: "test".to_string(),
        });
        assert!(matches!(result, Err(EventBusError::PublishFailed { .. })));
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let event_bus = EventBus::new(10);
        let mut filtered_receiver = event_bus.subscribe_filtered(
            EventFilter::EventTypes(vec!["door_unlocked"]),
            "test",
        );

        event_bus
            .publish(DoorEvent::PresenceChanged {
                near: true,
                distance_cm: Some(30.0),
                timestamp: Utc::now(),
            })
            .unwrap();
        event_bus
            .publish(DoorEvent::DoorUnlocked {
                identity: "alice".to_string(),
                duration_secs: 5,
                timestamp: Utc::now(),
            })
            .unwrap();

        // Should only receive the unlock event
        let received = timeout(Duration::from_millis(100), filtered_receiver.recv())
            .await
            .unwrap()
            .unwrap();
        match received {
            DoorEvent::DoorUnlocked { identity, .. } => assert_eq!(identity, "alice"),
            _ => panic!("Unexpected event type"),
        }
        assert!(filtered_receiver.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_component_filter() {
        let filter = EventFilter::Components(vec!["lock".to_string()]);

        assert!(filter.matches(&DoorEvent::HardwareStatusChanged {
            component: "lock".to_string(),
            available: false,
            timestamp: Utc::now(),
        }));
        assert!(!filter.matches(&DoorEvent::SystemError {
            component: "sensor".to_string(),
            error: "boom".to_string(),
        }));
    }

    #[test]
    fn test_event_properties() {
        let event = DoorEvent::PresenceChanged {
            near: true,
            distance_cm: Some(30.0),
            timestamp: Utc::now(),
        };

        assert_eq!(event.event_type(), "presence_changed");
        assert!(event.description().contains("30.0"));
    }
}
