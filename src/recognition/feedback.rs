use super::traits::{Feedback, FeedbackMessage};
use crate::events::{DoorEvent, EventBus};
use chrono::Utc;
use tracing::{debug, info};

/// Writes visitor feedback to the log and the event bus, where a speech or
/// display front end can pick it up.
pub struct LoggingFeedback {
    event_bus: EventBus,
}

impl LoggingFeedback {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }
}

impl Feedback for LoggingFeedback {
    fn announce(&self, message: FeedbackMessage) {
        let text = message.to_string();
        info!(feedback = %text, "Visitor feedback");

        if let Err(e) = self.event_bus.publish(DoorEvent::Feedback {
            message: text,
            timestamp: Utc::now(),
        }) {
            debug!("Feedback event not delivered: {}", e);
        }
    }
}
