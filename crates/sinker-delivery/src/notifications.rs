//! Notification fan-out: observability reactions to lifecycle messages.
//!
//! Pure reaction layer. Every lifecycle transition published on the
//! notifications topic lands here and turns into a structured log line;
//! nothing in this module touches the event store or triggers dispatch.

use sinker_core::{LifecycleMessage, NotificationType};
use tracing::{info, warn};

/// Routes lifecycle messages to log-based alerts by transition type.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationRouter;

impl NotificationRouter {
    /// Creates a new router.
    pub fn new() -> Self {
        Self
    }

    /// Reacts to one lifecycle message.
    ///
    /// Returns the recognized transition for callers that want to observe
    /// the classification; unknown wire tags are logged and dropped as
    /// `None` rather than failing, so a newer producer never wedges an older
    /// consumer.
    pub fn process(&self, message: &LifecycleMessage) -> Option<NotificationType> {
        let kind = message.notification_type();
        match kind {
            Some(NotificationType::NewEvent) => {
                info!(
                    event_id = %message.event_id,
                    url = %message.url,
                    "event accepted for delivery"
                );
            },
            Some(NotificationType::Success) => {
                info!(
                    event_id = %message.event_id,
                    url = %message.url,
                    attempts = message.attempts,
                    "delivery confirmed"
                );
            },
            Some(NotificationType::Failure) => {
                if let Some(error) = &message.error_message {
                    warn!(
                        event_id = %message.event_id,
                        url = %message.url,
                        attempts = message.attempts,
                        max_attempts = message.max_attempts,
                        error = %error,
                        "delivery failed terminally"
                    );
                } else {
                    warn!(
                        event_id = %message.event_id,
                        url = %message.url,
                        attempts = message.attempts,
                        max_attempts = message.max_attempts,
                        "delivery failed terminally"
                    );
                }
            },
            Some(NotificationType::Retry) => {
                info!(
                    event_id = %message.event_id,
                    url = %message.url,
                    attempts = message.attempts,
                    max_attempts = message.max_attempts,
                    "manual retry requested"
                );
            },
            None => {
                warn!(
                    event_id = %message.event_id,
                    notification_type = %message.notification_type,
                    "unknown notification type, dropping"
                );
            },
        }
        kind
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use sinker_core::{EventId, EventStatus, HttpMethod, WebhookEvent};

    use super::*;

    fn message_with_type(notification_type: &str) -> LifecycleMessage {
        let now = Utc::now();
        let event = WebhookEvent {
            id: EventId::new(),
            url: "https://hooks.example.com/orders".to_string(),
            method: HttpMethod::Post,
            headers: None,
            payload: None,
            status: EventStatus::Failed,
            attempts: 3,
            max_attempts: 3,
            response_time_ms: Some(120),
            error_message: Some("connection refused".to_string()),
            created_at: now,
            updated_at: now,
        };
        let mut message = LifecycleMessage::snapshot(&event, NotificationType::Failure, now);
        message.notification_type = notification_type.to_string();
        message
    }

    #[test]
    fn known_transitions_are_classified() {
        let router = NotificationRouter::new();
        assert_eq!(
            router.process(&message_with_type("NEW_EVENT")),
            Some(NotificationType::NewEvent)
        );
        assert_eq!(
            router.process(&message_with_type("SUCCESS")),
            Some(NotificationType::Success)
        );
        assert_eq!(
            router.process(&message_with_type("FAILURE")),
            Some(NotificationType::Failure)
        );
        assert_eq!(router.process(&message_with_type("RETRY")), Some(NotificationType::Retry));
    }

    #[test]
    fn unknown_transitions_are_dropped_without_error() {
        let router = NotificationRouter::new();
        assert_eq!(router.process(&message_with_type("PAUSED")), None);
        assert_eq!(router.process(&message_with_type("")), None);
    }
}
