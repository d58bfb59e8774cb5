//! Delivery dispatcher: executes single delivery attempts.
//!
//! A dispatch loads the event, issues exactly one HTTP call, and commits the
//! outcome with a compare-and-swap on the attempts counter. Concurrent
//! attempts on the same event each re-read and re-apply on conflict, so every
//! executed attempt lands in the counter and none is lost. Any HTTP response
//! counts as delivered; only transport failures consume a retry.

use std::{collections::HashMap, sync::Arc};

use sinker_bus::{EventBus, Topic};
use sinker_core::{
    Clock, EventId, EventStatus, EventStore, LifecycleMessage, NotificationType, WebhookEvent,
};
use tracing::{debug, error, info, warn};

use crate::{
    client::{DeliveryClient, DeliveryRequest, RequestBody},
    retry::backoff_delay,
};

/// Outcome of the HTTP leg of an attempt, before it is committed.
#[derive(Debug)]
enum AttemptOutcome {
    /// The endpoint answered; the status code is recorded, not judged.
    Delivered { status: u16 },
    /// No response arrived; the error message is recorded on the event.
    Failed { error: String },
}

/// Executes delivery attempts and transitions event state.
///
/// Cheap to clone: all fields are shared handles, and each dispatch runs in
/// its own spawned task.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    store: Arc<dyn EventStore>,
    client: DeliveryClient,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    /// Creates a dispatcher over the given store, client, and bus.
    pub fn new(
        store: Arc<dyn EventStore>,
        client: DeliveryClient,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, client, bus, clock }
    }

    /// Fires off one delivery attempt and returns immediately.
    ///
    /// Completion is observed through the store or a lifecycle message,
    /// never through a return value.
    pub fn dispatch(&self, event_id: EventId) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher.run_attempt(event_id).await;
        });
    }

    /// Schedules a dispatch after the exponential backoff for
    /// `attempt_number`.
    ///
    /// The delay suspends its own spawned task via the injected clock, so a
    /// retry storm parks timers instead of workers.
    pub fn dispatch_after_backoff(&self, event_id: EventId, attempt_number: i32) {
        let dispatcher = self.clone();
        let delay = backoff_delay(attempt_number);
        tokio::spawn(async move {
            debug!(
                event_id = %event_id,
                delay_secs = delay.as_secs(),
                "waiting out backoff before re-dispatch"
            );
            dispatcher.clock.sleep(delay).await;
            dispatcher.run_attempt(event_id).await;
        });
    }

    /// Executes exactly one delivery attempt for `event_id`.
    ///
    /// Awaitable form of [`dispatch`](Self::dispatch) for the scheduler and
    /// tests. A missing event is a no-op: it may have been deleted while the
    /// trigger was in flight.
    pub async fn run_attempt(&self, event_id: EventId) {
        let event = match self.store.get(event_id).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!(event_id = %event_id, "skipping dispatch, event no longer exists");
                return;
            },
            Err(error) => {
                error!(event_id = %event_id, %error, "failed to load event for dispatch");
                return;
            },
        };

        let request = build_request(&event);
        let started = self.clock.now();
        let result = self.client.deliver(&request).await;
        let latency = self.clock.now().saturating_duration_since(started);
        let latency_ms = i64::try_from(latency.as_millis()).unwrap_or(i64::MAX);

        let outcome = match result {
            Ok(response) => AttemptOutcome::Delivered { status: response.status },
            Err(error) => AttemptOutcome::Failed { error: error.to_string() },
        };

        self.commit(event, &outcome, latency_ms).await;
    }

    /// Commits an attempt outcome with a compare-and-swap on the attempts
    /// counter, re-reading and re-applying on conflict.
    ///
    /// The write is dropped only when the attempt budget is exhausted,
    /// whether at load time or by a concurrent attempt, or when the row has
    /// been deleted; otherwise every executed attempt increments the counter
    /// exactly once.
    async fn commit(&self, mut event: WebhookEvent, outcome: &AttemptOutcome, latency_ms: i64) {
        loop {
            // Duplicate triggers can race an attempt onto a row whose budget
            // is already spent; its result must never push the counter past
            // the budget.
            if event.attempts_exhausted() {
                warn!(
                    event_id = %event.id,
                    attempts = event.attempts,
                    "dropping attempt result, attempt budget already exhausted"
                );
                return;
            }

            let expected_attempts = event.attempts;
            let (updated, emission) = apply_outcome(event, outcome, latency_ms);

            match self.store.save_if_attempts(&updated, expected_attempts).await {
                Ok(true) => {
                    self.log_committed(&updated, outcome, latency_ms);
                    if let Some(kind) = emission {
                        let message =
                            LifecycleMessage::snapshot(&updated, kind, self.clock.now_utc());
                        self.bus.publish_lifecycle(Topic::WebhookNotifications, &message);
                    }
                    return;
                },
                Ok(false) => match self.store.get(updated.id).await {
                    Ok(Some(fresh)) => {
                        debug!(
                            event_id = %updated.id,
                            attempts = fresh.attempts,
                            "concurrent attempt committed first, re-applying outcome"
                        );
                        event = fresh;
                    },
                    Ok(None) => {
                        debug!(
                            event_id = %updated.id,
                            "dropping attempt result, event deleted mid-flight"
                        );
                        return;
                    },
                    Err(error) => {
                        error!(
                            event_id = %updated.id,
                            %error,
                            "failed to re-read event after write conflict"
                        );
                        return;
                    },
                },
                Err(error) => {
                    error!(event_id = %updated.id, %error, "failed to persist attempt result");
                    return;
                },
            }
        }
    }

    fn log_committed(&self, event: &WebhookEvent, outcome: &AttemptOutcome, latency_ms: i64) {
        match outcome {
            AttemptOutcome::Delivered { status } => info!(
                event_id = %event.id,
                status = *status,
                attempts = event.attempts,
                latency_ms,
                "webhook delivered"
            ),
            AttemptOutcome::Failed { error } if event.status == EventStatus::Failed => error!(
                event_id = %event.id,
                attempts = event.attempts,
                max_attempts = event.max_attempts,
                error = %error,
                "delivery failed, attempt budget exhausted"
            ),
            AttemptOutcome::Failed { error } => warn!(
                event_id = %event.id,
                attempts = event.attempts,
                max_attempts = event.max_attempts,
                error = %error,
                "delivery attempt failed, event stays pending"
            ),
        }
    }
}

/// Applies an attempt outcome to a fresh copy of the event, yielding the row
/// to write and the lifecycle message to emit once the write lands.
///
/// Failures that leave budget park the event back in `pending` without a
/// message; the retry scheduler picks it up from there.
fn apply_outcome(
    mut event: WebhookEvent,
    outcome: &AttemptOutcome,
    latency_ms: i64,
) -> (WebhookEvent, Option<NotificationType>) {
    event.attempts += 1;
    event.response_time_ms = Some(latency_ms);

    match outcome {
        AttemptOutcome::Delivered { .. } => {
            event.status = EventStatus::Success;
            event.error_message = None;
            (event, Some(NotificationType::Success))
        },
        AttemptOutcome::Failed { error } => {
            event.error_message = Some(error.clone());
            if event.attempts_exhausted() {
                event.status = EventStatus::Failed;
                (event, Some(NotificationType::Failure))
            } else {
                event.status = EventStatus::Pending;
                (event, None)
            }
        },
    }
}

fn build_request(event: &WebhookEvent) -> DeliveryRequest {
    DeliveryRequest {
        event_id: event.id,
        url: event.url.clone(),
        method: event.method,
        headers: parse_headers(event),
        body: parse_body(event),
        attempt: event.attempts + 1,
    }
}

/// Stored header text is best-effort: anything that does not parse as a
/// string-to-string object delivers with an empty header set.
fn parse_headers(event: &WebhookEvent) -> HashMap<String, String> {
    let Some(raw) = event.headers.as_deref() else {
        return HashMap::new();
    };
    match serde_json::from_str(raw) {
        Ok(headers) => headers,
        Err(error) => {
            warn!(
                event_id = %event.id,
                %error,
                "stored headers are not a string map, sending none"
            );
            HashMap::new()
        },
    }
}

/// Stored payloads that parse as JSON travel as JSON; anything else goes out
/// verbatim as text.
fn parse_body(event: &WebhookEvent) -> RequestBody {
    match event.payload.as_deref() {
        None => RequestBody::Empty,
        Some(raw) => match serde_json::from_str(raw) {
            Ok(value) => RequestBody::Json(value),
            Err(_) => RequestBody::Text(raw.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use sinker_core::HttpMethod;

    use super::*;

    fn event_with(attempts: i32, max_attempts: i32) -> WebhookEvent {
        let now = Utc::now();
        WebhookEvent {
            id: EventId::new(),
            url: "https://hooks.example.com/orders".to_string(),
            method: HttpMethod::Post,
            headers: None,
            payload: None,
            status: EventStatus::Pending,
            attempts,
            max_attempts,
            response_time_ms: None,
            error_message: Some("previous failure".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn delivered_outcome_marks_success_and_clears_error() {
        let outcome = AttemptOutcome::Delivered { status: 503 };
        let (updated, emission) = apply_outcome(event_with(0, 3), &outcome, 42);

        assert_eq!(updated.status, EventStatus::Success);
        assert_eq!(updated.attempts, 1);
        assert_eq!(updated.response_time_ms, Some(42));
        assert_eq!(updated.error_message, None);
        assert_eq!(emission, Some(NotificationType::Success));
    }

    #[test]
    fn failure_with_budget_left_goes_back_to_pending_silently() {
        let outcome = AttemptOutcome::Failed { error: "connection refused".to_string() };
        let (updated, emission) = apply_outcome(event_with(0, 3), &outcome, 7);

        assert_eq!(updated.status, EventStatus::Pending);
        assert_eq!(updated.attempts, 1);
        assert_eq!(updated.error_message.as_deref(), Some("connection refused"));
        assert_eq!(emission, None);
    }

    #[test]
    fn final_failure_is_terminal_and_emits() {
        let outcome = AttemptOutcome::Failed { error: "timed out".to_string() };
        let (updated, emission) = apply_outcome(event_with(2, 3), &outcome, 30_000);

        assert_eq!(updated.status, EventStatus::Failed);
        assert_eq!(updated.attempts, 3);
        assert_eq!(emission, Some(NotificationType::Failure));
    }

    #[test]
    fn unparseable_headers_fall_back_to_an_empty_set() {
        let mut event = event_with(0, 3);
        event.headers = Some("not json at all".to_string());
        assert!(parse_headers(&event).is_empty());

        // Non-string values do not satisfy a string-to-string mapping.
        event.headers = Some(r#"{"x-retries": 3}"#.to_string());
        assert!(parse_headers(&event).is_empty());

        event.headers = Some(r#"{"x-tenant": "acme"}"#.to_string());
        let parsed = parse_headers(&event);
        assert_eq!(parsed.get("x-tenant").map(String::as_str), Some("acme"));
    }

    #[test]
    fn payload_parses_as_json_or_falls_back_to_raw_text() {
        let mut event = event_with(0, 3);

        event.payload = None;
        assert!(matches!(parse_body(&event), RequestBody::Empty));

        event.payload = Some(r#"{"order": 42}"#.to_string());
        assert!(matches!(parse_body(&event), RequestBody::Json(_)));

        event.payload = Some("order=42&status=paid".to_string());
        match parse_body(&event) {
            RequestBody::Text(text) => assert_eq!(text, "order=42&status=paid"),
            other => panic!("expected raw text body, got {other:?}"),
        }
    }

    #[test]
    fn request_attempt_number_is_one_based() {
        let event = event_with(2, 5);
        assert_eq!(build_request(&event).attempt, 3);
    }
}
