//! End-to-end dispatch flows against a live HTTP endpoint.
//!
//! Exercises the full attempt pipeline (load, HTTP call, compare-and-swap
//! commit) with the in-memory store and a wiremock endpoint. Transport
//! failures use a closed local port, which refuses connections immediately.

use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use sinker_bus::{EventBus, Topic};
use sinker_core::{
    Clock, EventStatus, EventStore, InMemoryEventStore, LifecycleMessage, NewEvent, TestClock,
    WebhookEvent,
};
use sinker_delivery::{ClientConfig, DeliveryClient, Dispatcher};
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

/// Nothing listens on port 1; connections are refused immediately.
const CLOSED_PORT_URL: &str = "http://127.0.0.1:1/hook";

struct Flow {
    dispatcher: Dispatcher,
    store: Arc<InMemoryEventStore>,
    bus: Arc<EventBus>,
    clock: TestClock,
}

fn flow() -> Flow {
    let clock = TestClock::new();
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let store = Arc::new(InMemoryEventStore::new(shared.clone()));
    let bus = Arc::new(EventBus::new(shared.clone()));
    let config = ClientConfig { timeout: Duration::from_secs(2), ..ClientConfig::default() };
    let client = DeliveryClient::new(config).expect("client builds");
    let dispatcher = Dispatcher::new(store.clone(), client, bus.clone(), shared);

    Flow { dispatcher, store, bus, clock }
}

async fn seed(store: &InMemoryEventStore, url: &str, max_attempts: i32) -> WebhookEvent {
    let new_event = NewEvent { max_attempts: Some(max_attempts), ..NewEvent::to_url(url) };
    store.create(new_event).await.expect("create event")
}

#[tokio::test]
async fn response_completes_the_event_on_the_first_attempt() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let flow = flow();
    let event = seed(&flow.store, &format!("{}/hook", server.uri()), 3).await;

    flow.dispatcher.run_attempt(event.id).await;

    let stored = flow.store.get(event.id).await.unwrap().unwrap();
    assert_eq!(stored.status, EventStatus::Success);
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.error_message, None);
    assert!(stored.response_time_ms.is_some());
}

#[tokio::test]
async fn server_errors_still_complete_the_event() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let flow = flow();
    let event = seed(&flow.store, &format!("{}/hook", server.uri()), 3).await;

    flow.dispatcher.run_attempt(event.id).await;

    let stored = flow.store.get(event.id).await.unwrap().unwrap();
    assert_eq!(stored.status, EventStatus::Success);
    assert_eq!(stored.attempts, 1);
}

#[tokio::test]
async fn transport_failures_exhaust_the_budget_and_fail_terminally() {
    let flow = flow();
    let mut notifications = flow.bus.subscribe(Topic::WebhookNotifications, "probe");
    let event = seed(&flow.store, CLOSED_PORT_URL, 3).await;

    for expected_attempts in 1..=3 {
        flow.dispatcher.run_attempt(event.id).await;
        let stored = flow.store.get(event.id).await.unwrap().unwrap();
        assert_eq!(stored.attempts, expected_attempts);
    }

    let stored = flow.store.get(event.id).await.unwrap().unwrap();
    assert_eq!(stored.status, EventStatus::Failed);
    assert!(stored.error_message.is_some());

    // Intermediate failures stay silent; only the terminal one announces.
    let message = notifications.try_recv().expect("one notification");
    let lifecycle: LifecycleMessage = message.decode().expect("lifecycle decodes");
    assert_eq!(lifecycle.notification_type, "FAILURE");
    assert_eq!(lifecycle.attempts, 3);
    assert!(notifications.try_recv().is_err());
}

#[tokio::test]
async fn recovery_after_a_failure_clears_the_stored_error() {
    let flow = flow();
    let event = seed(&flow.store, CLOSED_PORT_URL, 3).await;

    flow.dispatcher.run_attempt(event.id).await;
    let mut stored = flow.store.get(event.id).await.unwrap().unwrap();
    assert_eq!(stored.status, EventStatus::Pending);
    assert!(stored.error_message.is_some());

    // The endpoint comes back under a reachable address.
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    stored.url = format!("{}/hook", server.uri());
    flow.store.save(&stored).await.unwrap();

    flow.dispatcher.run_attempt(event.id).await;

    let recovered = flow.store.get(event.id).await.unwrap().unwrap();
    assert_eq!(recovered.status, EventStatus::Success);
    assert_eq!(recovered.attempts, 2);
    assert_eq!(recovered.error_message, None);
}

#[tokio::test]
async fn dispatch_for_a_deleted_event_is_a_no_op() {
    let flow = flow();
    let event = seed(&flow.store, CLOSED_PORT_URL, 3).await;
    flow.store.delete(event.id).await.unwrap();

    flow.dispatcher.run_attempt(event.id).await;

    assert!(flow.store.get(event.id).await.unwrap().is_none());
}

#[tokio::test]
async fn parallel_attempts_all_land_in_the_counter() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let flow = flow();
    let event = seed(&flow.store, &format!("{}/hook", server.uri()), 10).await;

    join_all((0..6).map(|_| flow.dispatcher.run_attempt(event.id))).await;

    let stored = flow.store.get(event.id).await.unwrap().unwrap();
    assert_eq!(stored.attempts, 6);
    assert_eq!(stored.status, EventStatus::Success);
}

#[tokio::test]
async fn parallel_failures_never_overrun_the_budget() {
    let flow = flow();
    let mut notifications = flow.bus.subscribe(Topic::WebhookNotifications, "probe");
    let event = seed(&flow.store, CLOSED_PORT_URL, 3).await;

    join_all((0..5).map(|_| flow.dispatcher.run_attempt(event.id))).await;

    let stored = flow.store.get(event.id).await.unwrap().unwrap();
    assert_eq!(stored.attempts, 3);
    assert_eq!(stored.status, EventStatus::Failed);

    let mut failures = 0;
    while let Ok(message) = notifications.try_recv() {
        let lifecycle: LifecycleMessage = message.decode().expect("lifecycle decodes");
        if lifecycle.notification_type == "FAILURE" {
            failures += 1;
        }
    }
    assert_eq!(failures, 1);
}

#[tokio::test]
async fn duplicate_trigger_on_an_exhausted_event_leaves_it_untouched() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let flow = flow();
    let event = seed(&flow.store, CLOSED_PORT_URL, 2).await;
    flow.dispatcher.run_attempt(event.id).await;
    flow.dispatcher.run_attempt(event.id).await;

    let failed = flow.store.get(event.id).await.unwrap().unwrap();
    assert_eq!(failed.status, EventStatus::Failed);
    assert_eq!(failed.attempts, 2);

    // The endpoint comes back, and a stale trigger fires once more. The
    // attempt may go on the wire, but its result never moves the counter
    // past the budget or revives the terminal state.
    let mut revived = failed.clone();
    revived.url = format!("{}/hook", server.uri());
    flow.store.save(&revived).await.unwrap();
    flow.dispatcher.run_attempt(event.id).await;

    let stored = flow.store.get(event.id).await.unwrap().unwrap();
    assert_eq!(stored.status, EventStatus::Failed);
    assert_eq!(stored.attempts, 2);
}

#[tokio::test]
async fn deferred_dispatch_waits_out_the_backoff_then_delivers() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let flow = flow();
    let event = seed(&flow.store, &format!("{}/hook", server.uri()), 3).await;

    flow.dispatcher.dispatch_after_backoff(event.id, 3);

    let mut delivered = false;
    for _ in 0..200 {
        let stored = flow.store.get(event.id).await.unwrap().unwrap();
        if stored.status == EventStatus::Success {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(delivered, "deferred dispatch delivers once the backoff elapses");
    // Virtual time absorbed the eight-second penalty for attempt three.
    assert!(flow.clock.elapsed() >= Duration::from_secs(8));
}
