//! Test environment and fixtures for the sinker workspace.
//!
//! Bundles the in-memory stores, the topic bus, a deterministic clock, and a
//! mock HTTP endpoint into one [`TestEnv`], so integration tests wire a
//! complete delivery loop in a couple of lines and drive virtual time by
//! hand.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;

use std::{sync::Arc, time::Duration};

pub use fixtures::{EventBuilder, SubscriptionBuilder};
use sinker_bus::EventBus;
use sinker_core::{
    Clock, EventId, EventStatus, EventStore, InMemoryEventStore, InMemorySubscriptionStore,
    TestClock, WebhookEvent,
};
use sinker_delivery::{DeliveryEngine, EngineConfig};
use tracing_subscriber::EnvFilter;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

/// Bundled in-memory environment for integration tests.
///
/// Every component shares the same [`TestClock`], so advancing it moves
/// store timestamps, bus timestamps, backoff sleeps, and sweep intervals
/// together. The mock endpoint listens on a real local port; deliveries
/// leave through the genuine HTTP client.
pub struct TestEnv {
    /// Deterministic clock shared by every component.
    pub clock: TestClock,
    /// Event rows.
    pub events: Arc<InMemoryEventStore>,
    /// Subscription rows.
    pub subscriptions: Arc<InMemorySubscriptionStore>,
    /// In-process topic bus.
    pub bus: Arc<EventBus>,
    /// Mock HTTP endpoint receiving deliveries.
    pub server: MockServer,
}

impl TestEnv {
    /// Creates an environment with a running mock endpoint.
    pub async fn new() -> Self {
        // Tracing init is idempotent; every test may call new().
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("warn,sinker_core=debug,sinker_bus=debug,sinker_delivery=debug")
            }))
            .with_test_writer()
            .try_init();

        let clock = TestClock::new();
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let events = Arc::new(InMemoryEventStore::new(shared.clone()));
        let subscriptions = Arc::new(InMemorySubscriptionStore::new(shared.clone()));
        let bus = Arc::new(EventBus::new(shared));
        let server = MockServer::start().await;

        Self { clock, events, subscriptions, bus, server }
    }

    /// Shared clock handle in the shape the engine constructors expect.
    pub fn clock_handle(&self) -> Arc<dyn Clock> {
        Arc::new(self.clock.clone())
    }

    /// Advances virtual time for every component at once.
    pub fn advance_time(&self, duration: Duration) {
        self.clock.advance(duration);
    }

    /// Absolute URL for `path` on the mock endpoint.
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}{}", self.server.uri(), path)
    }

    /// Mounts a POST expectation answering `status` on `path`.
    pub async fn mock_post(&self, path: &str, status: u16) {
        Mock::given(matchers::method("POST"))
            .and(matchers::path(path))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Builds an engine over this environment's stores, bus, and clock.
    ///
    /// The engine is not started; callers decide whether the background
    /// tasks should run.
    ///
    /// # Errors
    ///
    /// Propagates the engine's configuration error when the HTTP client
    /// cannot be built.
    pub fn engine(&self, config: EngineConfig) -> sinker_delivery::Result<DeliveryEngine> {
        DeliveryEngine::new(
            self.events.clone(),
            self.subscriptions.clone(),
            self.bus.clone(),
            self.clock_handle(),
            config,
        )
    }

    /// Polls the store until `id` satisfies `predicate`.
    ///
    /// # Panics
    ///
    /// Panics when the event never reaches the expected state within the
    /// polling budget, or when it disappears from the store.
    pub async fn wait_for_event(
        &self,
        id: EventId,
        predicate: impl Fn(&WebhookEvent) -> bool,
    ) -> WebhookEvent {
        for _ in 0..500 {
            let event =
                self.events.get(id).await.expect("store read").expect("event row exists");
            if predicate(&event) {
                return event;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("event {id} never reached the expected state");
    }

    /// Polls the store until `id` reaches `status`.
    ///
    /// # Panics
    ///
    /// Same conditions as [`wait_for_event`](Self::wait_for_event).
    pub async fn wait_for_status(&self, id: EventId, status: EventStatus) -> WebhookEvent {
        self.wait_for_event(id, |event| event.status == status).await
    }
}
