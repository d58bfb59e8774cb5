//! Delivery engine facade.
//!
//! [`DeliveryEngine`] is the single entry point callers use: it accepts new
//! events, handles manual retries, answers queries, and owns the background
//! machinery. Intake and delivery are decoupled through the bus:
//! `create_event` persists, publishes, and returns, and the dispatch
//! consumer started by [`start`](DeliveryEngine::start) picks the event up
//! from there.

use std::{sync::Arc, time::Duration};

use sinker_bus::{ConsumerWorker, EventBus, MessageHandler, Topic};
use sinker_core::{
    Clock, CoreError, EventId, EventStats, EventStatus, EventStore, LifecycleMessage, NewEvent,
    NewSubscription, NotificationType, Subscription, SubscriptionId, SubscriptionStore,
    SubscriptionUpdate, WebhookEvent,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    client::{ClientConfig, DeliveryClient},
    consumers::{BackoffHandler, DispatchHandler, NotificationHandler},
    dispatcher::Dispatcher,
    error::{DeliveryError, Result},
    notifications::NotificationRouter,
    scheduler::{RetryScheduler, SchedulerConfig},
};

/// Events included in the statistics snapshot.
const RECENT_EVENTS_LIMIT: i64 = 10;

/// Configuration for the delivery engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// HTTP client settings for outbound deliveries.
    pub client: ClientConfig,

    /// Retry scheduler settings.
    pub scheduler: SchedulerConfig,

    /// Attempt budget applied when the input leaves it unset.
    pub default_max_attempts: i32,

    /// Delay before an unacknowledged bus message is redelivered.
    pub redelivery_delay: Duration,

    /// Maximum time to wait for background tasks on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            scheduler: SchedulerConfig::default(),
            default_max_attempts: sinker_core::models::DEFAULT_MAX_ATTEMPTS,
            redelivery_delay: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Facade over event intake, manual retries, queries, and the delivery
/// lifecycle tasks.
///
/// The engine does not deliver anything itself. [`create_event`] and
/// [`retry_event`] persist state and publish lifecycle messages; the
/// consumer workers react to those messages and drive the [`Dispatcher`].
/// Dropping the engine cancels its tasks.
///
/// [`create_event`]: Self::create_event
/// [`retry_event`]: Self::retry_event
pub struct DeliveryEngine {
    events: Arc<dyn EventStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    dispatcher: Dispatcher,
    config: EngineConfig,
    cancellation_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl DeliveryEngine {
    /// Creates an engine over the given stores, bus, and clock.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Configuration`] when the HTTP client cannot
    /// be built from `config.client`.
    pub fn new(
        events: Arc<dyn EventStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Result<Self> {
        let client = DeliveryClient::new(config.client.clone())?;
        let dispatcher = Dispatcher::new(events.clone(), client, bus.clone(), clock.clone());

        Ok(Self {
            events,
            subscriptions,
            bus,
            clock,
            dispatcher,
            config,
            cancellation_token: CancellationToken::new(),
            tasks: Vec::new(),
        })
    }

    /// Accepts a webhook event for delivery.
    ///
    /// The event is persisted in `pending` with zero attempts, then
    /// announced on the events and notifications topics. Delivery happens
    /// asynchronously; the returned event reflects the stored row, not the
    /// delivery outcome.
    pub async fn create_event(&self, new_event: NewEvent) -> Result<WebhookEvent> {
        new_event.validate()?;

        let mut new_event = new_event;
        new_event.max_attempts.get_or_insert(self.config.default_max_attempts);

        let event = self.events.create(new_event).await?;
        info!(event_id = %event.id, url = %event.url, "webhook event accepted");

        let message =
            LifecycleMessage::snapshot(&event, NotificationType::NewEvent, self.clock.now_utc());
        self.bus.publish_lifecycle(Topic::WebhookEvents, &message);
        self.bus.publish_lifecycle(Topic::WebhookNotifications, &message);

        Ok(event)
    }

    /// Requests a manual retry for an event.
    ///
    /// The event moves to `retrying` with its error message cleared, and the
    /// retry is announced on the retries and notifications topics. The
    /// attempt counter is not touched here; only executed attempts move it.
    ///
    /// # Errors
    ///
    /// Not-found when the event does not exist,
    /// [`DeliveryError::RetriesExhausted`] when its attempt budget is spent,
    /// and [`DeliveryError::AlreadyDelivered`] when it already succeeded.
    pub async fn retry_event(&self, id: EventId) -> Result<WebhookEvent> {
        let mut event = self
            .events
            .get(id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("event {id}")))?;

        if event.attempts_exhausted() {
            return Err(DeliveryError::RetriesExhausted {
                id,
                attempts: event.attempts,
                max_attempts: event.max_attempts,
            });
        }
        if event.status == EventStatus::Success {
            return Err(DeliveryError::AlreadyDelivered { id });
        }

        event.status = EventStatus::Retrying;
        event.error_message = None;
        self.events.save(&event).await?;

        info!(
            event_id = %id,
            attempts = event.attempts,
            max_attempts = event.max_attempts,
            "manual retry accepted"
        );

        let message =
            LifecycleMessage::snapshot(&event, NotificationType::Retry, self.clock.now_utc());
        self.bus.publish_lifecycle(Topic::WebhookRetries, &message);
        self.bus.publish_lifecycle(Topic::WebhookNotifications, &message);

        Ok(event)
    }

    /// Fetches an event by id. Returns `None` when no row exists.
    pub async fn get_event(&self, id: EventId) -> Result<Option<WebhookEvent>> {
        Ok(self.events.get(id).await?)
    }

    /// Lists the most recently created events, newest first.
    pub async fn list_recent_events(&self, limit: i64) -> Result<Vec<WebhookEvent>> {
        Ok(self.events.list_recent(limit).await?)
    }

    /// Lists events in `status`, newest first.
    pub async fn list_events_by_status(
        &self,
        status: EventStatus,
        limit: i64,
    ) -> Result<Vec<WebhookEvent>> {
        Ok(self.events.list_by_status(status, limit, None).await?)
    }

    /// Deletes an event. Attempts still in flight for it become no-ops.
    pub async fn delete_event(&self, id: EventId) -> Result<()> {
        self.events.delete(id).await?;
        info!(event_id = %id, "webhook event deleted");
        Ok(())
    }

    /// Aggregated delivery statistics.
    ///
    /// The average latency is `0.0` until some attempt records one.
    pub async fn stats(&self) -> Result<EventStats> {
        let total = self.events.count().await?;
        let successful = self.events.count_by_status(EventStatus::Success).await?;
        let failed = self.events.count_by_status(EventStatus::Failed).await?;
        let pending = self.events.count_by_status(EventStatus::Pending).await?;
        let retrying = self.events.count_by_status(EventStatus::Retrying).await?;
        let average_response_time_ms = self.events.average_response_time().await?.unwrap_or(0.0);
        let recent_events = self.events.list_recent(RECENT_EVENTS_LIMIT).await?;

        Ok(EventStats {
            total,
            successful,
            failed,
            pending,
            retrying,
            average_response_time_ms,
            recent_events,
        })
    }

    /// Registers a subscription.
    pub async fn create_subscription(&self, new: NewSubscription) -> Result<Subscription> {
        new.validate()?;

        let subscription = self.subscriptions.create(new).await?;
        info!(
            subscription_id = %subscription.id,
            url = %subscription.url,
            "subscription created"
        );

        Ok(subscription)
    }

    /// Fetches a subscription by id. Returns `None` when no row exists.
    pub async fn get_subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        Ok(self.subscriptions.get(id).await?)
    }

    /// Lists all subscriptions, newest first.
    pub async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        Ok(self.subscriptions.list().await?)
    }

    /// Lists subscriptions with the active flag set, newest first.
    pub async fn list_active_subscriptions(&self) -> Result<Vec<Subscription>> {
        Ok(self.subscriptions.list_active().await?)
    }

    /// Applies a partial update to a subscription.
    pub async fn update_subscription(
        &self,
        id: SubscriptionId,
        update: SubscriptionUpdate,
    ) -> Result<Subscription> {
        update.validate()?;
        Ok(self.subscriptions.update(id, update).await?)
    }

    /// Deletes a subscription.
    pub async fn delete_subscription(&self, id: SubscriptionId) -> Result<()> {
        self.subscriptions.delete(id).await?;
        info!(subscription_id = %id, "subscription deleted");
        Ok(())
    }

    /// Starts the consumer workers and the retry scheduler.
    ///
    /// Returns immediately after spawning. Calling `start` twice is a
    /// logged no-op; the first set of tasks keeps running.
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            warn!("delivery engine already started, ignoring");
            return;
        }

        info!(
            redelivery_delay_secs = self.config.redelivery_delay.as_secs(),
            sweep_interval_secs = self.config.scheduler.sweep_interval.as_secs(),
            "starting delivery engine"
        );

        let dispatch: Arc<dyn MessageHandler> =
            Arc::new(DispatchHandler::new(self.dispatcher.clone()));
        let backoff: Arc<dyn MessageHandler> =
            Arc::new(BackoffHandler::new(self.dispatcher.clone()));
        let notifications: Arc<dyn MessageHandler> =
            Arc::new(NotificationHandler::new(NotificationRouter::new()));

        self.tasks.push(self.spawn_consumer(Topic::WebhookEvents, dispatch));
        self.tasks.push(self.spawn_consumer(Topic::WebhookRetries, backoff));
        self.tasks.push(self.spawn_consumer(Topic::WebhookNotifications, notifications));

        let scheduler = RetryScheduler::new(
            self.events.clone(),
            self.dispatcher.clone(),
            self.clock.clone(),
            self.config.scheduler.clone(),
        );
        self.tasks.push(tokio::spawn(scheduler.run(self.cancellation_token.clone())));

        info!("delivery engine started");
    }

    fn spawn_consumer(&self, topic: Topic, handler: Arc<dyn MessageHandler>) -> JoinHandle<()> {
        let worker = ConsumerWorker::new(
            topic.default_group(),
            self.bus.subscribe(topic, topic.default_group()),
            handler,
            self.config.redelivery_delay,
            self.clock.clone(),
            self.cancellation_token.clone(),
        );
        tokio::spawn(worker.run())
    }

    /// Stops the background tasks, waiting up to `timeout` for them to
    /// drain.
    ///
    /// Dispatches spawned before the cancellation still run to their
    /// committed save; only the consumer loops and the scheduler stop.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::ShutdownTimeout`] when tasks are still
    /// running at the deadline. Stragglers are aborted before returning.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(timeout_secs = timeout.as_secs(), "shutting down delivery engine");
        self.cancellation_token.cancel();

        let mut tasks = std::mem::take(&mut self.tasks);
        let drain = async {
            for task in &mut tasks {
                if let Err(error) = task.await {
                    if error.is_panic() {
                        warn!(%error, "engine task panicked before shutdown");
                    }
                }
            }
        };

        let drained = tokio::time::timeout(timeout, drain).await;
        if drained.is_err() {
            for task in &tasks {
                task.abort();
            }
            warn!(timeout_secs = timeout.as_secs(), "engine tasks did not stop in time, aborted");
            return Err(DeliveryError::ShutdownTimeout { timeout_seconds: timeout.as_secs() });
        }

        info!("delivery engine stopped");
        Ok(())
    }
}

impl Drop for DeliveryEngine {
    fn drop(&mut self) {
        // Dropping without an explicit shutdown still stops the loops.
        self.cancellation_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use sinker_core::{
        InMemoryEventStore, InMemorySubscriptionStore, RealClock, TestClock,
    };
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    struct TestEngine {
        engine: DeliveryEngine,
        events: Arc<InMemoryEventStore>,
        bus: Arc<EventBus>,
    }

    fn engine_over(clock: Arc<dyn Clock>) -> TestEngine {
        let events = Arc::new(InMemoryEventStore::new(clock.clone()));
        let subscriptions = Arc::new(InMemorySubscriptionStore::new(clock.clone()));
        let bus = Arc::new(EventBus::new(clock.clone()));
        let engine = DeliveryEngine::new(
            events.clone(),
            subscriptions,
            bus.clone(),
            clock,
            EngineConfig::default(),
        )
        .expect("default engine config is buildable");

        TestEngine { engine, events, bus }
    }

    async fn seed_event(
        store: &InMemoryEventStore,
        status: EventStatus,
        attempts: i32,
        max_attempts: i32,
    ) -> WebhookEvent {
        let new_event = NewEvent {
            max_attempts: Some(max_attempts),
            ..NewEvent::to_url("https://hooks.example.com/orders")
        };
        let mut event = store.create(new_event).await.expect("create seeded event");
        event.status = status;
        event.attempts = attempts;
        event.error_message = Some("connection refused".to_string());
        store.save(&event).await.expect("save seeded event");
        event
    }

    async fn next_lifecycle(
        receiver: &mut tokio::sync::mpsc::UnboundedReceiver<sinker_bus::BusMessage>,
    ) -> LifecycleMessage {
        let message = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
            .await
            .expect("a lifecycle message within a second")
            .expect("bus channel open");
        message.decode().expect("lifecycle payload decodes")
    }

    #[tokio::test]
    async fn create_event_persists_and_announces_on_both_topics() {
        let env = engine_over(Arc::new(TestClock::new()));
        let mut events_rx = env.bus.subscribe(Topic::WebhookEvents, "probe");
        let mut notifications_rx = env.bus.subscribe(Topic::WebhookNotifications, "probe");

        let event = env
            .engine
            .create_event(NewEvent::to_url("https://hooks.example.com/orders"))
            .await
            .expect("create accepted");

        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.attempts, 0);

        let on_events = next_lifecycle(&mut events_rx).await;
        assert_eq!(on_events.event_id, event.id);
        assert_eq!(on_events.notification_type, "NEW_EVENT");

        let on_notifications = next_lifecycle(&mut notifications_rx).await;
        assert_eq!(on_notifications.event_id, event.id);
        assert_eq!(on_notifications.notification_type, "NEW_EVENT");
    }

    #[tokio::test]
    async fn create_event_applies_the_configured_attempt_budget() {
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new());
        let events = Arc::new(InMemoryEventStore::new(clock.clone()));
        let subscriptions = Arc::new(InMemorySubscriptionStore::new(clock.clone()));
        let bus = Arc::new(EventBus::new(clock.clone()));
        let engine = DeliveryEngine::new(
            events,
            subscriptions,
            bus,
            clock,
            EngineConfig { default_max_attempts: 5, ..EngineConfig::default() },
        )
        .expect("engine config is buildable");

        let defaulted = engine
            .create_event(NewEvent::to_url("https://hooks.example.com/orders"))
            .await
            .expect("create accepted");
        let explicit = engine
            .create_event(NewEvent {
                max_attempts: Some(1),
                ..NewEvent::to_url("https://hooks.example.com/orders")
            })
            .await
            .expect("create accepted");

        assert_eq!(defaulted.max_attempts, 5);
        assert_eq!(explicit.max_attempts, 1);
    }

    #[tokio::test]
    async fn create_event_rejects_invalid_input() {
        let env = engine_over(Arc::new(TestClock::new()));

        let error = env
            .engine
            .create_event(NewEvent::to_url("ftp://hooks.example.com"))
            .await
            .expect_err("ftp url is rejected");

        assert!(matches!(error, DeliveryError::Core(CoreError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn retry_requires_an_existing_event() {
        let env = engine_over(Arc::new(TestClock::new()));

        let error = env.engine.retry_event(EventId::new()).await.expect_err("missing event");

        assert!(matches!(error, DeliveryError::Core(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn retry_rejects_an_exhausted_budget() {
        let env = engine_over(Arc::new(TestClock::new()));
        let event = seed_event(&env.events, EventStatus::Failed, 3, 3).await;

        let error = env.engine.retry_event(event.id).await.expect_err("budget spent");

        assert!(matches!(
            error,
            DeliveryError::RetriesExhausted { attempts: 3, max_attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn retry_rejects_a_delivered_event() {
        let env = engine_over(Arc::new(TestClock::new()));
        let event = seed_event(&env.events, EventStatus::Success, 1, 3).await;

        let error = env.engine.retry_event(event.id).await.expect_err("already delivered");

        assert!(matches!(error, DeliveryError::AlreadyDelivered { .. }));
    }

    #[tokio::test]
    async fn retry_resets_the_event_and_announces_it() {
        let env = engine_over(Arc::new(TestClock::new()));
        let event = seed_event(&env.events, EventStatus::Pending, 1, 3).await;
        let mut retries_rx = env.bus.subscribe(Topic::WebhookRetries, "probe");
        let mut notifications_rx = env.bus.subscribe(Topic::WebhookNotifications, "probe");

        let updated = env.engine.retry_event(event.id).await.expect("retry accepted");

        assert_eq!(updated.status, EventStatus::Retrying);
        assert_eq!(updated.error_message, None);
        // Only executed attempts move the counter.
        assert_eq!(updated.attempts, 1);

        let on_retries = next_lifecycle(&mut retries_rx).await;
        assert_eq!(on_retries.notification_type, "RETRY");
        assert_eq!(on_retries.attempts, 1);

        let on_notifications = next_lifecycle(&mut notifications_rx).await;
        assert_eq!(on_notifications.notification_type, "RETRY");
    }

    #[tokio::test]
    async fn stats_aggregate_counts_and_default_the_average() {
        let env = engine_over(Arc::new(TestClock::new()));
        seed_event(&env.events, EventStatus::Success, 1, 3).await;
        seed_event(&env.events, EventStatus::Failed, 3, 3).await;
        seed_event(&env.events, EventStatus::Pending, 0, 3).await;
        seed_event(&env.events, EventStatus::Pending, 1, 3).await;
        seed_event(&env.events, EventStatus::Retrying, 1, 3).await;

        let stats = env.engine.stats().await.expect("stats");

        assert_eq!(stats.total, 5);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.retrying, 1);
        // No attempt has recorded a latency yet.
        assert_eq!(stats.average_response_time_ms, 0.0);
        assert_eq!(stats.recent_events.len(), 5);
    }

    #[tokio::test]
    async fn subscriptions_pass_through_with_validation() {
        let env = engine_over(Arc::new(TestClock::new()));

        let created = env
            .engine
            .create_subscription(NewSubscription {
                name: "orders".to_string(),
                url: "https://hooks.example.com/orders".to_string(),
                events: vec!["order.created".to_string()],
                secret: "s3cret".to_string(),
                active: None,
            })
            .await
            .expect("create subscription");
        assert!(created.active);

        let error = env
            .engine
            .update_subscription(
                created.id,
                SubscriptionUpdate {
                    name: Some("   ".to_string()),
                    ..SubscriptionUpdate::default()
                },
            )
            .await
            .expect_err("blank name is rejected");
        assert!(matches!(error, DeliveryError::Core(CoreError::InvalidInput(_))));

        let updated = env
            .engine
            .update_subscription(
                created.id,
                SubscriptionUpdate { active: Some(false), ..SubscriptionUpdate::default() },
            )
            .await
            .expect("deactivate");
        assert!(!updated.active);
        assert!(env.engine.list_active_subscriptions().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn started_engine_delivers_created_events() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        // Real clock keeps the scheduler parked on its 60s interval; the
        // dispatch consumer alone must carry the event to delivery.
        let env = engine_over(Arc::new(RealClock));
        let mut engine = env.engine;
        engine.start();

        let event = engine
            .create_event(NewEvent::to_url(format!("{}/hook", server.uri())))
            .await
            .expect("create accepted");

        let mut delivered = None;
        for _ in 0..200 {
            let stored = env.events.get(event.id).await.expect("get").expect("row exists");
            if stored.status == EventStatus::Success {
                delivered = Some(stored);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let delivered = delivered.expect("event delivers within two seconds");
        assert_eq!(delivered.attempts, 1);
        assert_eq!(delivered.error_message, None);

        engine.shutdown_graceful(Duration::from_secs(5)).await.expect("clean shutdown");
    }

    #[tokio::test]
    async fn shutdown_before_start_is_clean() {
        let env = engine_over(Arc::new(TestClock::new()));
        env.engine.shutdown_graceful(Duration::from_secs(1)).await.expect("nothing to stop");
    }
}
