//! In-memory store implementations for tests and embedded scenarios.
//!
//! Semantics mirror the PostgreSQL stores exactly (same conflict rules,
//! same compare-and-swap behavior), but timestamps come from the injected
//! [`Clock`] so tests control time.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{
    error::{CoreError, Result},
    models::{
        EventId, EventStatus, NewEvent, NewSubscription, Subscription, SubscriptionId,
        SubscriptionUpdate, WebhookEvent,
    },
    storage::{EventStore, SubscriptionStore},
    time::{Clock, RealClock},
};

/// Event store over a mutexed map.
#[derive(Debug)]
pub struct InMemoryEventStore {
    events: Mutex<HashMap<EventId, WebhookEvent>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryEventStore {
    /// Creates an empty store stamping timestamps from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { events: Mutex::new(HashMap::new()), clock }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new(Arc::new(RealClock))
    }
}

#[async_trait::async_trait]
impl EventStore for InMemoryEventStore {
    async fn create(&self, event: NewEvent) -> Result<WebhookEvent> {
        let now = self.clock.now_utc();
        let row = WebhookEvent {
            id: EventId::new(),
            url: event.url,
            method: event.method,
            headers: event.headers,
            payload: event.payload,
            status: EventStatus::Pending,
            attempts: 0,
            max_attempts: event.max_attempts.unwrap_or(crate::models::DEFAULT_MAX_ATTEMPTS),
            response_time_ms: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };

        self.events.lock().await.insert(row.id, row.clone());

        Ok(row)
    }

    async fn get(&self, id: EventId) -> Result<Option<WebhookEvent>> {
        Ok(self.events.lock().await.get(&id).cloned())
    }

    async fn save(&self, event: &WebhookEvent) -> Result<()> {
        let now = self.clock.now_utc();
        let mut events = self.events.lock().await;

        let stored = events
            .get_mut(&event.id)
            .ok_or_else(|| CoreError::not_found(format!("webhook event {} not found", event.id)))?;

        let created_at = stored.created_at;
        *stored = event.clone();
        stored.created_at = created_at;
        stored.updated_at = now;

        Ok(())
    }

    async fn save_if_attempts(
        &self,
        event: &WebhookEvent,
        expected_attempts: i32,
    ) -> Result<bool> {
        let now = self.clock.now_utc();
        let mut events = self.events.lock().await;

        match events.get_mut(&event.id) {
            Some(stored) if stored.attempts == expected_attempts => {
                let created_at = stored.created_at;
                *stored = event.clone();
                stored.created_at = created_at;
                stored.updated_at = now;
                Ok(true)
            },
            // Counter moved on or row deleted: the write is stale.
            _ => Ok(false),
        }
    }

    async fn list_by_status(
        &self,
        status: EventStatus,
        limit: i64,
        older_than: Option<DateTime<Utc>>,
    ) -> Result<Vec<WebhookEvent>> {
        let events = self.events.lock().await;
        let mut rows: Vec<WebhookEvent> = events
            .values()
            .filter(|e| e.status == status)
            .filter(|e| older_than.map_or(true, |cutoff| e.updated_at < cutoff))
            .cloned()
            .collect();
        drop(events);

        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(usize::try_from(limit).unwrap_or(0));

        Ok(rows)
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<WebhookEvent>> {
        let events = self.events.lock().await;
        let mut rows: Vec<WebhookEvent> = events.values().cloned().collect();
        drop(events);

        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(usize::try_from(limit).unwrap_or(0));

        Ok(rows)
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.events.lock().await.len() as i64)
    }

    async fn count_by_status(&self, status: EventStatus) -> Result<i64> {
        let events = self.events.lock().await;
        Ok(events.values().filter(|e| e.status == status).count() as i64)
    }

    async fn average_response_time(&self) -> Result<Option<f64>> {
        let events = self.events.lock().await;
        let samples: Vec<i64> = events.values().filter_map(|e| e.response_time_ms).collect();
        drop(events);

        if samples.is_empty() {
            return Ok(None);
        }

        let sum: i64 = samples.iter().sum();
        #[allow(clippy::cast_precision_loss)]
        Ok(Some(sum as f64 / samples.len() as f64))
    }

    async fn delete(&self, id: EventId) -> Result<()> {
        self.events
            .lock()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found(format!("webhook event {id} not found")))
    }
}

/// Subscription store over a mutexed map.
#[derive(Debug)]
pub struct InMemorySubscriptionStore {
    subscriptions: Mutex<HashMap<SubscriptionId, Subscription>>,
    clock: Arc<dyn Clock>,
}

impl InMemorySubscriptionStore {
    /// Creates an empty store stamping timestamps from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { subscriptions: Mutex::new(HashMap::new()), clock }
    }
}

impl Default for InMemorySubscriptionStore {
    fn default() -> Self {
        Self::new(Arc::new(RealClock))
    }
}

#[async_trait::async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn create(&self, subscription: NewSubscription) -> Result<Subscription> {
        let now = self.clock.now_utc();
        let mut subscriptions = self.subscriptions.lock().await;

        if subscriptions.values().any(|s| s.url == subscription.url) {
            return Err(CoreError::conflict(format!(
                "subscription url {} already registered",
                subscription.url
            )));
        }

        let row = Subscription {
            id: SubscriptionId::new(),
            name: subscription.name,
            url: subscription.url,
            events: sqlx::types::Json(subscription.events),
            secret: subscription.secret,
            active: subscription.active.unwrap_or(true),
            created_at: now,
            updated_at: now,
        };
        subscriptions.insert(row.id, row.clone());

        Ok(row)
    }

    async fn get(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        Ok(self.subscriptions.lock().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Subscription>> {
        let subscriptions = self.subscriptions.lock().await;
        let mut rows: Vec<Subscription> = subscriptions.values().cloned().collect();
        drop(subscriptions);

        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(rows)
    }

    async fn list_active(&self) -> Result<Vec<Subscription>> {
        let subscriptions = self.subscriptions.lock().await;
        let mut rows: Vec<Subscription> =
            subscriptions.values().filter(|s| s.active).cloned().collect();
        drop(subscriptions);

        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(rows)
    }

    async fn update(
        &self,
        id: SubscriptionId,
        update: SubscriptionUpdate,
    ) -> Result<Subscription> {
        let now = self.clock.now_utc();
        let mut subscriptions = self.subscriptions.lock().await;

        if let Some(url) = &update.url {
            if subscriptions.values().any(|s| s.id != id && s.url == *url) {
                return Err(CoreError::conflict(format!(
                    "subscription url {url} already registered"
                )));
            }
        }

        let stored = subscriptions
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found(format!("subscription {id} not found")))?;

        if let Some(name) = update.name {
            stored.name = name;
        }
        if let Some(url) = update.url {
            stored.url = url;
        }
        if let Some(events) = update.events {
            stored.events = sqlx::types::Json(events);
        }
        if let Some(secret) = update.secret {
            stored.secret = secret;
        }
        if let Some(active) = update.active {
            stored.active = active;
        }
        stored.updated_at = now;

        Ok(stored.clone())
    }

    async fn delete(&self, id: SubscriptionId) -> Result<()> {
        self.subscriptions
            .lock()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found(format!("subscription {id} not found")))
    }
}
