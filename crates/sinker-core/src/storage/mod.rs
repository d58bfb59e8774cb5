//! Storage layer for webhook events and subscriptions.
//!
//! The store traits act as an anti-corruption layer between domain logic and
//! persistence: the delivery engine only ever talks to [`EventStore`] and
//! [`SubscriptionStore`], so the PostgreSQL schema can evolve without
//! touching dispatch or retry code, and tests can swap in the in-memory
//! implementations for deterministic behavior validation.
//!
//! All database access MUST go through this module. Direct SQL elsewhere is
//! forbidden to keep the query surface auditable.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub mod memory;
pub mod postgres;

pub use memory::{InMemoryEventStore, InMemorySubscriptionStore};
pub use postgres::{PgEventStore, PgSubscriptionStore};

use crate::{
    error::Result,
    models::{
        EventId, EventStatus, NewEvent, NewSubscription, Subscription, SubscriptionId,
        SubscriptionUpdate, WebhookEvent,
    },
};

/// Persistence operations for webhook delivery events.
///
/// Reads observe the latest committed write. Plain [`save`](Self::save)
/// calls on the same id are not serialized against each other; concurrent
/// mutators avoid lost updates with
/// [`save_if_attempts`](Self::save_if_attempts).
#[async_trait::async_trait]
pub trait EventStore: Send + Sync + std::fmt::Debug {
    /// Persists a new event, assigning its id and timestamps.
    ///
    /// The stored row starts in `pending` with zero attempts.
    async fn create(&self, event: NewEvent) -> Result<WebhookEvent>;

    /// Fetches an event by id. Returns `None` when no row exists.
    async fn get(&self, id: EventId) -> Result<Option<WebhookEvent>>;

    /// Overwrites the stored row with `event` and bumps `updated_at`.
    ///
    /// `created_at` is immutable and keeps its stored value.
    async fn save(&self, event: &WebhookEvent) -> Result<()>;

    /// Compare-and-swap variant of [`save`](Self::save).
    ///
    /// The write commits only when the stored attempts counter still equals
    /// `expected_attempts`. Returns `false` when another writer got there
    /// first or the row no longer exists; the caller re-reads and retries.
    async fn save_if_attempts(
        &self,
        event: &WebhookEvent,
        expected_attempts: i32,
    ) -> Result<bool>;

    /// Lists events in `status`, newest first.
    ///
    /// `older_than` keeps only rows whose `updated_at` lies strictly before
    /// the cutoff. Used by the retry scheduler to narrow its sweep.
    async fn list_by_status(
        &self,
        status: EventStatus,
        limit: i64,
        older_than: Option<DateTime<Utc>>,
    ) -> Result<Vec<WebhookEvent>>;

    /// Lists the most recently created events, newest first.
    async fn list_recent(&self, limit: i64) -> Result<Vec<WebhookEvent>>;

    /// Counts all stored events.
    async fn count(&self) -> Result<i64>;

    /// Counts events in the given status.
    async fn count_by_status(&self, status: EventStatus) -> Result<i64>;

    /// Mean recorded latency in milliseconds across all attempts.
    ///
    /// Returns `None` when no event has a recorded latency yet.
    async fn average_response_time(&self) -> Result<Option<f64>>;

    /// Deletes an event. Not-found error when the row is absent.
    async fn delete(&self, id: EventId) -> Result<()>;
}

/// Persistence operations for webhook subscriptions.
///
/// Subscriptions are a plain CRUD surface with a uniqueness constraint on
/// the URL; the delivery path never reads them.
#[async_trait::async_trait]
pub trait SubscriptionStore: Send + Sync + std::fmt::Debug {
    /// Persists a new subscription, assigning its id and timestamps.
    ///
    /// Conflict error when another subscription already uses the URL.
    async fn create(&self, subscription: NewSubscription) -> Result<Subscription>;

    /// Fetches a subscription by id. Returns `None` when no row exists.
    async fn get(&self, id: SubscriptionId) -> Result<Option<Subscription>>;

    /// Lists all subscriptions, newest first.
    async fn list(&self) -> Result<Vec<Subscription>>;

    /// Lists subscriptions with the active flag set, newest first.
    async fn list_active(&self) -> Result<Vec<Subscription>>;

    /// Applies a partial update; `None` fields keep their stored value.
    ///
    /// Not-found error when the row is absent, conflict error when a URL
    /// change collides with another subscription.
    async fn update(
        &self,
        id: SubscriptionId,
        update: SubscriptionUpdate,
    ) -> Result<Subscription>;

    /// Deletes a subscription. Not-found error when the row is absent.
    async fn delete(&self, id: SubscriptionId) -> Result<()>;
}

/// Container wiring the PostgreSQL-backed stores to a shared pool.
///
/// `Storage` is the entry point the binary uses: it owns the connection pool
/// and hands out the store implementations behind `Arc` so the engine and
/// its workers can share them.
#[derive(Debug, Clone)]
pub struct Storage {
    /// Event rows.
    pub events: Arc<PgEventStore>,

    /// Subscription rows.
    pub subscriptions: Arc<PgSubscriptionStore>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            events: Arc::new(PgEventStore::new(pool.clone())),
            subscriptions: Arc::new(PgSubscriptionStore::new(pool)),
        }
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy or the
    /// query times out.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.events.pool()).await?;

        Ok(())
    }
}
