//! PostgreSQL-backed store implementations.
//!
//! Runtime (non-macro) sqlx queries with explicit column lists, so the
//! crate builds without a live database. Status and method enums travel
//! as their lowercase/uppercase string spellings.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::{CoreError, Result},
    models::{
        EventId, EventStatus, NewEvent, NewSubscription, Subscription, SubscriptionId,
        SubscriptionUpdate, WebhookEvent,
    },
    storage::{EventStore, SubscriptionStore},
};

/// Event store backed by the `webhook_events` table.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: Arc<PgPool>,
}

impl PgEventStore {
    /// Creates a new store over the given pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }
}

#[async_trait::async_trait]
impl EventStore for PgEventStore {
    async fn create(&self, event: NewEvent) -> Result<WebhookEvent> {
        let created = sqlx::query_as::<_, WebhookEvent>(
            r#"
            INSERT INTO webhook_events
                (id, url, method, headers, payload, status, attempts, max_attempts,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, 0, $7, NOW(), NOW())
            RETURNING id, url, method, headers, payload, status, attempts, max_attempts,
                      response_time_ms, error_message, created_at, updated_at
            "#,
        )
        .bind(EventId::new().0)
        .bind(&event.url)
        .bind(event.method.to_string())
        .bind(&event.headers)
        .bind(&event.payload)
        .bind(EventStatus::Pending.to_string())
        .bind(event.max_attempts_or_default())
        .fetch_one(&*self.pool)
        .await?;

        Ok(created)
    }

    async fn get(&self, id: EventId) -> Result<Option<WebhookEvent>> {
        let event = sqlx::query_as::<_, WebhookEvent>(
            r#"
            SELECT id, url, method, headers, payload, status, attempts, max_attempts,
                   response_time_ms, error_message, created_at, updated_at
            FROM webhook_events
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(event)
    }

    async fn save(&self, event: &WebhookEvent) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events
            SET url = $2, method = $3, headers = $4, payload = $5, status = $6,
                attempts = $7, max_attempts = $8, response_time_ms = $9,
                error_message = $10, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(event.id.0)
        .bind(&event.url)
        .bind(event.method.to_string())
        .bind(&event.headers)
        .bind(&event.payload)
        .bind(event.status.to_string())
        .bind(event.attempts)
        .bind(event.max_attempts)
        .bind(event.response_time_ms)
        .bind(&event.error_message)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("webhook event {} not found", event.id)));
        }

        Ok(())
    }

    async fn save_if_attempts(
        &self,
        event: &WebhookEvent,
        expected_attempts: i32,
    ) -> Result<bool> {
        // The attempts guard in the WHERE clause is the compare-and-swap:
        // a concurrent writer that already bumped the counter makes this
        // update match zero rows.
        let result = sqlx::query(
            r#"
            UPDATE webhook_events
            SET url = $2, method = $3, headers = $4, payload = $5, status = $6,
                attempts = $7, max_attempts = $8, response_time_ms = $9,
                error_message = $10, updated_at = NOW()
            WHERE id = $1 AND attempts = $11
            "#,
        )
        .bind(event.id.0)
        .bind(&event.url)
        .bind(event.method.to_string())
        .bind(&event.headers)
        .bind(&event.payload)
        .bind(event.status.to_string())
        .bind(event.attempts)
        .bind(event.max_attempts)
        .bind(event.response_time_ms)
        .bind(&event.error_message)
        .bind(expected_attempts)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_by_status(
        &self,
        status: EventStatus,
        limit: i64,
        older_than: Option<DateTime<Utc>>,
    ) -> Result<Vec<WebhookEvent>> {
        let events = sqlx::query_as::<_, WebhookEvent>(
            r#"
            SELECT id, url, method, headers, payload, status, attempts, max_attempts,
                   response_time_ms, error_message, created_at, updated_at
            FROM webhook_events
            WHERE status = $1
              AND ($2::timestamptz IS NULL OR updated_at < $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(status.to_string())
        .bind(older_than)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        Ok(events)
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<WebhookEvent>> {
        let events = sqlx::query_as::<_, WebhookEvent>(
            r#"
            SELECT id, url, method, headers, payload, status, attempts, max_attempts,
                   response_time_ms, error_message, created_at, updated_at
            FROM webhook_events
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        Ok(events)
    }

    async fn count(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM webhook_events")
            .fetch_one(&*self.pool)
            .await?;

        Ok(count.0)
    }

    async fn count_by_status(&self, status: EventStatus) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM webhook_events
            WHERE status = $1
            "#,
        )
        .bind(status.to_string())
        .fetch_one(&*self.pool)
        .await?;

        Ok(count.0)
    }

    async fn average_response_time(&self) -> Result<Option<f64>> {
        // AVG over bigint yields NUMERIC; cast to float8 so sqlx can decode
        // without a decimal crate.
        let avg: (Option<f64>,) = sqlx::query_as(
            r#"
            SELECT AVG(response_time_ms)::DOUBLE PRECISION
            FROM webhook_events
            WHERE response_time_ms IS NOT NULL
            "#,
        )
        .fetch_one(&*self.pool)
        .await?;

        Ok(avg.0)
    }

    async fn delete(&self, id: EventId) -> Result<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM webhook_events
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("webhook event {id} not found")));
        }

        Ok(())
    }
}

/// Subscription store backed by the `webhook_subscriptions` table.
#[derive(Debug, Clone)]
pub struct PgSubscriptionStore {
    pool: Arc<PgPool>,
}

impl PgSubscriptionStore {
    /// Creates a new store over the given pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }
}

#[async_trait::async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn create(&self, subscription: NewSubscription) -> Result<Subscription> {
        // Explicit existence check for a clean conflict message; the unique
        // index on url still backstops the lookup-then-insert race.
        let exists: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(SELECT 1 FROM webhook_subscriptions WHERE url = $1)
            "#,
        )
        .bind(&subscription.url)
        .fetch_one(&*self.pool)
        .await?;

        if exists.0 {
            return Err(CoreError::conflict(format!(
                "subscription url {} already registered",
                subscription.url
            )));
        }

        let active = subscription.active.unwrap_or(true);
        let created = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO webhook_subscriptions
                (id, name, url, events, secret, active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            RETURNING id, name, url, events, secret, active, created_at, updated_at
            "#,
        )
        .bind(SubscriptionId::new().0)
        .bind(&subscription.name)
        .bind(&subscription.url)
        .bind(sqlx::types::Json(&subscription.events))
        .bind(&subscription.secret)
        .bind(active)
        .fetch_one(&*self.pool)
        .await?;

        Ok(created)
    }

    async fn get(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, name, url, events, secret, active, created_at, updated_at
            FROM webhook_subscriptions
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(subscription)
    }

    async fn list(&self) -> Result<Vec<Subscription>> {
        let subscriptions = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, name, url, events, secret, active, created_at, updated_at
            FROM webhook_subscriptions
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&*self.pool)
        .await?;

        Ok(subscriptions)
    }

    async fn list_active(&self) -> Result<Vec<Subscription>> {
        let subscriptions = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, name, url, events, secret, active, created_at, updated_at
            FROM webhook_subscriptions
            WHERE active = TRUE
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&*self.pool)
        .await?;

        Ok(subscriptions)
    }

    async fn update(
        &self,
        id: SubscriptionId,
        update: SubscriptionUpdate,
    ) -> Result<Subscription> {
        // COALESCE keeps the stored value for fields the caller left unset.
        // A url change that collides surfaces as a unique-violation conflict.
        let updated = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE webhook_subscriptions
            SET name = COALESCE($2, name),
                url = COALESCE($3, url),
                events = COALESCE($4, events),
                secret = COALESCE($5, secret),
                active = COALESCE($6, active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, url, events, secret, active, created_at, updated_at
            "#,
        )
        .bind(id.0)
        .bind(update.name)
        .bind(update.url)
        .bind(update.events.map(sqlx::types::Json))
        .bind(update.secret)
        .bind(update.active)
        .fetch_optional(&*self.pool)
        .await?;

        updated.ok_or_else(|| CoreError::not_found(format!("subscription {id} not found")))
    }

    async fn delete(&self, id: SubscriptionId) -> Result<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM webhook_subscriptions
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("subscription {id} not found")));
        }

        Ok(())
    }
}
