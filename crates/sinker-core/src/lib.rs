//! Core domain types for the webhook delivery engine.
//!
//! Provides strongly-typed domain models, the storage traits with their
//! PostgreSQL and in-memory implementations, the clock seam, and error
//! handling. All other crates depend on these foundational types for type
//! safety and consistency.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    EventId, EventStats, EventStatus, HttpMethod, LifecycleMessage, NewEvent, NewSubscription,
    NotificationType, Subscription, SubscriptionId, SubscriptionUpdate, WebhookEvent,
};
pub use storage::{
    EventStore, InMemoryEventStore, InMemorySubscriptionStore, PgEventStore,
    PgSubscriptionStore, Storage, SubscriptionStore,
};
pub use time::{Clock, RealClock, TestClock};
