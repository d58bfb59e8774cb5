//! Core domain models and strongly-typed identifiers.
//!
//! Defines webhook delivery events, subscriptions, lifecycle notification
//! messages, and newtype ID wrappers for compile-time type safety. Includes
//! database serialization traits and the state vocabulary of the delivery
//! pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed delivery event identifier.
///
/// Wraps a UUID to prevent mixing with other ID types. The ID is assigned
/// when the event is created and follows it through its entire lifecycle.
///
/// # Example
///
/// ```
/// use sinker_core::models::EventId;
/// let event_id = EventId::new();
/// println!("processing event: {}", event_id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new random event ID.
    ///
    /// Uses UUID v4 for globally unique identifiers without coordination.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for EventId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for EventId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    /// Creates a new random subscription ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SubscriptionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for SubscriptionId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for SubscriptionId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for SubscriptionId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Event lifecycle status.
///
/// Events progress through these states during delivery:
///
/// ```text
/// Pending ---(dispatch ok)----------------> Success   [terminal]
/// Pending ---(dispatch err, attempts<max)-> Pending   (retry eligible)
/// Pending ---(dispatch err, attempts==max)> Failed    [terminal]
/// Retrying --(dispatch runs)--------------> same branches as Pending
/// ```
///
/// `Retrying` is entered only through an explicit manual retry request and
/// behaves exactly like `Pending` once dispatch executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Waiting for delivery, either fresh or after a failed attempt.
    Pending,

    /// Manually re-queued for delivery.
    Retrying,

    /// Delivered to the destination. Terminal.
    Success,

    /// All attempts exhausted. Terminal.
    Failed,
}

impl EventStatus {
    /// True for states the automatic retry path never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Retrying => write!(f, "retrying"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl sqlx::Type<PgDb> for EventStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "pending" => Ok(Self::Pending),
            "retrying" => Ok(Self::Retrying),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid event status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for EventStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// HTTP methods supported for webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// HTTP POST method (default).
    #[default]
    Post,
    /// HTTP PUT method.
    Put,
    /// HTTP PATCH method.
    Patch,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Patch => write!(f, "PATCH"),
        }
    }
}

impl sqlx::Type<PgDb> for HttpMethod {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for HttpMethod {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            _ => Err(format!("invalid http method: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for HttpMethod {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// A single outbound webhook delivery and its lifecycle record.
///
/// The event carries its own destination; nothing else is consulted to route
/// it. Headers and payload are kept as the raw text the caller supplied.
/// Parsing happens at dispatch time, where unparseable headers become an
/// empty header set and an unparseable payload is sent as raw bytes, never a
/// dispatch failure.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookEvent {
    /// Unique identifier for this event.
    pub id: EventId,

    /// Destination URL for delivery.
    pub url: String,

    /// HTTP verb used for the outbound request.
    pub method: HttpMethod,

    /// Raw header text, expected to hold a JSON name→value mapping.
    pub headers: Option<String>,

    /// Raw request body text.
    pub payload: Option<String>,

    /// Current lifecycle status.
    pub status: EventStatus,

    /// Number of delivery attempts executed so far.
    ///
    /// Incremented on every attempt regardless of outcome. Never decreases,
    /// never exceeds `max_attempts`.
    pub attempts: i32,

    /// Attempt budget, fixed at creation.
    pub max_attempts: i32,

    /// Latency of the most recent attempt in milliseconds.
    pub response_time_ms: Option<i64>,

    /// Error message from the most recent failed attempt.
    ///
    /// Cleared on success and on manual retry.
    pub error_message: Option<String>,

    /// When the event was created. Immutable.
    pub created_at: DateTime<Utc>,

    /// When the event was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl WebhookEvent {
    /// True once the event reached a state the retry path never leaves.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True when the attempt budget is used up.
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Default attempt budget when the caller does not pick one.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Input for creating a delivery event.
///
/// The store assigns id, timestamps, initial status and the zeroed attempt
/// counter; callers only describe the request to deliver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    /// Destination URL.
    pub url: String,
    /// HTTP verb, defaults to POST.
    #[serde(default)]
    pub method: HttpMethod,
    /// Raw header text (JSON name→value mapping).
    #[serde(default)]
    pub headers: Option<String>,
    /// Raw body text.
    #[serde(default)]
    pub payload: Option<String>,
    /// Attempt budget override; `None` means [`DEFAULT_MAX_ATTEMPTS`].
    #[serde(default)]
    pub max_attempts: Option<i32>,
}

impl NewEvent {
    /// Creates an input targeting `url` with every other field defaulted.
    pub fn to_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Post,
            headers: None,
            payload: None,
            max_attempts: None,
        }
    }

    /// Rejects input that can never produce a deliverable event.
    ///
    /// Header and payload text are accepted as-is: dispatch tolerates
    /// unparseable values, so they are not validated here.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.url.trim().is_empty() {
            return Err(CoreError::invalid_input("url must not be empty"));
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(CoreError::invalid_input("url must be http or https"));
        }
        if let Some(max) = self.max_attempts {
            if max < 1 {
                return Err(CoreError::invalid_input("max_attempts must be at least 1"));
            }
        }
        Ok(())
    }

    /// Attempt budget to persist, applying the default.
    pub fn max_attempts_or_default(&self) -> i32 {
        self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS)
    }
}

/// A registered downstream subscriber.
///
/// Subscriptions are an independent CRUD surface: the delivery engine never
/// consults them to pick destinations, since every [`WebhookEvent`] carries
/// its own URL.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    /// Unique identifier for this subscription.
    pub id: SubscriptionId,

    /// Human-readable subscription name.
    pub name: String,

    /// Target URL. Unique across all subscriptions.
    pub url: String,

    /// Event-type names this subscription is interested in.
    pub events: sqlx::types::Json<Vec<String>>,

    /// Shared secret handed to the subscriber for request verification.
    pub secret: String,

    /// Soft enable/disable flag.
    pub active: bool,

    /// When this subscription was created.
    pub created_at: DateTime<Utc>,

    /// When this subscription was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Subscribed event-type names as a plain slice.
    pub fn event_names(&self) -> &[String] {
        &self.events.0
    }
}

/// Input for creating a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubscription {
    /// Human-readable name.
    pub name: String,
    /// Target URL, must be unique.
    pub url: String,
    /// Event-type names of interest.
    #[serde(default)]
    pub events: Vec<String>,
    /// Shared secret for the subscriber.
    pub secret: String,
    /// Enabled flag; `None` means active.
    #[serde(default)]
    pub active: Option<bool>,
}

impl NewSubscription {
    /// Rejects blank required fields.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::invalid_input("name must not be empty"));
        }
        if self.url.trim().is_empty() {
            return Err(CoreError::invalid_input("url must not be empty"));
        }
        if self.secret.trim().is_empty() {
            return Err(CoreError::invalid_input("secret must not be empty"));
        }
        Ok(())
    }
}

/// Partial update for a subscription. `None` fields keep their stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionUpdate {
    /// Replacement name.
    pub name: Option<String>,
    /// Replacement URL (still subject to the uniqueness constraint).
    pub url: Option<String>,
    /// Replacement event-type set.
    pub events: Option<Vec<String>>,
    /// Replacement secret.
    pub secret: Option<String>,
    /// Replacement active flag.
    pub active: Option<bool>,
}

impl SubscriptionUpdate {
    /// Rejects fields that are present but blank.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
            return Err(CoreError::invalid_input("name must not be empty"));
        }
        if self.url.as_deref().is_some_and(|url| url.trim().is_empty()) {
            return Err(CoreError::invalid_input("url must not be empty"));
        }
        if self.secret.as_deref().is_some_and(|secret| secret.trim().is_empty()) {
            return Err(CoreError::invalid_input("secret must not be empty"));
        }
        Ok(())
    }
}

/// Lifecycle transition tags carried on [`LifecycleMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationType {
    /// A delivery event was created.
    NewEvent,
    /// A delivery attempt succeeded.
    Success,
    /// The attempt budget is exhausted; the event failed terminally.
    Failure,
    /// A manual retry was requested.
    Retry,
}

impl NotificationType {
    /// Wire spelling of this tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewEvent => "NEW_EVENT",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Retry => "RETRY",
        }
    }

    /// Parses a wire tag; unknown spellings yield `None` so that consumers
    /// can log and drop them instead of failing.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEW_EVENT" => Some(Self::NewEvent),
            "SUCCESS" => Some(Self::Success),
            "FAILURE" => Some(Self::Failure),
            "RETRY" => Some(Self::Retry),
            _ => None,
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Denormalized event snapshot published on lifecycle transitions.
///
/// This is a value, not a reference: consumers own their copy and mutations
/// downstream never touch the event store. The JSON rendering uses camelCase
/// field names and the schema evolves additively only. `status` and
/// `notificationType` travel as plain strings so unknown values still parse,
/// and decoding ignores fields it does not know.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleMessage {
    /// Id of the event this snapshot describes.
    pub event_id: EventId,
    /// Destination URL at snapshot time.
    pub url: String,
    /// HTTP verb, wire-spelled (`POST`, `PUT`, `PATCH`).
    pub method: String,
    /// Raw header text as stored.
    pub headers: Option<String>,
    /// Raw body text as stored.
    pub payload: Option<String>,
    /// Lifecycle status, wire-spelled (`pending`, `retrying`, ...).
    pub status: String,
    /// Attempts executed at snapshot time.
    pub attempts: i32,
    /// Attempt budget.
    pub max_attempts: i32,
    /// Error recorded on the event, if any.
    pub error_message: Option<String>,
    /// Transition tag; see [`NotificationType`].
    pub notification_type: String,
    /// When the message was emitted (not when the event changed).
    pub timestamp: DateTime<Utc>,
}

impl LifecycleMessage {
    /// Snapshots `event` under the given transition tag.
    pub fn snapshot(
        event: &WebhookEvent,
        notification_type: NotificationType,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: event.id,
            url: event.url.clone(),
            method: event.method.to_string(),
            headers: event.headers.clone(),
            payload: event.payload.clone(),
            status: event.status.to_string(),
            attempts: event.attempts,
            max_attempts: event.max_attempts,
            error_message: event.error_message.clone(),
            notification_type: notification_type.as_str().to_string(),
            timestamp,
        }
    }

    /// Parsed transition tag, `None` when the wire value is unknown.
    pub fn notification_type(&self) -> Option<NotificationType> {
        NotificationType::parse(&self.notification_type)
    }
}

/// Read-only statistics projection over the event store.
#[derive(Debug, Clone, Serialize)]
pub struct EventStats {
    /// Total number of events.
    pub total: i64,
    /// Events in `success`.
    pub successful: i64,
    /// Events in `failed`.
    pub failed: i64,
    /// Events in `pending`.
    pub pending: i64,
    /// Events in `retrying`.
    pub retrying: i64,
    /// Mean recorded latency in milliseconds, `0.0` when nothing recorded.
    pub average_response_time_ms: f64,
    /// Most recently created events, newest first.
    pub recent_events: Vec<WebhookEvent>,
}
