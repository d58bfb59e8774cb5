//! Builders producing realistic store inputs.
//!
//! Defaults pass validation so a bare `build()` is always usable; setters
//! override only what a test cares about.

use serde_json::json;
use sinker_core::{HttpMethod, NewEvent, NewSubscription};

/// Chained builder for [`NewEvent`] inputs.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    url: String,
    method: HttpMethod,
    headers: Option<String>,
    payload: Option<String>,
    max_attempts: Option<i32>,
}

impl EventBuilder {
    /// Starts a builder targeting `url` with a JSON order payload.
    pub fn to_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Post,
            headers: Some(
                json!({
                    "content-type": "application/json",
                    "x-test-run": "sinker",
                })
                .to_string(),
            ),
            payload: Some(json!({"event": "order.created", "order": 42}).to_string()),
            max_attempts: None,
        }
    }

    /// Overrides the HTTP verb.
    #[must_use]
    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// Replaces the header text.
    #[must_use]
    pub fn headers(mut self, headers: impl Into<String>) -> Self {
        self.headers = Some(headers.into());
        self
    }

    /// Drops the default headers entirely.
    #[must_use]
    pub fn no_headers(mut self) -> Self {
        self.headers = None;
        self
    }

    /// Replaces the body text.
    #[must_use]
    pub fn payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Overrides the attempt budget.
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Produces the store input.
    pub fn build(self) -> NewEvent {
        NewEvent {
            url: self.url,
            method: self.method,
            headers: self.headers,
            payload: self.payload,
            max_attempts: self.max_attempts,
        }
    }
}

/// Chained builder for [`NewSubscription`] inputs.
#[derive(Debug, Clone)]
pub struct SubscriptionBuilder {
    name: String,
    url: String,
    events: Vec<String>,
    secret: String,
    active: Option<bool>,
}

impl SubscriptionBuilder {
    /// Starts a builder for a subscriber called `name`.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        let url = format!("https://hooks.example.com/{name}");
        Self {
            name,
            url,
            events: vec!["order.created".to_owned()],
            secret: "whsec_test".to_owned(),
            active: None,
        }
    }

    /// Overrides the target URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Replaces the event-type set.
    #[must_use]
    pub fn events(mut self, events: &[&str]) -> Self {
        self.events = events.iter().map(|event| (*event).to_owned()).collect();
        self
    }

    /// Overrides the shared secret.
    #[must_use]
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    /// Registers the subscription as disabled.
    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.active = Some(false);
        self
    }

    /// Produces the store input.
    pub fn build(self) -> NewSubscription {
        NewSubscription {
            name: self.name,
            url: self.url,
            events: self.events,
            secret: self.secret,
            active: self.active,
        }
    }
}
