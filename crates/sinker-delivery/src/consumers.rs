//! Bus handlers wiring lifecycle topics to the dispatcher.
//!
//! One handler per topic. Each decodes the lifecycle snapshot, initiates
//! the triggered operation, and acknowledges. HTTP completion is observed
//! through the store, never awaited here, so a crash between initiation and
//! completion leaves a pending event for the retry scheduler to reclaim.
//! Decode failures are handler errors: the message redelivers until a
//! deploy that understands it comes along.

use sinker_bus::{BusMessage, MessageHandler, Result};
use sinker_core::LifecycleMessage;
use tracing::debug;

use crate::{dispatcher::Dispatcher, notifications::NotificationRouter};

/// Triggers a dispatch for every message on `webhook-events`.
#[derive(Debug)]
pub struct DispatchHandler {
    dispatcher: Dispatcher,
}

impl DispatchHandler {
    /// Wraps a dispatcher for consumption from the events topic.
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

#[async_trait::async_trait]
impl MessageHandler for DispatchHandler {
    async fn handle(&self, message: &BusMessage) -> Result<()> {
        let lifecycle: LifecycleMessage = message.decode()?;
        debug!(event_id = %lifecycle.event_id, "dispatch triggered from bus");
        self.dispatcher.dispatch(lifecycle.event_id);
        Ok(())
    }
}

/// Schedules a backoff dispatch for every message on `webhook-retries`.
///
/// The attempt count carried on the message decides the exponential delay.
#[derive(Debug)]
pub struct BackoffHandler {
    dispatcher: Dispatcher,
}

impl BackoffHandler {
    /// Wraps a dispatcher for consumption from the retries topic.
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

#[async_trait::async_trait]
impl MessageHandler for BackoffHandler {
    async fn handle(&self, message: &BusMessage) -> Result<()> {
        let lifecycle: LifecycleMessage = message.decode()?;
        debug!(
            event_id = %lifecycle.event_id,
            attempts = lifecycle.attempts,
            "backoff dispatch triggered from bus"
        );
        self.dispatcher.dispatch_after_backoff(lifecycle.event_id, lifecycle.attempts);
        Ok(())
    }
}

/// Feeds `webhook-notifications` messages to the notification router.
#[derive(Debug)]
pub struct NotificationHandler {
    router: NotificationRouter,
}

impl NotificationHandler {
    /// Wraps a router for consumption from the notifications topic.
    pub fn new(router: NotificationRouter) -> Self {
        Self { router }
    }
}

#[async_trait::async_trait]
impl MessageHandler for NotificationHandler {
    async fn handle(&self, message: &BusMessage) -> Result<()> {
        let lifecycle: LifecycleMessage = message.decode()?;
        self.router.process(&lifecycle);
        Ok(())
    }
}
