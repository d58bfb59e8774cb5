//! Retry scheduler: periodic sweep re-dispatching stalled pending events.
//!
//! The sweep is a safety net under the message-driven retry path. Whatever
//! the bus loses (a dropped message, a crash between acknowledgment and
//! HTTP completion) lands back here, because any event left in `pending`
//! with budget remaining becomes sweep-eligible once its linear backoff
//! window elapses. The scheduler itself never writes; it only triggers
//! dispatch.

use std::{sync::Arc, time::Duration};

use sinker_core::{Clock, EventStatus, EventStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{dispatcher::Dispatcher, retry};

/// Configuration for the retry scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between sweeps.
    pub sweep_interval: Duration,
    /// Linear penalty per consumed attempt when deciding eligibility.
    pub backoff_step: Duration,
    /// Maximum events examined per sweep.
    pub batch_limit: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            backoff_step: retry::DEFAULT_BACKOFF_STEP,
            batch_limit: 100,
        }
    }
}

/// Periodic sweep over pending events with attempt budget remaining.
#[derive(Debug)]
pub struct RetryScheduler {
    store: Arc<dyn EventStore>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl RetryScheduler {
    /// Creates a scheduler sweeping the given store.
    pub fn new(
        store: Arc<dyn EventStore>,
        dispatcher: Dispatcher,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self { store, dispatcher, clock, config }
    }

    /// Runs sweep iterations until cancelled.
    ///
    /// Sweep errors are logged and absorbed; the loop itself never dies.
    pub async fn run(self, cancellation_token: CancellationToken) {
        info!(
            sweep_interval_secs = self.config.sweep_interval.as_secs(),
            backoff_step_secs = self.config.backoff_step.as_secs(),
            batch_limit = self.config.batch_limit,
            "retry scheduler started"
        );

        loop {
            tokio::select! {
                () = self.clock.sleep(self.config.sweep_interval) => {},
                () = cancellation_token.cancelled() => break,
            }
            if cancellation_token.is_cancelled() {
                break;
            }

            match self.sweep_once().await {
                Ok(0) => {},
                Ok(dispatched) => debug!(dispatched, "sweep re-dispatched stalled events"),
                Err(error) => error!(%error, "retry sweep failed"),
            }
        }

        info!("retry scheduler stopped");
    }

    /// Executes one sweep and reports how many events were re-dispatched.
    ///
    /// Awaitable form of the loop body for deterministic tests. Eligibility
    /// is decided per event in code: budget must remain and the linear
    /// backoff window (`attempts * backoff_step` past the last state change)
    /// must have elapsed.
    pub async fn sweep_once(&self) -> sinker_core::Result<usize> {
        let pending = self
            .store
            .list_by_status(EventStatus::Pending, self.config.batch_limit, None)
            .await?;

        let now = self.clock.now_utc();
        let mut dispatched = 0_usize;
        for event in pending {
            if event.attempts_exhausted() {
                continue;
            }
            if !retry::is_retry_due(&event, now, self.config.backoff_step) {
                continue;
            }

            debug!(
                event_id = %event.id,
                attempts = event.attempts,
                "re-dispatching stalled event"
            );
            self.dispatcher.dispatch(event.id);
            dispatched += 1;
        }

        Ok(dispatched)
    }
}
