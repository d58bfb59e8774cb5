//! Consumer workers driving message handlers.

use std::{sync::Arc, time::Duration};

use sinker_core::time::Clock;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use crate::{error::Result, message::BusMessage};

/// Processes one message from a consumer group's queue.
///
/// Returning `Ok` acknowledges the message. Returning an error suppresses
/// the acknowledgment: the worker redelivers the same message after its
/// configured delay, so duplicate side effects must be tolerated
/// (at-least-once).
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync + std::fmt::Debug {
    /// Handles a single message.
    async fn handle(&self, message: &BusMessage) -> Result<()>;
}

/// Drives a [`MessageHandler`] over one consumer group's queue.
///
/// The worker pulls messages in order and never moves on until the current
/// message is acknowledged. Redelivery blocks the group, matching a
/// single-consumer group on a real broker.
pub struct ConsumerWorker {
    group: String,
    receiver: UnboundedReceiver<BusMessage>,
    handler: Arc<dyn MessageHandler>,
    redelivery_delay: Duration,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
}

impl ConsumerWorker {
    /// Creates a worker for one group's queue.
    pub fn new(
        group: impl Into<String>,
        receiver: UnboundedReceiver<BusMessage>,
        handler: Arc<dyn MessageHandler>,
        redelivery_delay: Duration,
        clock: Arc<dyn Clock>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            group: group.into(),
            receiver,
            handler,
            redelivery_delay,
            clock,
            cancellation_token,
        }
    }

    /// Consumes messages until cancelled or the bus is dropped.
    pub async fn run(mut self) {
        info!(group = %self.group, "consumer worker starting");

        loop {
            let message = tokio::select! {
                () = self.cancellation_token.cancelled() => break,
                maybe = self.receiver.recv() => match maybe {
                    Some(message) => message,
                    // Bus dropped: queue has run dry for good.
                    None => break,
                },
            };

            self.process(message).await;
        }

        info!(group = %self.group, "consumer worker stopped");
    }

    /// Handles one message to acknowledgment, redelivering on errors.
    async fn process(&self, message: BusMessage) {
        loop {
            match self.handler.handle(&message).await {
                Ok(()) => {
                    trace!(
                        group = %self.group,
                        topic = %message.topic,
                        offset = message.offset,
                        "message acknowledged"
                    );
                    return;
                },
                Err(error) => {
                    warn!(
                        group = %self.group,
                        topic = %message.topic,
                        offset = message.offset,
                        error = %error,
                        "handler failed, message will be redelivered"
                    );

                    tokio::select! {
                        () = self.clock.sleep(self.redelivery_delay) => {},
                        () = self.cancellation_token.cancelled() => return,
                    }
                },
            }
        }
    }
}
