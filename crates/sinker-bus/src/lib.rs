//! In-process topic bus with consumer groups and at-least-once redelivery.
//!
//! Decouples event creation, delivery, and retry triggering the way an
//! external broker would, without the broker. Three topics carry the
//! traffic, each with one conventional consumer group:
//!
//! ```text
//!                        ┌──────────────────────┐
//!  create ─────────────▶ │ webhook-events       │──▶ dispatch
//!                        ├──────────────────────┤
//!  every transition ───▶ │ webhook-notifications│──▶ observability fan-out
//!                        ├──────────────────────┤
//!  manual retry ───────▶ │ webhook-retries      │──▶ backoff, then dispatch
//!                        └──────────────────────┘
//! ```
//!
//! Publishing is fire-and-forget; consuming is at-least-once (handler errors
//! trigger redelivery of the same message after a delay). Payloads are
//! opaque bytes and handlers own decoding, so topic schemas can evolve
//! without touching the bus.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod consumer;
pub mod error;
pub mod message;

pub use bus::EventBus;
pub use consumer::{ConsumerWorker, MessageHandler};
pub use error::{BusError, Result};
pub use message::{BusMessage, Topic};
