//! Webhook delivery engine.
//!
//! This crate hosts the delivery side of the system: the HTTP client that
//! performs attempts, the dispatcher that commits their outcomes, the retry
//! scheduler that re-dispatches overdue events, and the bus consumers that
//! react to lifecycle messages. [`DeliveryEngine`] ties them together behind
//! one facade.
//!
//! # Delivery semantics
//!
//! Any HTTP response, regardless of status class, completes an event: the
//! endpoint answered, so the payload arrived. Only transport failures
//! (connection errors and timeouts) consume an attempt from the event's
//! budget. Attempt outcomes are committed with a compare-and-swap on the
//! attempts counter, so concurrent attempts on the same event never lose an
//! increment.
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use sinker_bus::EventBus;
//! use sinker_core::{NewEvent, RealClock, Storage};
//! use sinker_delivery::{DeliveryEngine, EngineConfig};
//!
//! # async fn example(storage: Storage) -> sinker_delivery::Result<()> {
//! let clock = Arc::new(RealClock);
//! let bus = Arc::new(EventBus::new(clock.clone()));
//! let mut engine = DeliveryEngine::new(
//!     storage.events.clone(),
//!     storage.subscriptions.clone(),
//!     bus,
//!     clock,
//!     EngineConfig::default(),
//! )?;
//!
//! engine.start();
//! engine.create_event(NewEvent::to_url("https://hooks.example.com/orders")).await?;
//! engine.shutdown_graceful(Duration::from_secs(30)).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod consumers;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod notifications;
pub mod retry;
pub mod scheduler;

pub use client::{ClientConfig, DeliveryClient};
pub use dispatcher::Dispatcher;
pub use engine::{DeliveryEngine, EngineConfig};
pub use error::{DeliveryError, Result};
pub use scheduler::{RetryScheduler, SchedulerConfig};
