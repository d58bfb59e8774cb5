//! Retry timing for failed deliveries.
//!
//! Two clocks govern a retry. Immediately after a failed attempt the
//! dispatcher re-dispatches the event on an exponential backoff timer.
//! Independently, the retry scheduler sweeps pending events on a linear
//! schedule, so deliveries still progress after a restart loses the
//! in-flight timers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sinker_core::WebhookEvent;

/// Linear penalty applied per consumed attempt when deciding sweep
/// eligibility.
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_secs(300);

/// Exponent cap so corrupt attempt counters cannot overflow the shift.
const MAX_BACKOFF_EXPONENT: u32 = 20;

/// Delay before the immediate re-dispatch of a failed attempt.
///
/// Doubles with every consumed attempt: one failure waits 2s, two wait 4s,
/// three wait 8s. A negative counter is treated as a single attempt; large
/// counters are clamped so the shift cannot overflow.
pub fn backoff_delay(attempts: i32) -> Duration {
    let exponent = u32::try_from(attempts).unwrap_or(1).min(MAX_BACKOFF_EXPONENT);
    Duration::from_secs(2_u64.saturating_pow(exponent))
}

/// Moment a pending event becomes eligible for a scheduler sweep.
///
/// Each consumed attempt pushes eligibility another `step` past the last
/// state change, so repeatedly failing events back off linearly between
/// sweeps.
pub fn next_retry_at(updated_at: DateTime<Utc>, attempts: i32, step: Duration) -> DateTime<Utc> {
    let penalty_secs =
        step.as_secs().saturating_mul(u64::from(u32::try_from(attempts).unwrap_or(0)));
    updated_at + chrono::Duration::seconds(i64::try_from(penalty_secs).unwrap_or(i64::MAX))
}

/// True when a pending event has waited out its linear penalty.
///
/// Fresh events with zero attempts are due immediately.
pub fn is_retry_due(event: &WebhookEvent, now: DateTime<Utc>, step: Duration) -> bool {
    now >= next_retry_at(event.updated_at, event.attempts, step)
}
