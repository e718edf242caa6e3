//! Refresh scheduling arithmetic.
//!
//! Kept free of any runtime state so the timing rules can be tested with
//! fixed clocks.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Time at which a bundle issued at `issued_at` should be renewed: two thirds
/// of the way through its remaining lifetime.
#[must_use]
pub fn next_refresh(issued_at: DateTime<Utc>, not_after: DateTime<Utc>) -> DateTime<Utc> {
    let ttl = not_after.signed_duration_since(issued_at);
    issued_at
        .checked_add_signed(ttl / 3 * 2)
        .unwrap_or(not_after)
}

/// Wait until `next`, floored at `min_refresh`.
///
/// Expired or already-due schedules collapse to `min_refresh`.
#[must_use]
pub fn floored_wait(next: DateTime<Utc>, now: DateTime<Utc>, min_refresh: Duration) -> Duration {
    (next - now)
        .to_std()
        .map_or(min_refresh, |wait| wait.max(min_refresh))
}

/// Pseudo-random offset in `[0, wait/10]` derived from the clock.
///
/// Spreads out instances that were started together and would otherwise hit
/// the backend in lockstep.
#[must_use]
pub fn jitter(wait: Duration, now: DateTime<Utc>) -> Duration {
    let bound = wait.as_nanos() / 10 + 1;
    let seed = u128::from(now.timestamp_nanos_opt().unwrap_or_default().unsigned_abs());
    Duration::from_nanos(u64::try_from(seed % bound).unwrap_or(u64::MAX))
}

/// Full sleep duration before the next refresh.
#[must_use]
pub fn refresh_wait(next: DateTime<Utc>, now: DateTime<Utc>, min_refresh: Duration) -> Duration {
    let wait = floored_wait(next, now, min_refresh);
    wait + jitter(wait, now)
}
