//! Dwell and slew limits applied before a duty reaches the actuator.

use std::time::Duration;

use tokio::time::Instant;

/// Whether at least `min_dwell` has passed since the last applied change.
/// With no previous change the guard is open.
pub fn dwell_elapsed(last_change: Option<Instant>, now: Instant, min_dwell: Duration) -> bool {
    last_change.is_none_or(|at| now.saturating_duration_since(at) >= min_dwell)
}

/// Moves `last` toward `target` by at most `max_step`, then clamps the
/// result into `[min_duty, max_duty]`.
pub fn step_toward(last: u8, target: u8, max_step: u8, min_duty: u8, max_duty: u8) -> u8 {
    let next = if target > last {
        last.saturating_add(max_step).min(target)
    } else {
        last.saturating_sub(max_step).max(target)
    };
    next.clamp(min_duty, max_duty)
}
