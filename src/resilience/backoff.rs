//! Exponential backoff.

use std::time::Duration;

/// Delay before reconnect attempt `attempt`:
/// `min(initial * 2^(attempt - 1), max)`, zero for attempt 0.
pub fn calculate_backoff(attempt: u32, initial: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 2u32.checked_pow(attempt - 1);
    let delay = factor.and_then(|f| initial.checked_mul(f)).unwrap_or(max);
    delay.min(max)
}
