use std::time::Duration;

use rand::Rng;

/// Exponential delay for the given attempt (1-based), capped at `max`.
pub fn exponential(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(30);
    let delay = base.as_secs_f64() * 2u64.pow(exponent) as f64;
    Duration::from_secs_f64(delay.min(max.as_secs_f64()))
}

/// Spread a delay by +-`jitter` (fraction of the delay, clamped below 1).
pub fn jittered(delay: Duration, jitter: f64) -> Duration {
    if delay.is_zero() {
        return Duration::ZERO;
    }
    let jitter = jitter.clamp(0.0, 0.99);
    let base = delay.as_secs_f64();
    let min_delay = base * (1.0 - jitter);
    let max_delay = base * (1.0 + jitter);
    let mut rng = rand::rng();
    Duration::from_secs_f64(rng.random_range(min_delay..=max_delay))
}
