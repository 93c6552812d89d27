use rand::Rng;

const BASE_SECONDS: f64 = 1.0;
const MAX_SECONDS: f64 = 30.0;

/// Reconnect delay for the given 1-indexed attempt (§4.B). Growth is
/// exponential (2x per attempt), or 1.5x when the previous disconnect was a
/// `WAIT`. The delay is then multiplicatively jittered by `uniform(0.8,
/// 1.2)` and clamped to `MAX_SECONDS`.
pub fn backoff_seconds(attempt: u32, gentle: bool) -> f64 {
    let growth: f64 = if gentle { 1.5 } else { 2.0 };
    let raw = BASE_SECONDS * growth.powi(attempt.saturating_sub(1) as i32);
    let jittered = raw * rand::thread_rng().gen_range(0.8..1.2);
    jittered.min(MAX_SECONDS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_is_never_more_than_max() {
        for attempt in 1..=10 {
            let delay = backoff_seconds(attempt, false);
            assert!(delay <= MAX_SECONDS);
            assert!(delay > 0.0);
        }
    }

    #[test]
    fn gentle_backoff_grows_slower_than_normal() {
        // At attempt 3: normal raw = 4.0 (jittered range [3.2, 4.8]),
        // gentle raw = 2.25 (jittered range [1.8, 2.7]). The ranges don't
        // overlap, so this holds regardless of jitter.
        for _ in 0..20 {
            assert!(backoff_seconds(3, true) < backoff_seconds(3, false));
        }
    }
}
