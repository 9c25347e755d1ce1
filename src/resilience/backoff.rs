//! Exponential backoff with jitter.
//!
//! Attempt numbering is 1-based: attempt 1 runs immediately, attempt `n >= 2`
//! waits `min(base * 2^(n-2), max)` scaled by a uniform jitter factor.

use std::time::Duration;

use rand::Rng;

/// Un-jittered delay before `attempt`.
pub fn base_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt <= 1 {
        return Duration::ZERO;
    }

    let exponential = 2u32.saturating_pow(attempt - 2);
    base.checked_mul(exponential).unwrap_or(max).min(max)
}

/// Calculate exponential backoff delay with jitter.
///
/// The jitter factor is drawn from `jitter` (inclusive) and the result never
/// exceeds `max`.
pub fn calculate_backoff<R: Rng + ?Sized>(
    attempt: u32,
    base: Duration,
    max: Duration,
    jitter: (f64, f64),
    rng: &mut R,
) -> Duration {
    let capped = base_backoff(attempt, base, max);
    if capped.is_zero() {
        return capped;
    }

    let (low, high) = jitter;
    let factor = if !(low.is_finite() && high.is_finite()) {
        1.0
    } else if high > low {
        rng.gen_range(low..=high)
    } else {
        low
    };

    capped.mul_f64(factor.max(0.0)).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const BASE: Duration = Duration::from_millis(100);
    const MAX: Duration = Duration::from_millis(2_000);

    #[test]
    fn test_backoff_calculation() {
        assert_eq!(base_backoff(1, BASE, MAX), Duration::ZERO);
        assert_eq!(base_backoff(2, BASE, MAX), Duration::from_millis(100));
        assert_eq!(base_backoff(3, BASE, MAX), Duration::from_millis(200));
        assert_eq!(base_backoff(4, BASE, MAX), Duration::from_millis(400));
        assert_eq!(base_backoff(10, BASE, MAX), MAX);
        assert_eq!(base_backoff(u32::MAX, BASE, MAX), MAX);
    }

    #[test]
    fn test_jitter_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1_000 {
            let d = calculate_backoff(3, BASE, MAX, (0.5, 1.5), &mut rng);
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(300));
        }
    }

    #[test]
    fn test_seeded_jitter_is_reproducible() {
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        for attempt in 2..8 {
            assert_eq!(
                calculate_backoff(attempt, BASE, MAX, (0.5, 1.5), &mut a),
                calculate_backoff(attempt, BASE, MAX, (0.5, 1.5), &mut b)
            );
        }
    }

    #[test]
    fn test_non_finite_jitter_falls_back_to_base() {
        let mut rng = StdRng::seed_from_u64(3);
        for jitter in [(0.5, f64::INFINITY), (f64::NAN, 1.5), (f64::NEG_INFINITY, 0.5)] {
            assert_eq!(calculate_backoff(3, BASE, MAX, jitter, &mut rng), Duration::from_millis(200));
        }
    }

    proptest! {
        #[test]
        fn prop_delay_never_exceeds_max(seed in any::<u64>(), attempt in 1u32..64, base_ms in 1u64..5_000, max_ms in 1u64..120_000) {
            let mut rng = StdRng::seed_from_u64(seed);
            let max = Duration::from_millis(max_ms);
            let d = calculate_backoff(attempt, Duration::from_millis(base_ms), max, (0.5, 1.5), &mut rng);
            prop_assert!(d <= max);
        }

        #[test]
        fn prop_schedule_non_decreasing(attempt in 1u32..63, base_ms in 1u64..5_000, max_ms in 1u64..120_000) {
            let base = Duration::from_millis(base_ms);
            let max = Duration::from_millis(max_ms);
            prop_assert!(base_backoff(attempt, base, max) <= base_backoff(attempt + 1, base, max));
        }
    }
}
